use crate::{
    bson::Document,
    bson_util,
    client::SESSIONS_UNSUPPORTED_COMMANDS,
    error::{Error, Result},
    operation::OperationWithDefaults,
    transport::{
        command::{Command, RawCommandResponse},
        StreamDescription,
    },
};

#[derive(Debug, Clone)]
pub(crate) struct RunCommand {
    db: String,
    command: Document,
}

impl RunCommand {
    pub(crate) fn new(db: String, command: Document) -> Self {
        Self { db, command }
    }

    fn command_name(&self) -> Option<&str> {
        bson_util::first_key(&self.command)
    }
}

impl OperationWithDefaults for RunCommand {
    type O = Document;

    // Since we can't actually specify a string statically here, we just put a descriptive string
    // that should fail loudly if accidentally passed to the server.
    const NAME: &'static str = "$genericRunCommand";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let command_name = self.command_name().ok_or_else(|| {
            Error::invalid_argument("an empty document cannot be passed to a run_command operation")
        })?;

        Ok(Command::new(
            command_name.to_string(),
            self.db.clone(),
            self.command.clone(),
        ))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(response.into_document())
    }

    fn supports_sessions(&self) -> bool {
        self.command_name()
            .map(|command_name| {
                !SESSIONS_UNSUPPORTED_COMMANDS.contains(&command_name.to_lowercase().as_str())
            })
            .unwrap_or(false)
    }
}
