use crate::{
    bson::{doc, Bson, Document},
    error::Result,
    operation::OperationWithDefaults,
    transport::{
        command::{Command, RawCommandResponse},
        StreamDescription,
    },
};

/// The largest number of session ids a single `endSessions` command may carry.
pub(crate) const MAX_END_SESSIONS_BATCH_SIZE: usize = 10_000;

#[derive(Debug)]
pub(crate) struct EndSessions {
    ids: Vec<Document>,
}

impl EndSessions {
    pub(crate) fn new(ids: Vec<Document>) -> Self {
        Self { ids }
    }
}

impl OperationWithDefaults for EndSessions {
    type O = ();
    const NAME: &'static str = "endSessions";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let ids: Vec<Bson> = self.ids.iter().cloned().map(Bson::Document).collect();
        Ok(Command::new(Self::NAME, "admin", doc! { Self::NAME: ids }))
    }

    fn handle_response(
        &self,
        _response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(())
    }

    fn supports_sessions(&self) -> bool {
        false
    }
}
