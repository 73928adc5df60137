use crate::{
    bson::{doc, Document},
    error::Result,
    operation::OperationWithDefaults,
    options::ExplainVerbosity,
    transport::{
        command::{Command, RawCommandResponse},
        StreamDescription,
    },
};

/// Wraps an already built command in `{ explain: <command>, verbosity: <verbosity> }`.
#[derive(Debug)]
pub(crate) struct Explain {
    inner: Command,
    verbosity: ExplainVerbosity,
}

impl Explain {
    pub(crate) fn new(inner: Command, verbosity: ExplainVerbosity) -> Self {
        Self { inner, verbosity }
    }
}

impl OperationWithDefaults for Explain {
    type O = Document;
    const NAME: &'static str = "explain";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.inner.body.clone(),
            "verbosity": self.verbosity.as_str(),
        };
        Ok(Command::new(Self::NAME, self.inner.target_db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(response.into_document())
    }
}
