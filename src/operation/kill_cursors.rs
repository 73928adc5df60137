use crate::{
    bson::doc,
    error::Result,
    operation::OperationWithDefaults,
    transport::{
        command::{Command, RawCommandResponse},
        StreamDescription,
    },
    Namespace,
};

#[derive(Debug)]
pub(crate) struct KillCursors {
    ns: Namespace,
    cursor_id: i64,
}

impl KillCursors {
    pub(crate) fn new(ns: Namespace, cursor_id: i64) -> Self {
        Self { ns, cursor_id }
    }
}

impl OperationWithDefaults for KillCursors {
    type O = ();
    const NAME: &'static str = "killCursors";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "cursors": [self.cursor_id],
        };
        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        _response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        Ok(())
    }
}
