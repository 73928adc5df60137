use crate::{
    bson::{doc, Document},
    cursor::{BatchSizing, CursorSpecification},
    error::Result,
    operation::{batch_size_bson, CursorBody, OperationWithDefaults},
    transport::{
        command::{Command, RawCommandResponse},
        StreamDescription,
    },
};

#[derive(Debug, Clone)]
pub(crate) struct ListCollections {
    db: String,
    filter: Option<Document>,
    name_only: bool,
    batch_size: Option<i32>,
}

impl ListCollections {
    pub(crate) fn new(db: String, filter: Option<Document>, name_only: bool) -> Self {
        Self {
            db,
            filter,
            name_only,
            batch_size: None,
        }
    }

    pub(crate) fn set_batch_size(&mut self, batch_size: i32) {
        self.batch_size = Some(batch_size);
    }

    fn batch_sizing(&self) -> BatchSizing {
        BatchSizing::new(self.batch_size, None)
    }
}

impl OperationWithDefaults for ListCollections {
    type O = CursorSpecification;
    const NAME: &'static str = "listCollections";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: 1,
        };

        let mut name_only = self.name_only;
        if let Some(ref filter) = self.filter {
            if name_only && filter.keys().any(|k| k != "name") {
                name_only = false;
            }
            body.insert("filter", filter.clone());
        }
        body.insert("nameOnly", name_only);

        let mut cursor = Document::new();
        if let Some(batch_size) = self.batch_sizing().initial_batch_size() {
            cursor.insert("batchSize", batch_size_bson(batch_size)?);
        }
        body.insert("cursor", cursor);

        Ok(Command::new(Self::NAME, self.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let operation_time = response.operation_time();
        let response: CursorBody = response.body()?;
        Ok(CursorSpecification::new(
            response.cursor,
            self.batch_sizing(),
            None,
            None,
            operation_time,
        ))
    }
}
