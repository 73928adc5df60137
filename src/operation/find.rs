use crate::{
    bson::{doc, Document},
    cursor::{BatchSizing, CursorSpecification},
    error::Result,
    operation::{
        append_options,
        batch_size_bson,
        CursorBody,
        OperationWithDefaults,
        SERVER_4_4_0_WIRE_VERSION,
    },
    options::{CursorType, FindOptions},
    transport::{
        command::{Command, RawCommandResponse},
        StreamDescription,
    },
    Namespace,
};

#[derive(Debug, Clone)]
pub(crate) struct Find {
    ns: Namespace,
    filter: Document,
    options: Option<Box<FindOptions>>,
}

impl Find {
    pub(crate) fn new(ns: Namespace, filter: Document, options: Option<FindOptions>) -> Self {
        Self {
            ns,
            filter,
            options: options.map(Box::new),
        }
    }

    fn batch_sizing(&self) -> BatchSizing {
        BatchSizing::new(
            self.options.as_ref().and_then(|o| o.batch_size),
            self.options.as_ref().and_then(|o| o.limit),
        )
    }

    pub(crate) fn set_batch_size(&mut self, batch_size: i32) {
        self.options
            .get_or_insert_with(Default::default)
            .batch_size = Some(batch_size);
    }

    pub(crate) fn has_read_concern(&self) -> bool {
        self.options
            .as_ref()
            .map_or(false, |o| o.read_concern.is_some())
    }
}

impl OperationWithDefaults for Find {
    type O = CursorSpecification;
    const NAME: &'static str = "find";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        let mut body = doc! {
            Self::NAME: self.ns.coll.clone(),
            "filter": self.filter.clone(),
        };

        let sizing = self.batch_sizing();
        if let Some(ref options) = self.options {
            match options.cursor_type {
                Some(CursorType::Tailable) => {
                    body.insert("tailable", true);
                }
                Some(CursorType::TailableAwait) => {
                    body.insert("tailable", true);
                    body.insert("awaitData", true);
                }
                _ => {}
            };
        }

        append_options(&mut body, self.options.as_ref())?;

        if let Some(limit) = sizing.limit {
            body.insert("limit", limit);
        }
        if let Some(batch_size) = sizing.initial_batch_size() {
            body.insert("batchSize", batch_size_bson(batch_size)?);
        }
        if sizing.wire_single_batch {
            body.insert("singleBatch", true);
        }

        Ok(Command::new(Self::NAME, self.ns.db.clone(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O> {
        let operation_time = response.operation_time();
        let response: CursorBody = response.body()?;

        // The comment should only be propagated to getMore calls on 4.4+.
        let comment = if description.wire_version_at_least(SERVER_4_4_0_WIRE_VERSION) {
            self.options.as_ref().and_then(|opts| opts.comment.clone())
        } else {
            None
        };

        Ok(CursorSpecification::new(
            response.cursor,
            self.batch_sizing(),
            self.options.as_ref().and_then(|opts| opts.max_await_time),
            comment,
            operation_time,
        ))
    }

    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        true
    }
}
