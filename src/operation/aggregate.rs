use std::collections::VecDeque;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    concern::WriteConcern,
    cursor::{BatchSizing, CursorSpecification},
    error::{Error, Result},
    operation::{
        append_options,
        batch_size_bson,
        remove_empty_write_concern,
        CursorBody,
        CursorInfo,
        OperationWithDefaults,
        SERVER_4_4_0_WIRE_VERSION,
    },
    options::AggregateOptions,
    transport::{
        command::{Command, RawCommandResponse},
        StreamDescription,
    },
    Namespace,
};

#[derive(Debug, Clone)]
pub(crate) struct Aggregate {
    target: AggregateTarget,
    pipeline: Vec<Document>,
    options: Option<AggregateOptions>,
}

impl Aggregate {
    pub(crate) fn new(
        target: impl Into<AggregateTarget>,
        pipeline: impl IntoIterator<Item = Document>,
        mut options: Option<AggregateOptions>,
    ) -> Self {
        remove_empty_write_concern!(options);
        Self {
            target: target.into(),
            pipeline: pipeline.into_iter().collect(),
            options,
        }
    }

    /// Rejects option combinations the server would refuse, before anything is sent.
    pub(crate) fn validate(&self) -> Result<()> {
        let options = match self.options {
            Some(ref options) => options,
            None => return Ok(()),
        };
        if options.explain == Some(true) {
            if options.read_concern.is_some() {
                return Err(Error::invalid_argument(
                    "explain cannot be combined with a read concern",
                ));
            }
            if options.write_concern.is_some() {
                return Err(Error::invalid_argument(
                    "explain cannot be combined with a write concern",
                ));
            }
            if self.is_out_or_merge() {
                return Err(Error::invalid_argument(
                    "explain cannot be combined with a $out or $merge stage",
                ));
            }
        }
        if let Some(ref write_concern) = options.write_concern {
            write_concern.validate()?;
        }
        Ok(())
    }

    fn is_explain(&self) -> bool {
        self.options.as_ref().and_then(|o| o.explain) == Some(true)
    }

    fn batch_sizing(&self) -> BatchSizing {
        BatchSizing::from_batch_size(self.options.as_ref().and_then(|o| o.batch_size))
    }

    pub(crate) fn set_batch_size(&mut self, batch_size: u32) {
        self.options
            .get_or_insert_with(Default::default)
            .batch_size = Some(batch_size);
    }

    pub(crate) fn has_read_or_write_concern(&self) -> bool {
        self.options
            .as_ref()
            .map_or(false, |o| o.read_concern.is_some() || o.write_concern.is_some())
    }

    /// Returns whether this is a $out or $merge aggregation operation.
    pub(crate) fn is_out_or_merge(&self) -> bool {
        self.pipeline
            .last()
            .map(|stage| {
                let stage = bson_util::first_key(stage);
                stage == Some("$out") || stage == Some("$merge")
            })
            .unwrap_or(false)
    }
}

impl OperationWithDefaults for Aggregate {
    type O = CursorSpecification;
    const NAME: &'static str = "aggregate";

    fn build(&mut self, _description: &StreamDescription) -> Result<Command> {
        self.validate()?;

        let mut body = doc! {
            Self::NAME: self.target.to_bson(),
            "pipeline": bson_util::to_bson_array(&self.pipeline),
        };

        append_options(&mut body, self.options.as_ref())?;

        if !self.is_explain() {
            let mut cursor = Document::new();
            if let Some(batch_size) = self.batch_sizing().initial_batch_size() {
                if !self.is_out_or_merge() {
                    cursor.insert("batchSize", batch_size_bson(batch_size)?);
                }
            }
            body.insert("cursor", cursor);
        }

        if !self.is_out_or_merge() {
            body.remove("writeConcern");
        }

        Ok(Command::new(Self::NAME, self.target.db_name(), body))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O> {
        let operation_time = response.operation_time();

        if self.is_explain() {
            let explained = CursorInfo {
                id: 0,
                ns: self.target.namespace(),
                first_batch: VecDeque::from(vec![response.into_document()]),
                post_batch_resume_token: None,
            };
            return Ok(CursorSpecification::new(
                explained,
                BatchSizing::default(),
                None,
                None,
                operation_time,
            ));
        }

        let cursor_response: CursorBody = response.body()?;

        // The comment should only be propagated to getMore calls on 4.4+.
        let comment = if description.wire_version_at_least(SERVER_4_4_0_WIRE_VERSION) {
            self.options.as_ref().and_then(|opts| opts.comment.clone())
        } else {
            None
        };

        Ok(CursorSpecification::new(
            cursor_response.cursor,
            self.batch_sizing(),
            self.options.as_ref().and_then(|opts| opts.max_await_time),
            comment,
            operation_time,
        ))
    }

    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        true
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        if !self.is_out_or_merge() {
            return None;
        }
        self.options
            .as_ref()
            .and_then(|opts| opts.write_concern.as_ref())
    }
}

#[derive(Clone, Debug)]
pub(crate) enum AggregateTarget {
    Database(String),
    Collection(Namespace),
}

impl AggregateTarget {
    fn to_bson(&self) -> Bson {
        match self {
            AggregateTarget::Database(_) => Bson::Int32(1),
            AggregateTarget::Collection(ref ns) => Bson::String(ns.coll.to_string()),
        }
    }

    pub(crate) fn db_name(&self) -> &str {
        match self {
            AggregateTarget::Database(ref s) => s.as_str(),
            AggregateTarget::Collection(ref ns) => ns.db.as_str(),
        }
    }

    fn namespace(&self) -> Namespace {
        match self {
            AggregateTarget::Database(ref db) => Namespace::new(db.as_str(), "$cmd.aggregate"),
            AggregateTarget::Collection(ref ns) => ns.clone(),
        }
    }
}

impl From<Namespace> for AggregateTarget {
    fn from(ns: Namespace) -> Self {
        AggregateTarget::Collection(ns)
    }
}

impl From<String> for AggregateTarget {
    fn from(db_name: String) -> Self {
        AggregateTarget::Database(db_name)
    }
}
