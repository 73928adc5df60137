use serde::Serialize;
use serde_with::skip_serializing_none;

use crate::{
    bson::{doc, Bson, Document},
    bson_util,
    concern::WriteConcern,
    error::{BulkWriteError, Error, Result, WriteConcernError},
    operation::{append_options, OperationWithDefaults, UpsertedId, WriteResponseBody},
    transport::{
        command::{Command, RawCommandResponse},
        StreamDescription,
    },
    Namespace,
};

/// The three write commands a batch of write models is split into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) enum WriteCommandKind {
    Insert,
    Update,
    Delete,
}

impl WriteCommandKind {
    pub(crate) fn command_name(self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    fn payload_field(self) -> &'static str {
        match self {
            Self::Insert => "documents",
            Self::Update => "updates",
            Self::Delete => "deletes",
        }
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteCommandOptions {
    ordered: bool,
    bypass_document_validation: Option<bool>,
    write_concern: Option<WriteConcern>,
    comment: Option<Bson>,
}

/// A single `insert`, `update` or `delete` command carrying one or more statements.
#[derive(Debug)]
pub(crate) struct WriteCommand {
    ns: Namespace,
    kind: WriteCommandKind,
    statements: Vec<Document>,
    options: WriteCommandOptions,
}

impl WriteCommand {
    pub(crate) fn new(
        ns: Namespace,
        kind: WriteCommandKind,
        statements: Vec<Document>,
        ordered: bool,
        write_concern: Option<WriteConcern>,
        bypass_document_validation: Option<bool>,
        comment: Option<Bson>,
    ) -> Self {
        Self {
            ns,
            kind,
            statements,
            options: WriteCommandOptions {
                ordered,
                bypass_document_validation,
                write_concern: write_concern.filter(|wc| !wc.is_empty()),
                comment,
            },
        }
    }
}

/// The outcome of one write command, before it's merged into a bulk write result.
#[derive(Debug, Default)]
pub(crate) struct WriteCommandResponse {
    pub(crate) n: u64,
    pub(crate) n_modified: u64,
    pub(crate) upserted: Vec<UpsertedId>,
    pub(crate) write_errors: Vec<BulkWriteError>,
    pub(crate) write_concern_error: Option<WriteConcernError>,
    pub(crate) labels: Vec<String>,
}

impl OperationWithDefaults for WriteCommand {
    type O = WriteCommandResponse;

    // The actual command name depends on the kind; see `name`.
    const NAME: &'static str = "$genericWrite";

    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        if self.statements.is_empty() {
            return Err(Error::invalid_argument("a write command requires statements"));
        }
        if let Some(ref write_concern) = self.options.write_concern {
            write_concern.validate()?;
        }
        if self.kind == WriteCommandKind::Insert {
            for document in &self.statements {
                let size = crate::bson::to_vec(document)?.len();
                if size as i64 > description.max_bson_object_size {
                    return Err(Error::invalid_argument(format!(
                        "insert document must be within {} bytes, but document provided is {} \
                         bytes",
                        description.max_bson_object_size, size
                    )));
                }
            }
        }

        let mut body = doc! {
            self.kind.command_name(): self.ns.coll.clone(),
            self.kind.payload_field(): bson_util::to_bson_array(&self.statements),
        };
        append_options(&mut body, Some(&self.options))?;

        Ok(Command::new(
            self.kind.command_name(),
            self.ns.db.clone(),
            body,
        ))
    }

    fn handle_response(
        &self,
        response: RawCommandResponse,
        _description: &StreamDescription,
    ) -> Result<Self::O> {
        let body: WriteResponseBody = response.body()?;
        Ok(WriteCommandResponse {
            n: body.n,
            n_modified: body.n_modified,
            upserted: body.upserted,
            write_errors: body.write_errors,
            write_concern_error: body.write_concern_error,
            labels: body.labels.unwrap_or_default(),
        })
    }

    fn write_concern(&self) -> Option<&WriteConcern> {
        self.options.write_concern.as_ref()
    }
}
