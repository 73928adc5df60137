mod aggregate;
mod end_sessions;
mod explain;
mod find;
mod get_more;
mod kill_cursors;
mod list_collections;
mod run_command;
mod write;

use std::{collections::VecDeque, fmt::Debug};

use serde::{Deserialize, Serialize};

use crate::{
    bson::{self, Document},
    concern::WriteConcern,
    error::{BulkWriteError, CommandError, Error, ErrorKind, Result, WriteConcernError},
    transport::{
        command::{Command, RawCommandResponse},
        StreamDescription,
    },
    Namespace,
};

pub(crate) use aggregate::{Aggregate, AggregateTarget};
pub(crate) use end_sessions::{EndSessions, MAX_END_SESSIONS_BATCH_SIZE};
pub(crate) use explain::Explain;
pub(crate) use find::Find;
pub(crate) use get_more::GetMore;
pub(crate) use kill_cursors::KillCursors;
pub(crate) use list_collections::ListCollections;
pub(crate) use run_command::RunCommand;
pub(crate) use write::{WriteCommand, WriteCommandKind, WriteCommandResponse};

pub(crate) const SERVER_4_0_0_WIRE_VERSION: i32 = 7;
pub(crate) const SERVER_4_4_0_WIRE_VERSION: i32 = 9;

/// A trait modeling the behavior of a server side operation.
///
/// No methods in this trait should have default behaviors to ensure that wrapper operations
/// replicate all behavior.  Default behavior is provided by the `OperationWithDefaults` trait.
pub(crate) trait Operation {
    /// The output type of this operation.
    type O;

    /// Returns the command that should be sent to the server as part of this operation.
    /// The operation may store some additional state that is required for handling the response.
    fn build(&mut self, description: &StreamDescription) -> Result<Command>;

    /// Interprets the server response to the command.
    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O>;

    /// Interpret an error encountered while sending the built command to the server, potentially
    /// recovering.
    fn handle_error(&self, error: Error) -> Result<Self::O>;

    /// Whether or not this operation will request acknowledgment from the server.
    fn is_acknowledged(&self) -> bool;

    /// The write concern to use for this operation, if any.
    fn write_concern(&self) -> Option<&WriteConcern>;

    /// Returns whether or not this command supports the `readConcern` field.
    fn supports_read_concern(&self, description: &StreamDescription) -> bool;

    /// Whether this operation supports sessions or not.
    fn supports_sessions(&self) -> bool;
}

/// A response body useful for deserializing command errors.
#[derive(Deserialize, Debug)]
pub(crate) struct CommandErrorBody {
    #[serde(rename = "errorLabels")]
    pub(crate) error_labels: Option<Vec<String>>,

    #[serde(flatten)]
    pub(crate) command_error: CommandError,
}

impl From<CommandErrorBody> for Error {
    fn from(command_error_response: CommandErrorBody) -> Error {
        Error::new(
            ErrorKind::Command(command_error_response.command_error),
            command_error_response.error_labels,
        )
    }
}

/// Appends a serializable struct to the input document. The serializable struct MUST serialize to a
/// Document; otherwise, an error will be thrown.
pub(crate) fn append_options<T: Serialize + Debug>(
    doc: &mut Document,
    options: Option<&T>,
) -> Result<()> {
    if let Some(options) = options {
        let options_doc = bson::to_document(options)?;
        doc.extend(options_doc);
    }
    Ok(())
}

/// Converts a batch size to the `Int32` servers expect.
pub(crate) fn batch_size_bson(batch_size: u32) -> Result<i32> {
    i32::try_from(batch_size)
        .map_err(|_| Error::invalid_argument("The batch size must fit into a signed 32-bit integer"))
}

#[derive(Debug, Deserialize)]
pub(crate) struct CursorBody {
    pub(crate) cursor: CursorInfo,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CursorInfo {
    pub(crate) id: i64,

    pub(crate) ns: Namespace,

    #[serde(default)]
    pub(crate) first_batch: VecDeque<Document>,

    pub(crate) post_batch_resume_token: Option<Document>,
}

/// Body of a write response: the counts, per-statement errors and write concern error that the
/// `insert`, `update` and `delete` commands report.
#[derive(Deserialize, Debug, Default)]
pub(crate) struct WriteResponseBody {
    #[serde(default)]
    pub(crate) n: u64,

    #[serde(rename = "nModified", default)]
    pub(crate) n_modified: u64,

    #[serde(default)]
    pub(crate) upserted: Vec<UpsertedId>,

    #[serde(rename = "writeErrors", default)]
    pub(crate) write_errors: Vec<BulkWriteError>,

    #[serde(rename = "writeConcernError")]
    pub(crate) write_concern_error: Option<WriteConcernError>,

    #[serde(rename = "errorLabels")]
    pub(crate) labels: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Clone)]
pub(crate) struct UpsertedId {
    pub(crate) index: usize,

    #[serde(rename = "_id")]
    pub(crate) id: bson::Bson,
}

macro_rules! remove_empty_write_concern {
    ($opts:expr) => {
        if let Some(ref mut options) = $opts {
            if let Some(ref write_concern) = options.write_concern {
                if write_concern.is_empty() {
                    options.write_concern = None;
                }
            }
        }
    };
}

pub(crate) use remove_empty_write_concern;

// A mirror of the `Operation` trait, with default behavior where appropriate.  Should only be
// implemented by operation types that do not delegate to other operations.
pub(crate) trait OperationWithDefaults {
    /// The output type of this operation.
    type O;

    /// The name of the server side command associated with this operation.
    const NAME: &'static str;

    /// Returns the command that should be sent to the server as part of this operation.
    /// The operation may store some additional state that is required for handling the response.
    fn build(&mut self, description: &StreamDescription) -> Result<Command>;

    /// Interprets the server response to the command.
    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O>;

    /// Interpret an error encountered while sending the built command to the server, potentially
    /// recovering.
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        Err(error)
    }

    /// Whether or not this operation will request acknowledgment from the server.
    fn is_acknowledged(&self) -> bool {
        self.write_concern()
            .map(WriteConcern::is_acknowledged)
            .unwrap_or(true)
    }

    /// The write concern to use for this operation, if any.
    fn write_concern(&self) -> Option<&WriteConcern> {
        None
    }

    /// Returns whether or not this command supports the `readConcern` field.
    fn supports_read_concern(&self, _description: &StreamDescription) -> bool {
        false
    }

    /// Whether this operation supports sessions or not.
    fn supports_sessions(&self) -> bool {
        true
    }
}

impl<T: OperationWithDefaults> Operation for T {
    type O = T::O;
    fn build(&mut self, description: &StreamDescription) -> Result<Command> {
        self.build(description)
    }
    fn handle_response(
        &self,
        response: RawCommandResponse,
        description: &StreamDescription,
    ) -> Result<Self::O> {
        self.handle_response(response, description)
    }
    fn handle_error(&self, error: Error) -> Result<Self::O> {
        self.handle_error(error)
    }
    fn is_acknowledged(&self) -> bool {
        self.is_acknowledged()
    }
    fn write_concern(&self) -> Option<&WriteConcern> {
        self.write_concern()
    }
    fn supports_read_concern(&self, description: &StreamDescription) -> bool {
        self.supports_read_concern(description)
    }
    fn supports_sessions(&self) -> bool {
        self.supports_sessions()
    }
}
