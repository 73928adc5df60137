//! Contains the `Error` and `Result` types that `mongodb_cursor_core` uses.

use std::{collections::HashSet, fmt, sync::Arc};

use serde::Deserialize;
use thiserror::Error;

use crate::{bson::Document, results::BulkWriteResult};

const RECOVERING_CODES: [i32; 5] = [11600, 11602, 13436, 189, 91];
const NOTWRITABLEPRIMARY_CODES: [i32; 3] = [10107, 13435, 10058];
const RESUMABLE_CODES: [i32; 17] = [
    6, 7, 89, 91, 189, 262, 9001, 10107, 11600, 11602, 13435, 13436, 63, 150, 13388, 234, 133,
];

pub(crate) const CURSOR_NOT_FOUND_CODE: i32 = 43;
pub(crate) const CURSOR_KILLED_CODE: i32 = 237;

/// Servers 4.4+ attach this label to errors that a change stream may resume from.
pub const RESUMABLE_CHANGE_STREAM_ERROR: &str = "ResumableChangeStreamError";

/// Errors carrying this label are never resumed from, regardless of their code.
pub const NON_RESUMABLE_CHANGE_STREAM_ERROR: &str = "NonResumableChangeStreamError";

/// The result type for all methods that can return an error in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// An error that can occur in this crate. The inner [`ErrorKind`] is boxed to keep `Result`s
/// small; the whole error is cheap to clone.
#[derive(Clone, Debug, Error)]
#[error("Kind: {kind}, labels: {labels:?}")]
#[non_exhaustive]
pub struct Error {
    /// The type of error that occurred.
    pub kind: Box<ErrorKind>,

    labels: HashSet<String>,

    /// The max wire version of the server that produced this error, if known.
    pub(crate) wire_version: Option<i32>,
}

impl Error {
    pub(crate) fn new(kind: ErrorKind, labels: Option<impl IntoIterator<Item = String>>) -> Self {
        let mut labels: HashSet<String> = labels
            .map(|labels| labels.into_iter().collect())
            .unwrap_or_default();
        if let Some(wc) = kind.get_write_concern_error() {
            labels.extend(wc.labels.clone());
        }
        Self {
            kind: Box::new(kind),
            labels,
            wire_version: None,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        ErrorKind::InvalidArgument {
            message: message.into(),
        }
        .into()
    }

    pub(crate) fn invalid_response(message: impl Into<String>) -> Self {
        ErrorKind::InvalidResponse {
            message: message.into(),
        }
        .into()
    }

    /// Creates a network error that the transport can hand back when a connection fails.
    pub fn network(error: std::io::Error) -> Self {
        ErrorKind::Io(Arc::new(error)).into()
    }

    pub(crate) fn with_wire_version(mut self, wire_version: Option<i32>) -> Self {
        self.wire_version = wire_version;
        self
    }

    /// Whether this error was produced by the transport rather than by the server or the client.
    pub fn is_network_error(&self) -> bool {
        matches!(*self.kind, ErrorKind::Io(..))
    }

    /// Whether this error originated from the server.
    pub fn is_server_error(&self) -> bool {
        matches!(
            *self.kind,
            ErrorKind::Command(_) | ErrorKind::Write(_) | ErrorKind::BulkWrite(_)
        )
    }

    /// The server error code of this error, if it has one. For write errors the write concern
    /// error's code is used.
    pub fn code(&self) -> Option<i32> {
        match *self.kind {
            ErrorKind::Command(ref err) => Some(err.code),
            ErrorKind::Write(WriteFailure::WriteConcernError(ref err)) => Some(err.code),
            ErrorKind::Write(WriteFailure::WriteError(ref err)) => Some(err.code),
            ErrorKind::BulkWrite(ref failure) => {
                failure.write_concern_error.as_ref().map(|wce| wce.code)
            }
            _ => None,
        }
    }

    fn code_and_message(&self) -> Option<(i32, &str)> {
        match *self.kind {
            ErrorKind::Command(ref err) => Some((err.code, err.message.as_str())),
            ErrorKind::Write(WriteFailure::WriteConcernError(ref err)) => {
                Some((err.code, err.message.as_str()))
            }
            ErrorKind::BulkWrite(ref failure) => failure
                .write_concern_error
                .as_ref()
                .map(|wce| (wce.code, wce.message.as_str())),
            _ => None,
        }
    }

    /// If this error corresponds to a "not writable primary" error.
    pub fn is_not_writable_primary(&self) -> bool {
        self.code_and_message()
            .map(|(code, message)| is_not_writable_primary(code, message))
            .unwrap_or(false)
    }

    /// If this error corresponds to a "node is recovering" error.
    pub fn is_recovering(&self) -> bool {
        self.code_and_message()
            .map(|(code, message)| is_recovering(code, message))
            .unwrap_or(false)
    }

    /// Whether a change stream may transparently resume after encountering this error on a
    /// `getMore`.
    pub(crate) fn is_resumable(&self) -> bool {
        if self.contains_label(NON_RESUMABLE_CHANGE_STREAM_ERROR) {
            return false;
        }
        if !self.is_server_error() {
            return self.is_network_error();
        }
        let code = self.code();
        if code == Some(CURSOR_NOT_FOUND_CODE) {
            return true;
        }
        match self.wire_version {
            Some(version) if version >= 9 => self.contains_label(RESUMABLE_CHANGE_STREAM_ERROR),
            _ => {
                self.contains_label(RESUMABLE_CHANGE_STREAM_ERROR)
                    || code.map(|c| RESUMABLE_CODES.contains(&c)).unwrap_or(false)
                    || self.is_not_writable_primary()
                    || self.is_recovering()
            }
        }
    }

    /// Whether a server-side cursor is known to be gone after this error.
    pub(crate) fn is_cursor_gone(&self) -> bool {
        matches!(
            self.code(),
            Some(CURSOR_NOT_FOUND_CODE) | Some(CURSOR_KILLED_CODE)
        )
    }

    /// Returns the labels for this error.
    pub fn labels(&self) -> &HashSet<String> {
        &self.labels
    }

    /// Whether this error contains the specified label.
    pub fn contains_label<T: AsRef<str>>(&self, label: T) -> bool {
        self.labels.contains(label.as_ref())
    }
}

impl<E> From<E> for Error
where
    ErrorKind: From<E>,
{
    fn from(err: E) -> Self {
        Error::new(err.into(), None::<Option<String>>)
    }
}

impl From<std::io::Error> for ErrorKind {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

/// The types of errors that can occur.
#[allow(missing_docs)]
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid argument was provided. These are raised before anything reaches the wire.
    #[error("An invalid argument was provided: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// The server returned an error to an attempted operation.
    #[error("Command failed: {0}")]
    Command(CommandError),

    /// An error occurred when trying to execute a single-document write.
    #[error("An error occurred when trying to execute a write operation: {0:?}")]
    Write(WriteFailure),

    /// An error occurred when trying to execute a write operation consisting of multiple writes.
    #[error("An error occurred when trying to execute a write operation: {0:?}")]
    BulkWrite(BulkWriteFailure),

    /// A transport-level failure such as a connection reset or a socket timeout.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),

    /// The server returned an invalid reply to a database operation.
    #[error("The server returned an invalid reply to a database operation: {message}")]
    #[non_exhaustive]
    InvalidResponse { message: String },

    /// Wrapper around `bson::de::Error`.
    #[error("{0}")]
    BsonDeserialization(#[from] crate::bson::de::Error),

    /// Wrapper around `bson::ser::Error`.
    #[error("{0}")]
    BsonSerialization(#[from] crate::bson::ser::Error),

    /// A change stream document did not carry the `_id` needed to resume.
    #[error("Cannot provide resume functionality when the resume token is missing")]
    MissingResumeToken,

    /// An operation was attempted with a session that has already ended.
    #[error("Attempted to use a session that has already ended")]
    SessionEnded,

    /// The client has been shut down.
    #[error("Client has been shut down")]
    Shutdown,
}

impl ErrorKind {
    fn get_write_concern_error(&self) -> Option<&WriteConcernError> {
        match self {
            ErrorKind::BulkWrite(BulkWriteFailure {
                write_concern_error,
                ..
            }) => write_concern_error.as_ref(),
            ErrorKind::Write(WriteFailure::WriteConcernError(err)) => Some(err),
            _ => None,
        }
    }
}

fn is_not_writable_primary(code: i32, message: &str) -> bool {
    if NOTWRITABLEPRIMARY_CODES.contains(&code) {
        return true;
    } else if is_recovering(code, message) {
        return false;
    }
    message.contains("not master")
}

fn is_recovering(code: i32, message: &str) -> bool {
    if RECOVERING_CODES.contains(&code) {
        return true;
    }
    message.contains("not master or secondary") || message.contains("node is recovering")
}

/// An error that occurred due to a database command failing.
#[derive(Clone, Debug, Deserialize)]
#[non_exhaustive]
pub struct CommandError {
    /// Identifies the type of error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default)]
    pub message: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "Error code {} ({}): {}", self.code, self.code_name, self.message)
    }
}

/// An error that occurred due to not being able to satisfy a write concern.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[non_exhaustive]
pub struct WriteConcernError {
    /// Identifies the type of write concern error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: String,

    /// A description of the error that occurred.
    #[serde(alias = "errmsg", default)]
    pub message: String,

    /// A document identifying the write concern setting related to the error.
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,

    /// The error labels that the server returned.
    #[serde(rename = "errorLabels", default)]
    pub labels: Vec<String>,
}

/// An error that occurred during a single-document write that wasn't due to being unable to
/// satisfy a write concern.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct WriteError {
    /// Identifies the type of write error.
    pub code: i32,

    /// The name associated with the error code.
    pub code_name: Option<String>,

    /// A description of the error that occurred.
    pub message: String,

    /// A document providing more information about the write error (e.g. details pertaining to
    /// document validation).
    pub details: Option<Document>,
}

/// An error that occurred during a write operation consisting of multiple writes that wasn't due to
/// being unable to satisfy a write concern.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[non_exhaustive]
pub struct BulkWriteError {
    /// Index into the list of operations that this error corresponds to. This is always the index
    /// into the list the caller supplied, not into a batch sent to the server.
    #[serde(default)]
    pub index: usize,

    /// Identifies the type of write error.
    pub code: i32,

    /// The name associated with the error code.
    #[serde(rename = "codeName", default)]
    pub code_name: Option<String>,

    /// A description of the error that occurred.
    #[serde(rename = "errmsg", default)]
    pub message: String,

    /// A document providing more information about the write error.
    #[serde(rename = "errInfo")]
    pub details: Option<Document>,
}

/// The set of errors that occurred during a write operation.
#[derive(Clone, Debug, Default)]
#[non_exhaustive]
pub struct BulkWriteFailure {
    /// The error(s) that occurred on account of a non write concern failure, sorted by index.
    pub write_errors: Vec<BulkWriteError>,

    /// The error that occurred on account of write concern failure.
    pub write_concern_error: Option<WriteConcernError>,

    /// The writes that did succeed before or alongside the failures.
    pub partial_result: Option<BulkWriteResult>,
}

/// An error that occurred when trying to execute a write operation.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum WriteFailure {
    /// An error that occurred due to not being able to satisfy a write concern.
    WriteConcernError(WriteConcernError),

    /// An error that occurred during a write operation that wasn't due to being unable to satisfy a
    /// write concern.
    WriteError(WriteError),
}

impl WriteFailure {
    fn from_bulk_failure(bulk: BulkWriteFailure) -> Result<Self> {
        if let Some(bulk_write_error) = bulk.write_errors.into_iter().next() {
            let write_error = WriteError {
                code: bulk_write_error.code,
                code_name: bulk_write_error.code_name,
                message: bulk_write_error.message,
                details: bulk_write_error.details,
            };
            Ok(WriteFailure::WriteError(write_error))
        } else if let Some(wc_error) = bulk.write_concern_error {
            Ok(WriteFailure::WriteConcernError(wc_error))
        } else {
            Err(Error::invalid_response(
                "error missing write errors and write concern errors",
            ))
        }
    }
}

/// Translates `ErrorKind::BulkWrite` cases to `ErrorKind::Write`, leaving all other errors
/// untouched.
pub(crate) fn convert_bulk_errors(error: Error) -> Error {
    match *error.kind {
        ErrorKind::BulkWrite(ref bulk_failure) => {
            match WriteFailure::from_bulk_failure(bulk_failure.clone()) {
                Ok(failure) => Error::new(ErrorKind::Write(failure), Some(error.labels)),
                Err(e) => e,
            }
        }
        _ => error,
    }
}
