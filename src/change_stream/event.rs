//! Contains the types related to a `ChangeStream` event.
use serde::{Deserialize, Serialize};

use crate::{
    bson::{Bson, Document, Timestamp},
    error::Error,
};

/// A position in a change stream. The server issues one as the `_id` of every event and as the
/// `postBatchResumeToken` of every batch.
///
/// Pass one to [`ChangeStreamOptions::resume_after`](crate::options::ChangeStreamOptions) or
/// `start_after` to pick up where an earlier stream left off.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(transparent)]
pub struct ResumeToken(pub(crate) Bson);

impl ResumeToken {
    pub(crate) fn from_document(doc: Option<Document>) -> Option<ResumeToken> {
        doc.map(|doc| ResumeToken(Bson::Document(doc)))
    }

    /// The token as a BSON value, as the server issued it.
    pub fn as_bson(&self) -> &Bson {
        &self.0
    }
}

impl From<Document> for ResumeToken {
    fn from(doc: Document) -> Self {
        ResumeToken(Bson::Document(doc))
    }
}

/// A [change event](https://www.mongodb.com/docs/manual/reference/change-events/) delivered by a
/// change stream.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamEvent<T> {
    /// This event's resume token.
    #[serde(rename = "_id")]
    pub id: ResumeToken,

    /// The kind of change.
    pub operation_type: OperationType,

    /// Where the change happened.
    pub ns: Option<ChangeNamespace>,

    /// The new name for the `ns` collection. Only included for `OperationType::Rename`.
    pub to: Option<ChangeNamespace>,

    /// The `_id` of the changed document, plus the shard key on sharded collections. Only set for
    /// CRUD events.
    pub document_key: Option<Document>,

    /// Only set for `update` events.
    pub update_description: Option<UpdateDescription>,

    /// The cluster time at which the change occurred.
    pub cluster_time: Option<Timestamp>,

    /// The document after the change. `update` events only carry it when the stream was opened
    /// with a [`full_document`](crate::options::ChangeStreamOptions::full_document) mode.
    pub full_document: Option<T>,

    /// Contains the pre-image of the modified or deleted document if the pre-image is available
    /// for the change event and `full_document_before_change` was set to an option other than
    /// `Off`.
    pub full_document_before_change: Option<T>,
}

/// The `updateDescription` of an `update` event.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct UpdateDescription {
    /// Changed fields and their new values.
    pub updated_fields: Document,

    /// Names of the fields that were unset.
    pub removed_fields: Vec<String>,

    /// Arrays that were truncated in the `Document`.
    pub truncated_arrays: Option<Vec<Document>>,
}

/// The `operationType` of a change event.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum OperationType {
    /// `"insert"`
    Insert,

    /// `"update"`
    Update,

    /// `"replace"`
    Replace,

    /// `"delete"`
    Delete,

    /// `"drop"`
    Drop,

    /// `"rename"`
    Rename,

    /// `"dropDatabase"`
    DropDatabase,

    /// `"invalidate"`
    Invalidate,

    /// An event type this version of the crate doesn't know about.
    #[serde(other)]
    Other,
}

/// The `ns` field of a change event.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[non_exhaustive]
pub struct ChangeNamespace {
    /// The name of the database in which the change occurred.
    pub db: String,

    /// The name of the collection in which the change occurred. Absent for database-level
    /// events.
    pub coll: Option<String>,
}

/// Lifecycle notifications a [`ChangeStream`](crate::change_stream::ChangeStream) delivers to
/// the handler configured with
/// [`ChangeStreamOptions::notification_handler`](crate::options::ChangeStreamOptions::notification_handler).
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum ChangeStreamNotification {
    /// The stream's resume token changed to the contained value.
    ResumeTokenChanged(ResumeToken),

    /// The stream recovered from `error` by re-issuing its `aggregate`.
    #[non_exhaustive]
    Resumed {
        /// The resumable error that interrupted the stream.
        error: Error,
    },

    /// The stream failed with an error it could not recover from. A `Closed` notification
    /// follows.
    Error(Error),

    /// The stream was closed, either explicitly or after an unrecoverable error.
    Closed,
}
