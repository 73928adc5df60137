//! Options for opening a change stream.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document, Timestamp},
    change_stream::event::{ChangeStreamNotification, ResumeToken},
    concern::ReadConcern,
    event::EventHandler,
    options::AggregateOptions,
};

/// Options for [`watch`](crate::Collection::watch) and its database and client counterparts.
///
/// The fields that belong in the `$changeStream` stage are serialized into it directly. The
/// rest configure the `aggregate` and `getMore` commands and are re-applied on every resume.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, Serialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ChangeStreamOptions {
    /// Whether update events carry the current version of the changed document in
    /// [`ChangeStreamEvent::full_document`](crate::change_stream::event::ChangeStreamEvent).
    pub full_document: Option<FullDocumentType>,

    /// Whether events carry the pre-image of the changed document.
    pub full_document_before_change: Option<FullDocumentBeforeChangeType>,

    /// Start returning events after the one this token identifies. Cannot be combined with
    /// `start_after`.
    pub resume_after: Option<ResumeToken>,

    /// Start returning events that happened at or after this cluster time.
    pub start_at_operation_time: Option<Timestamp>,

    /// Like `resume_after`, but also accepts the token of an `invalidate` event so a stream can
    /// continue past a collection drop or rename. Used only until the first event is delivered;
    /// later resumes use `resumeAfter`.
    pub start_after: Option<ResumeToken>,

    /// Set for streams started with [`Client::watch`](crate::Client::watch).
    #[builder(setter(skip))]
    pub(crate) all_changes_for_cluster: Option<bool>,

    /// The `maxTimeMS` sent with every `getMore`.
    #[serde(skip_serializing)]
    pub max_await_time: Option<Duration>,

    /// Documents requested per batch.
    #[serde(skip_serializing)]
    pub batch_size: Option<u32>,

    /// Collation for the underlying `aggregate`.
    #[serde(skip_serializing)]
    pub collation: Option<Document>,

    /// Defaults to the read concern of the client, database or collection the stream was
    /// started from.
    #[serde(skip_serializing)]
    pub read_concern: Option<ReadConcern>,

    /// Ask the server for the expanded set of event types (DDL events and the like).
    pub show_expanded_events: Option<bool>,

    /// An arbitrary value attached to the `aggregate` and, on 4.4+ servers, to each `getMore`.
    #[serde(skip_serializing)]
    pub comment: Option<Bson>,

    /// Receives the stream's lifecycle notifications: resume token changes, resumes, errors
    /// and closing.
    #[serde(skip)]
    #[builder(setter(strip_option))]
    pub notification_handler: Option<EventHandler<ChangeStreamNotification>>,
}

impl ChangeStreamOptions {
    pub(crate) fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions::builder()
            .batch_size(self.batch_size)
            .collation(self.collation.clone())
            .max_await_time(self.max_await_time)
            .read_concern(self.read_concern.clone())
            .comment(self.comment.clone())
            .build()
    }
}

/// Values of the `fullDocument` stage option.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum FullDocumentType {
    /// Look up the current version of the document for update events.
    UpdateLookup,

    /// Include the post-image when the collection records one.
    WhenAvailable,

    /// Include the post-image and fail if there is none.
    Required,

    /// A mode not listed above, sent as-is.
    #[serde(untagged)]
    Other(String),
}

/// Values of the `fullDocumentBeforeChange` stage option.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum FullDocumentBeforeChangeType {
    /// Include the pre-image when the collection records one.
    WhenAvailable,

    /// Include the pre-image and fail if there is none.
    Required,

    /// Never include a pre-image.
    Off,

    /// A mode not listed above, sent as-is.
    #[serde(untagged)]
    Other(String),
}
