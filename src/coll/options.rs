use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::{Bson, Document},
    bson_util::serialize_duration_option_as_int_millis,
    concern::{ReadConcern, WriteConcern},
};

/// Defaults for a [`Collection`](crate::Collection) created with
/// [`Database::collection_with_options`](crate::Database::collection_with_options). Unset fields
/// fall back to the database's.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CollectionOptions {
    /// The default read concern for operations.
    pub read_concern: Option<ReadConcern>,

    /// The default write concern for operations.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the index to use for an operation.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum Hint {
    /// Specifies the keys of the index to use.
    Keys(Document),
    /// Specifies the name of the index to use.
    Name(String),
}

/// Specifies the type of cursor to return from a find operation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[non_exhaustive]
pub enum CursorType {
    /// The server closes the cursor once the last result has been returned.
    NonTailable,

    /// The cursor stays open at the end of a capped collection and picks up documents inserted
    /// later.
    Tailable,

    /// A tailable cursor whose `getMore`s wait up to `max_await_time` for new documents.
    TailableAwait,
}

/// The level of detail to request from the server when explaining a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ExplainVerbosity {
    /// Only the winning plan.
    QueryPlanner,

    /// The winning plan and its execution statistics.
    ExecutionStats,

    /// Execution statistics for every candidate plan.
    AllPlansExecution,
}

impl ExplainVerbosity {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::QueryPlanner => "queryPlanner",
            Self::ExecutionStats => "executionStats",
            Self::AllPlansExecution => "allPlansExecution",
        }
    }
}

/// Specifies the options to a [`Collection::insert_one`](crate::Collection::insert_one)
/// operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct InsertOneOptions {
    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// The write concern for the operation.
    pub write_concern: Option<WriteConcern>,

    /// An arbitrary value that shows up next to the command in the profiler and server logs.
    pub comment: Option<Bson>,
}

/// Specifies the options to a [`Collection::insert_many`](crate::Collection::insert_many)
/// operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct InsertManyOptions {
    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// Stop at the first failed insert. Defaults to true.
    pub ordered: Option<bool>,

    /// The write concern for the operation.
    #[serde(skip_deserializing)]
    pub write_concern: Option<WriteConcern>,

    /// An arbitrary value that shows up next to the command in the profiler and server logs.
    pub comment: Option<Bson>,
}

/// Specifies the options to a [`Collection::bulk_write`](crate::Collection::bulk_write)
/// operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct BulkWriteOptions {
    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// If true, models are executed in the order given and the first failing write stops the
    /// batch. If false, the server may execute them in any order and every model is attempted.
    ///
    /// Defaults to true.
    pub ordered: Option<bool>,

    /// The write concern for the operation.
    #[serde(skip_deserializing)]
    pub write_concern: Option<WriteConcern>,

    /// An arbitrary value that shows up next to the command in the profiler and server logs.
    pub comment: Option<Bson>,
}

impl From<InsertOneOptions> for BulkWriteOptions {
    fn from(options: InsertOneOptions) -> Self {
        Self {
            bypass_document_validation: options.bypass_document_validation,
            ordered: None,
            write_concern: options.write_concern,
            comment: options.comment,
        }
    }
}

impl From<InsertManyOptions> for BulkWriteOptions {
    fn from(options: InsertManyOptions) -> Self {
        Self {
            bypass_document_validation: options.bypass_document_validation,
            ordered: options.ordered,
            write_concern: options.write_concern,
            comment: options.comment,
        }
    }
}

/// Specifies the options to a [`Collection::aggregate`](crate::Collection::aggregate) or
/// [`Database::aggregate`](crate::Database::aggregate) operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AggregateOptions {
    /// Let stages spill to temporary files on the server.
    pub allow_disk_use: Option<bool>,

    /// Documents requested per batch. Zero asks for an empty first batch; later `getMore`s then
    /// leave the batch size to the server.
    #[serde(skip_serializing)]
    pub batch_size: Option<u32>,

    /// Opt out of document-level validation.
    pub bypass_document_validation: Option<bool>,

    /// The collation to use for the operation.
    pub collation: Option<Document>,

    /// An arbitrary value attached to the command, and on 4.4+ servers to every `getMore` of the
    /// resulting cursor.
    pub comment: Option<Bson>,

    /// Return the server's query plan instead of a cursor over the results. Cannot be combined
    /// with a read or write concern.
    pub explain: Option<bool>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The `maxTimeMS` sent with each `getMore` of the resulting cursor.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// Server-side time limit for the command, sent as `maxTimeMS`.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serialize_duration_option_as_int_millis",
        skip_deserializing
    )]
    pub max_time: Option<Duration>,

    /// Falls back to the collection's (or database's) read concern when unset.
    pub read_concern: Option<ReadConcern>,

    /// The write concern to use for the operation. Only sent when the pipeline ends with `$out`
    /// or `$merge`.
    ///
    /// Falls back to the collection's (or database's) write concern when unset.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a [`Collection::find`](crate::Collection::find) operation.
#[skip_serializing_none]
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder, Serialize)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct FindOptions {
    /// Let the server spill large sorts to temporary files. Requires a 4.4+ server.
    pub allow_disk_use: Option<bool>,

    /// Return whatever a sharded cluster can answer when some shards are unreachable.
    pub allow_partial_results: Option<bool>,

    /// The number of documents the server should return per cursor batch.
    ///
    /// A negative batch size asks for at most its absolute value of documents in a single batch,
    /// after which the cursor is closed. A batch size of zero is treated the same way, with the
    /// server's default batch size.
    #[serde(skip)]
    pub batch_size: Option<i32>,

    /// An arbitrary value that shows up next to the command in the profiler and server logs.
    pub comment: Option<Bson>,

    /// The type of cursor to return.
    #[serde(skip)]
    pub cursor_type: Option<CursorType>,

    /// The index to use for the operation.
    pub hint: Option<Hint>,

    /// The maximum number of documents to return. A negative limit returns at most its absolute
    /// value of documents in a single batch.
    #[serde(skip)]
    pub limit: Option<i64>,

    /// The exclusive upper bound for a specific index.
    pub max: Option<Document>,

    /// How long each `getMore` of a tailable await cursor waits for new documents.
    #[serde(skip)]
    pub max_await_time: Option<Duration>,

    /// Server-side time limit for the command, sent as `maxTimeMS`.
    #[serde(
        rename = "maxTimeMS",
        serialize_with = "serialize_duration_option_as_int_millis",
        skip_deserializing
    )]
    pub max_time: Option<Duration>,

    /// The inclusive lower bound for a specific index.
    pub min: Option<Document>,

    /// Whether the server should close the cursor after a period of inactivity.
    pub no_cursor_timeout: Option<bool>,

    /// Limits the fields of the document being returned.
    pub projection: Option<Document>,

    /// The read concern to use for this find query.
    ///
    /// If none specified, the default set on the collection will be used.
    pub read_concern: Option<ReadConcern>,

    /// Whether to return only the index keys in the documents.
    pub return_key: Option<bool>,

    /// Whether to return the record identifier for each document.
    pub show_record_id: Option<bool>,

    /// The number of documents to skip before counting.
    pub skip: Option<u64>,

    /// The order of the documents for the purposes of the operation.
    pub sort: Option<Document>,

    /// The collation to use for the operation.
    pub collation: Option<Document>,
}
