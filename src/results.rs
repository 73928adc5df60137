//! Contains the types of results returned by write operations.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;

use crate::{
    bson::{Bson, Document},
    change_stream::event::ResumeToken,
};

/// The result of a [`Collection::insert_one`](../struct.Collection.html#method.insert_one)
/// operation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct InsertOneResult {
    /// The `_id` field of the document inserted.
    pub inserted_id: Bson,
}

impl InsertOneResult {
    pub(crate) fn from_bulk_result(result: BulkWriteResult) -> Self {
        Self {
            inserted_id: result.inserted_ids.get(&0).cloned().unwrap_or(Bson::Null),
        }
    }
}

/// The result of a [`Collection::insert_many`](../struct.Collection.html#method.insert_many)
/// operation.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct InsertManyResult {
    /// The `_id` field of the documents inserted, keyed by their index in the input.
    pub inserted_ids: HashMap<usize, Bson>,
}

impl InsertManyResult {
    pub(crate) fn from_bulk_result(result: BulkWriteResult) -> Self {
        Self {
            inserted_ids: result.inserted_ids,
        }
    }
}

/// The result of a [`Collection::bulk_write`](../struct.Collection.html#method.bulk_write)
/// operation.
///
/// All maps are keyed by the index of the model in the list passed to `bulk_write`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct BulkWriteResult {
    /// Whether the server acknowledged the writes. Unacknowledged writes report zero counts.
    pub acknowledged: bool,

    /// The number of documents inserted.
    pub inserted_count: u64,

    /// The number of documents that matched an update or replacement filter.
    pub matched_count: u64,

    /// The number of documents modified by an update or replacement.
    pub modified_count: u64,

    /// The number of documents deleted.
    pub deleted_count: u64,

    /// The number of documents upserted.
    pub upserted_count: u64,

    /// The `_id` of every inserted document.
    pub inserted_ids: HashMap<usize, Bson>,

    /// The `_id` of every upserted document.
    pub upserted_ids: HashMap<usize, Bson>,
}

#[derive(Debug, Clone)]
pub(crate) struct GetMoreResult {
    pub(crate) batch: VecDeque<Document>,
    pub(crate) exhausted: bool,
    pub(crate) post_batch_resume_token: Option<ResumeToken>,
}
