use serde::Deserialize;
use typed_builder::TypedBuilder;

use crate::concern::{ReadConcern, WriteConcern};

/// These are the valid options for creating a [`Database`](crate::Database) with
/// [`Client::database_with_options`](crate::Client::database_with_options).
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct DatabaseOptions {
    /// The default read concern for operations.
    pub read_concern: Option<ReadConcern>,

    /// The default write concern for operations.
    pub write_concern: Option<WriteConcern>,
}

/// Specifies the options to a
/// [`Database::list_collections`](crate::Database::list_collections) operation.
#[derive(Clone, Debug, Default, Deserialize, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ListCollectionsOptions {
    /// The number of documents the server should return per cursor batch.
    pub batch_size: Option<u32>,

    /// Only return the names and types of the collections. Ignored when the filter selects on
    /// anything other than `name`.
    pub name_only: Option<bool>,
}
