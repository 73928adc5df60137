pub(crate) mod options;

use std::{borrow::Borrow, fmt, str::FromStr, sync::Arc};

use derive_where::derive_where;
use serde::{de::Error as DeError, Deserialize, Deserializer, Serialize};

use self::options::{
    AggregateOptions,
    BulkWriteOptions,
    CollectionOptions,
    FindOptions,
    InsertManyOptions,
    InsertOneOptions,
};
use crate::{
    bson::Document,
    bulk_write::{execute_bulk_write, WriteModel},
    change_stream::{
        event::ChangeStreamEvent,
        options::ChangeStreamOptions,
        ChangeStream,
        WatchArgs,
    },
    concern::{ReadConcern, WriteConcern},
    cursor::CursorSource,
    error::{convert_bulk_errors, Error, Result},
    operation::{Aggregate, Find},
    options::resolve_options,
    results::{BulkWriteResult, InsertManyResult, InsertOneResult},
    Client,
    ClientSession,
    Cursor,
    Database,
};

/// A handle to a collection, obtained from [`Database::collection`] or
/// [`Database::collection_with_options`].
///
/// `T` is the type documents are inserted as and deserialized into by [`Collection::find`]. Any
/// serde type works; aggregations and change streams yield their own types regardless of `T`.
///
/// Handles are reference counted and cheap to clone, so each task can own one:
///
/// ```rust
/// # use mongodb_cursor_core::{bson::{doc, Document}, Client};
/// # async fn start_workers(client: Client) {
/// let coll = client.database("items").collection::<Document>("in_stock");
///
/// for i in 0..5 {
///     let coll = coll.clone();
///     tokio::task::spawn(async move { coll.insert_one(doc! { "x": i }, None).await });
/// }
/// # }
/// ```
#[derive_where(Debug, Clone)]
pub struct Collection<T>
where
    T: Send + Sync,
{
    inner: Arc<CollectionInner>,
    #[derive_where(skip)]
    _phantom: std::marker::PhantomData<fn() -> T>,
}

#[derive(Debug)]
struct CollectionInner {
    client: Client,
    db: Database,
    name: String,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
}

impl<T> Collection<T>
where
    T: Send + Sync,
{
    pub(crate) fn new(db: Database, name: &str, options: Option<CollectionOptions>) -> Self {
        let options = options.unwrap_or_default();
        let read_concern = options.read_concern.or_else(|| db.read_concern().cloned());
        let write_concern = options
            .write_concern
            .or_else(|| db.write_concern().cloned());

        Self {
            inner: Arc::new(CollectionInner {
                client: db.client().clone(),
                db,
                name: name.to_string(),
                read_concern,
                write_concern,
            }),
            _phantom: Default::default(),
        }
    }

    /// Gets a clone of the `Collection` with a different type `U`.
    pub fn clone_with_type<U: Send + Sync>(&self) -> Collection<U> {
        Collection {
            inner: self.inner.clone(),
            _phantom: Default::default(),
        }
    }

    /// Get the `Client` that this collection descended from.
    pub(crate) fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Gets the name of the `Collection`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The `db.coll` namespace of this collection.
    pub fn namespace(&self) -> Namespace {
        Namespace {
            db: self.inner.db.name().into(),
            coll: self.name().into(),
        }
    }

    /// Gets the read concern of the `Collection`.
    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.inner.read_concern.as_ref()
    }

    /// Gets the write concern of the `Collection`.
    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.inner.write_concern.as_ref()
    }

    /// Runs an aggregation operation.
    ///
    /// Invalid option combinations (`explain` together with a read or write concern) are rejected
    /// here, before anything is sent. Otherwise no command is sent until the returned cursor is
    /// first iterated.
    ///
    pub fn aggregate(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<Cursor<Document>> {
        self.aggregate_common(pipeline, options, None)
    }

    /// Runs an aggregation operation using the provided `ClientSession`.
    pub fn aggregate_with_session(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
        session: &ClientSession,
    ) -> Result<Cursor<Document>> {
        self.aggregate_common(pipeline, options, Some(session))
    }

    fn aggregate_common(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
        session: Option<&ClientSession>,
    ) -> Result<Cursor<Document>> {
        let mut options = options.into();
        let explain = options.as_ref().and_then(|o| o.explain) == Some(true);
        if !explain {
            resolve_options!(self, options, [read_concern, write_concern]);
        }

        let aggregate = Aggregate::new(self.namespace(), pipeline, options);
        aggregate.validate()?;
        Ok(Cursor::new(
            self.client().clone(),
            CursorSource::Aggregate(aggregate),
            session.cloned(),
        ))
    }

    /// Opens a [`ChangeStream`] over the changes made to this collection. The `aggregate` is sent
    /// when the stream is first polled.
    ///
    /// `pipeline` is appended after the `$changeStream` stage. It must keep the `_id` field of
    /// each event, since that is the token the stream resumes from; an event without one ends the
    /// stream with [`ErrorKind::MissingResumeToken`](crate::error::ErrorKind).
    pub fn watch(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> ChangeStream<ChangeStreamEvent<T>> {
        ChangeStream::new(
            self.watch_args(pipeline, options),
            self.client().clone(),
            None,
        )
    }

    /// Starts a new [`ChangeStream`] on this collection that sends its commands with the
    /// provided session.
    pub fn watch_with_session(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
        session: &ClientSession,
    ) -> ChangeStream<ChangeStreamEvent<T>> {
        ChangeStream::new(
            self.watch_args(pipeline, options),
            self.client().clone(),
            Some(session.clone()),
        )
    }

    fn watch_args(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> WatchArgs {
        let mut options = options.into();
        resolve_options!(self, options, [read_concern]);
        WatchArgs {
            pipeline: pipeline.into_iter().collect(),
            target: self.namespace().into(),
            options,
        }
    }

    /// Executes the given write models in as few commands as the server's limits allow.
    ///
    /// Ordered writes (the default) stop at the first failing model; unordered writes attempt
    /// every model. Either way, write errors are reported with the index of the failing model in
    /// `models`, sorted by that index, alongside the writes that did succeed.
    pub async fn bulk_write(
        &self,
        models: impl IntoIterator<Item = WriteModel>,
        options: impl Into<Option<BulkWriteOptions>>,
    ) -> Result<BulkWriteResult> {
        self.bulk_write_common(models.into_iter().collect(), options.into(), None)
            .await
    }

    /// Executes the given write models using the provided `ClientSession`.
    pub async fn bulk_write_with_session(
        &self,
        models: impl IntoIterator<Item = WriteModel>,
        options: impl Into<Option<BulkWriteOptions>>,
        session: &ClientSession,
    ) -> Result<BulkWriteResult> {
        self.bulk_write_common(models.into_iter().collect(), options.into(), Some(session))
            .await
    }

    async fn bulk_write_common(
        &self,
        models: Vec<WriteModel>,
        mut options: Option<BulkWriteOptions>,
        session: Option<&ClientSession>,
    ) -> Result<BulkWriteResult> {
        resolve_options!(self, options, [write_concern]);
        execute_bulk_write(
            self.client(),
            &self.namespace(),
            models,
            options.unwrap_or_default(),
            session,
        )
        .await
    }
}

impl<T> Collection<T>
where
    T: Send + Sync + serde::de::DeserializeOwned,
{
    /// Finds the documents in the collection matching `filter`.
    ///
    /// No command is sent until the returned cursor is first iterated.
    pub fn find(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
    ) -> Cursor<T> {
        self.find_common(filter, options, None)
    }

    /// Finds the documents in the collection matching `filter` using the provided
    /// `ClientSession`.
    pub fn find_with_session(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
        session: &ClientSession,
    ) -> Cursor<T> {
        self.find_common(filter, options, Some(session))
    }

    fn find_common(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<FindOptions>>,
        session: Option<&ClientSession>,
    ) -> Cursor<T> {
        let mut options = options.into();
        resolve_options!(self, options, [read_concern]);

        let find = Find::new(
            self.namespace(),
            filter.into().unwrap_or_default(),
            options,
        );
        Cursor::new(
            self.client().clone(),
            CursorSource::Find(find),
            session.cloned(),
        )
    }
}

impl<T> Collection<T>
where
    T: Serialize + Send + Sync,
{
    /// Inserts `doc` into the collection. An `_id` is generated if the document does not carry
    /// one.
    pub async fn insert_one(
        &self,
        doc: impl Borrow<T>,
        options: impl Into<Option<InsertOneOptions>>,
    ) -> Result<InsertOneResult> {
        self.insert_one_common(doc.borrow(), options.into(), None)
            .await
    }

    /// Inserts `doc` into the collection using the provided `ClientSession`.
    pub async fn insert_one_with_session(
        &self,
        doc: impl Borrow<T>,
        options: impl Into<Option<InsertOneOptions>>,
        session: &ClientSession,
    ) -> Result<InsertOneResult> {
        self.insert_one_common(doc.borrow(), options.into(), Some(session))
            .await
    }

    async fn insert_one_common(
        &self,
        doc: &T,
        options: Option<InsertOneOptions>,
        session: Option<&ClientSession>,
    ) -> Result<InsertOneResult> {
        let model = WriteModel::insert_one(crate::bson::to_document(doc)?);
        self.bulk_write_common(vec![model], options.map(Into::into), session)
            .await
            .map(InsertOneResult::from_bulk_result)
            .map_err(convert_bulk_errors)
    }

    /// Inserts `docs` in a single ordered batch by default. Borrowed documents are accepted, so
    /// callers don't need to clone them.
    pub async fn insert_many(
        &self,
        docs: impl IntoIterator<Item = impl Borrow<T>>,
        options: impl Into<Option<InsertManyOptions>>,
    ) -> Result<InsertManyResult> {
        let models = to_insert_models(docs)?;
        self.insert_many_common(models, options.into(), None).await
    }

    /// Inserts the data in `docs` into the collection using the provided `ClientSession`.
    pub async fn insert_many_with_session(
        &self,
        docs: impl IntoIterator<Item = impl Borrow<T>>,
        options: impl Into<Option<InsertManyOptions>>,
        session: &ClientSession,
    ) -> Result<InsertManyResult> {
        let models = to_insert_models(docs)?;
        self.insert_many_common(models, options.into(), Some(session))
            .await
    }

    async fn insert_many_common(
        &self,
        models: Vec<WriteModel>,
        options: Option<InsertManyOptions>,
        session: Option<&ClientSession>,
    ) -> Result<InsertManyResult> {
        if models.is_empty() {
            return Err(Error::invalid_argument(
                "No documents provided to insert_many",
            ));
        }
        self.bulk_write_common(models, options.map(Into::into), session)
            .await
            .map(InsertManyResult::from_bulk_result)
    }
}

fn to_insert_models<T: Serialize>(
    docs: impl IntoIterator<Item = impl Borrow<T>>,
) -> Result<Vec<WriteModel>> {
    docs.into_iter()
        .map(|doc| Ok(WriteModel::insert_one(crate::bson::to_document(doc.borrow())?)))
        .collect()
}

/// A `database.collection` pair. Displays and parses as `"db.coll"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    /// The name of the database associated with this namespace.
    pub db: String,

    /// The name of the collection this namespace corresponds to.
    pub coll: String,
}

impl Namespace {
    /// Builds a namespace from its database and collection names.
    pub fn new(db: impl Into<String>, coll: impl Into<String>) -> Self {
        Self {
            db: db.into(),
            coll: coll.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}.{}", self.db, self.coll)
    }
}

impl FromStr for Namespace {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(Self::new(db, coll)),
            _ => Err(Error::invalid_argument(format!(
                "invalid namespace {:?}: expected \"<db>.<collection>\"",
                s
            ))),
        }
    }
}

impl<'de> Deserialize<'de> for Namespace {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Self::from_str(&s).map_err(|_| D::Error::custom("Missing one or more fields in namespace"))
    }
}

impl Serialize for Namespace {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
