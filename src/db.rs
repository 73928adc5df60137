pub mod options;

use std::sync::Arc;

use crate::{
    bson::Document,
    change_stream::{
        event::ChangeStreamEvent,
        options::ChangeStreamOptions,
        ChangeStream,
        WatchArgs,
    },
    concern::{ReadConcern, WriteConcern},
    cursor::CursorSource,
    error::Result,
    operation::{Aggregate, AggregateTarget, ListCollections, RunCommand},
    options::{
        resolve_options,
        AggregateOptions,
        CollectionOptions,
        DatabaseOptions,
        ListCollectionsOptions,
    },
    Client,
    ClientSession,
    Collection,
    Cursor,
};

/// A handle to a database, obtained from [`Client::database`] or
/// [`Client::database_with_options`]. Creating one performs no I/O.
///
/// Handles are reference counted; clone one into each task that needs it.
#[derive(Clone, Debug)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

#[derive(Debug)]
struct DatabaseInner {
    client: Client,
    name: String,
    read_concern: Option<ReadConcern>,
    write_concern: Option<WriteConcern>,
}

impl Database {
    pub(crate) fn new(client: Client, name: &str, options: Option<DatabaseOptions>) -> Self {
        let options = options.unwrap_or_default();
        let read_concern = options
            .read_concern
            .or_else(|| client.options().read_concern.clone());
        let write_concern = options
            .write_concern
            .or_else(|| client.options().write_concern.clone());

        Self {
            inner: Arc::new(DatabaseInner {
                client,
                name: name.to_string(),
                read_concern,
                write_concern,
            }),
        }
    }

    /// The client this database was obtained from.
    pub fn client(&self) -> &Client {
        &self.inner.client
    }

    /// Gets the name of the `Database`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Gets the read concern of the `Database`.
    pub fn read_concern(&self) -> Option<&ReadConcern> {
        self.inner.read_concern.as_ref()
    }

    /// Gets the write concern of the `Database`.
    pub fn write_concern(&self) -> Option<&WriteConcern> {
        self.inner.write_concern.as_ref()
    }

    /// A handle to the collection `name`, inheriting this database's read and write concerns.
    /// See [`Collection`] for what `T` is used for.
    pub fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        Collection::new(self.clone(), name, None)
    }

    /// Like [`Database::collection`], with `options` taking precedence over the database's
    /// defaults.
    pub fn collection_with_options<T: Send + Sync>(
        &self,
        name: &str,
        options: CollectionOptions,
    ) -> Collection<T> {
        Collection::new(self.clone(), name, Some(options))
    }

    /// Runs a database-level command.
    ///
    /// `command` is sent as given: the database's read and write concerns are not added to it.
    /// It still carries an implicit session unless it is one of the commands that reject one.
    pub async fn run_command(&self, command: Document) -> Result<Document> {
        let mut op = RunCommand::new(self.name().to_string(), command);
        self.client().execute_operation(&mut op, None).await
    }

    /// Runs a database-level command using the provided `ClientSession`.
    pub async fn run_command_with_session(
        &self,
        command: Document,
        session: &ClientSession,
    ) -> Result<Document> {
        let mut op = RunCommand::new(self.name().to_string(), command);
        self.client().execute_operation(&mut op, session).await
    }

    /// Runs a database-level aggregation (`aggregate: 1`), for pipelines starting with stages
    /// such as `$currentOp` that don't read from a collection.
    ///
    /// As with [`Collection::aggregate`], invalid option combinations are rejected before anything
    /// is sent, and the command itself is sent on first iteration of the cursor.
    pub fn aggregate(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<AggregateOptions>>,
    ) -> Result<Cursor<Document>> {
        self.aggregate_common(pipeline, options, None)
    }

    /// Runs a database-level aggregation using the provided `ClientSession`.
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

        let aggregate = Aggregate::new(
            AggregateTarget::Database(self.name().to_string()),
            pipeline,
            options,
        );
        aggregate.validate()?;
        Ok(Cursor::new(
            self.client().clone(),
            CursorSource::Aggregate(aggregate),
            session.cloned(),
        ))
    }

    /// A lazy cursor over `listCollections`, yielding one document per collection matching
    /// `filter`. `name_only` is dropped when the filter looks at anything besides `name`.
    pub fn list_collections(
        &self,
        filter: impl Into<Option<Document>>,
        options: impl Into<Option<ListCollectionsOptions>>,
    ) -> Cursor<Document> {
        let options = options.into().unwrap_or_default();
        let mut op = ListCollections::new(
            self.name().to_string(),
            filter.into(),
            options.name_only.unwrap_or(false),
        );
        if let Some(batch_size) = options.batch_size.and_then(|n| i32::try_from(n).ok()) {
            op.set_batch_size(batch_size);
        }
        Cursor::new(
            self.client().clone(),
            CursorSource::ListCollections(op),
            None,
        )
    }

    /// Starts a new [`ChangeStream`] that receives events for all changes in this database.
    /// The stream does not observe changes from system collections and cannot be started on
    /// "config", "local" or "admin" databases.
    ///
    /// See [`Collection::watch`] for the requirements on `pipeline`.
    pub fn watch(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> ChangeStream<ChangeStreamEvent<Document>> {
        ChangeStream::new(
            self.watch_args(pipeline, options),
            self.client().clone(),
            None,
        )
    }

    /// Starts a new [`ChangeStream`] on this database that sends its commands with the provided
    /// session.
    pub fn watch_with_session(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
        session: &ClientSession,
    ) -> ChangeStream<ChangeStreamEvent<Document>> {
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
            target: AggregateTarget::Database(self.name().to_string()),
            options,
        }
    }
}
