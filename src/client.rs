pub(crate) mod executor;
pub mod options;
pub mod session;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
    Mutex,
    PoisonError,
};

use derive_where::derive_where;

use crate::{
    bson::{oid::ObjectId, Document},
    change_stream::{
        event::ChangeStreamEvent,
        options::ChangeStreamOptions,
        ChangeStream,
        WatchArgs,
    },
    db::Database,
    error::{Error, ErrorKind, Result},
    operation::{AggregateTarget, EndSessions, Operation, MAX_END_SESSIONS_BATCH_SIZE},
    options::{ClientOptions, DatabaseOptions, SessionOptions},
    trace::SESSION_TRACING_EVENT_TARGET,
    transport::{StreamDescription, Transport},
    ClientSession,
};
use session::{ClusterTime, ServerSession, ServerSessionPool};

/// Commands that must never carry an `lsid`, matched case-insensitively.
pub(crate) const SESSIONS_UNSUPPORTED_COMMANDS: [&str; 7] = [
    "hello",
    "ismaster",
    "saslstart",
    "saslcontinue",
    "getnonce",
    "authenticate",
    "endsessions",
];

/// This is the main entry point for the API. A `Client` sends commands through a [`Transport`]
/// and layers sessions, cluster time gossiping, cursors and change streams on top of it.
///
/// `Client` uses [`std::sync::Arc`](https://doc.rust-lang.org/std/sync/struct.Arc.html) internally,
/// so it can safely be shared across threads or async tasks. For example:
///
/// ```rust
/// # use mongodb_cursor_core::{bson::Document, Client, Transport};
/// # async fn start_workers(transport: impl Transport) {
/// let client = Client::with_transport(transport, None);
///
/// for i in 0..5 {
///     let client_ref = client.clone();
///
///     tokio::task::spawn(async move {
///         let collection = client_ref
///             .database("items")
///             .collection::<Document>(&format!("coll{}", i));
///
///         // Do something with the collection
///     });
/// }
/// # }
/// ```
///
/// ## Notes on performance
/// Spawning many asynchronous tasks that use the client concurrently is the intended use; each
/// operation checks a server session out of a shared pool and returns it when done.
///
/// ## Shutdown
/// Server sessions are pooled in memory and are only released on the server when
/// [`Client::shutdown`] is called. Once shut down, every operation started with the client fails
/// with [`ErrorKind::Shutdown`].
#[derive(Clone, Debug)]
pub struct Client {
    inner: Arc<ClientInner>,
}

#[derive_where(Debug)]
struct ClientInner {
    #[derive_where(skip)]
    transport: Box<dyn Transport>,
    options: ClientOptions,
    id: ObjectId,
    session_pool: ServerSessionPool,
    cluster_time: Mutex<Option<ClusterTime>>,
    shutdown: AtomicBool,
}

impl Client {
    /// Creates a new `Client` that sends its commands through `transport`.
    pub fn with_transport(
        transport: impl Transport,
        options: impl Into<Option<ClientOptions>>,
    ) -> Self {
        let inner = ClientInner {
            transport: Box::new(transport),
            options: options.into().unwrap_or_default(),
            id: ObjectId::new(),
            session_pool: ServerSessionPool::new(),
            cluster_time: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Gets a handle to a database specified by `name` in the cluster the `Client` is connected
    /// to. The `Database` read and write concerns default to those of the `Client`.
    ///
    /// This method does not send or receive anything across the wire to the database, so it can
    /// be used repeatedly without incurring any costs from I/O.
    pub fn database(&self, name: &str) -> Database {
        Database::new(self.clone(), name, None)
    }

    /// Gets a handle to a database specified by `name` in the cluster the `Client` is connected
    /// to. Operations done with this `Database` will use the options specified by `options` by
    /// default and will otherwise default to those of the `Client`.
    ///
    /// This method does not send or receive anything across the wire to the database, so it can
    /// be used repeatedly without incurring any costs from I/O.
    pub fn database_with_options(&self, name: &str, options: DatabaseOptions) -> Database {
        Database::new(self.clone(), name, Some(options))
    }

    /// The options this client was created with.
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Starts a new [`ClientSession`].
    ///
    /// Fails if the client has been shut down or if the deployment the transport is connected
    /// to does not support sessions.
    pub fn start_session(
        &self,
        options: impl Into<Option<SessionOptions>>,
    ) -> Result<ClientSession> {
        if self.is_shutdown() {
            return Err(ErrorKind::Shutdown.into());
        }
        let description = self.inner.transport.description();
        if !description.supports_sessions() {
            return Err(Error::invalid_argument(
                "the deployment does not support sessions",
            ));
        }
        let server_session = self
            .inner
            .session_pool
            .check_out(description.logical_session_timeout);
        Ok(ClientSession::new(
            server_session,
            self.clone(),
            options.into(),
            false,
        ))
    }

    /// Starts a new [`ChangeStream`] that receives events for all changes in the cluster. The
    /// stream does not observe changes from system collections or the "config", "local" or
    /// "admin" databases.
    ///
    /// No command is sent until the stream is first iterated.
    pub fn watch(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> ChangeStream<ChangeStreamEvent<Document>> {
        ChangeStream::new(self.cluster_watch_args(pipeline, options), self.clone(), None)
    }

    /// Starts a new [`ChangeStream`] over the whole cluster that sends its commands with the
    /// provided session.
    pub fn watch_with_session(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
        session: &ClientSession,
    ) -> ChangeStream<ChangeStreamEvent<Document>> {
        ChangeStream::new(
            self.cluster_watch_args(pipeline, options),
            self.clone(),
            Some(session.clone()),
        )
    }

    fn cluster_watch_args(
        &self,
        pipeline: impl IntoIterator<Item = Document>,
        options: impl Into<Option<ChangeStreamOptions>>,
    ) -> WatchArgs {
        let mut options = options.into().unwrap_or_default();
        options.all_changes_for_cluster = Some(true);
        if options.read_concern.is_none() {
            options.read_concern = self.inner.options.read_concern.clone();
        }
        WatchArgs {
            pipeline: pipeline.into_iter().collect(),
            target: AggregateTarget::Database("admin".to_string()),
            options: Some(options),
        }
    }

    /// The highest cluster time this client has seen in a server reply, if any.
    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.inner
            .cluster_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Advances the client's cluster time if `to` is newer. Only validated values gossiped by a
    /// server reach this.
    pub(crate) fn advance_cluster_time(&self, to: &ClusterTime) {
        let mut cluster_time = self
            .inner
            .cluster_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if cluster_time.as_ref().map(|ct| ct < to).unwrap_or(true) {
            *cluster_time = Some(to.clone());
        }
    }

    /// Shuts this `Client` down, releasing every pooled server session on the server with
    /// `endSessions`. The outcome of those commands is ignored. Calling this more than once has
    /// no further effect.
    ///
    /// After shutdown, operations started with this client (or with any database, collection,
    /// cursor or session derived from it) fail with [`ErrorKind::Shutdown`].
    pub async fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        let ids = self.inner.session_pool.drain_ids();
        for chunk in ids.chunks(MAX_END_SESSIONS_BATCH_SIZE) {
            let mut op = EndSessions::new(chunk.to_vec());
            if let Err(error) = self.execute_operation_on_transport(&mut op, None).await {
                tracing::debug!(
                    target: SESSION_TRACING_EVENT_TARGET,
                    error = %error,
                    sessions = chunk.len(),
                    "endSessions failed during shutdown"
                );
            }
        }
    }

    /// The description of the server the transport currently routes commands to.
    pub(crate) fn stream_description(&self) -> StreamDescription {
        self.inner.transport.description()
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::SeqCst)
    }

    pub(crate) fn is_same_client(&self, other: &Client) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Returns a server session to the pool. Sessions checked in after shutdown are discarded,
    /// since nothing will release them.
    pub(crate) fn check_in_server_session(&self, session: ServerSession) {
        if self.is_shutdown() {
            return;
        }
        let timeout = self.inner.transport.description().logical_session_timeout;
        self.inner.session_pool.check_in(session, timeout);
    }

    /// Creates an implicit session for `op` if it may carry one and the deployment supports
    /// sessions.
    pub(crate) fn start_implicit_session<T: Operation>(&self, op: &T) -> Option<ClientSession> {
        if !op.supports_sessions() || !op.is_acknowledged() {
            return None;
        }
        let description = self.inner.transport.description();
        if !description.supports_sessions() {
            return None;
        }
        let server_session = self
            .inner
            .session_pool
            .check_out(description.logical_session_timeout);
        Some(ClientSession::new(server_session, self.clone(), None, true))
    }

    #[cfg(test)]
    pub(crate) fn pooled_session_count(&self) -> usize {
        self.inner.session_pool.len()
    }

    #[cfg(test)]
    pub(crate) fn is_session_pooled(&self, id: &Document) -> bool {
        self.inner.session_pool.contains(id)
    }
}
