mod cluster_time;
mod pool;
#[cfg(test)]
mod test;

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use uuid::Uuid;

use crate::{
    bson::{doc, spec::BinarySubtype, Binary, Bson, Document, Timestamp},
    error::{Error, ErrorKind, Result},
    options::SessionOptions,
    trace::SESSION_TRACING_EVENT_TARGET,
    Client,
};
pub use cluster_time::ClusterTime;
pub(crate) use pool::ServerSessionPool;

/// A logical session, started with [`Client::start_session`](crate::Client::start_session).
///
/// A `ClientSession` is a cheap handle: cloning it yields another handle to the same logical
/// session, so one session can be passed to several cursors and operations. Commands sent with
/// the session carry its `lsid` and the highest cluster time it has observed.
///
/// When the last handle is dropped, or [`ClientSession::end_session`] is called, the underlying
/// server session is returned to the client's pool. Pooled session ids are released on the
/// server with `endSessions` when the client is shut down.
#[derive(Clone, Debug)]
pub struct ClientSession {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    client: Client,
    id: Document,
    is_implicit: bool,
    options: Option<SessionOptions>,
    state: Mutex<SessionState>,
}

#[derive(Debug)]
struct SessionState {
    server_session: ServerSession,
    cluster_time: Option<ClusterTime>,
    operation_time: Option<Timestamp>,
    ended: bool,
}

impl ClientSession {
    /// Creates a new `ClientSession` wrapping a `ServerSession` checked out from the client's
    /// session pool.
    pub(crate) fn new(
        server_session: ServerSession,
        client: Client,
        options: Option<SessionOptions>,
        is_implicit: bool,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: server_session.id.clone(),
                client,
                is_implicit,
                options,
                state: Mutex::new(SessionState {
                    server_session,
                    cluster_time: None,
                    operation_time: None,
                    ended: false,
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The client that started this session.
    pub fn client(&self) -> Client {
        self.inner.client.clone()
    }

    /// The id of this session.
    pub fn id(&self) -> &Document {
        &self.inner.id
    }

    /// Whether this session was created implicitly by the client.
    pub(crate) fn is_implicit(&self) -> bool {
        self.inner.is_implicit
    }

    /// Whether [`ClientSession::end_session`] has been called.
    pub fn has_ended(&self) -> bool {
        self.state().ended
    }

    /// The highest cluster time this session has observed, or `None` before its first reply.
    pub fn cluster_time(&self) -> Option<ClusterTime> {
        self.state().cluster_time.clone()
    }

    /// The options used to create this session.
    pub fn options(&self) -> Option<&SessionOptions> {
        self.inner.options.as_ref()
    }

    /// Moves this session's cluster time forward to `to`. Older values are ignored.
    ///
    /// The value is not validated here; a cluster time with a malformed signature makes the next
    /// command sent with this session fail before it reaches the server.
    pub fn advance_cluster_time(&self, to: &ClusterTime) {
        let mut state = self.state();
        if state.cluster_time.as_ref().map(|ct| ct < to).unwrap_or(true) {
            state.cluster_time = Some(to.clone());
        }
    }

    /// Parses `to` as a `$clusterTime` document and advances this session's cluster time to it.
    /// Documents that are not valid cluster times are rejected without modifying the session.
    pub fn advance_cluster_time_document(&self, to: &Document) -> Result<()> {
        let cluster_time = ClusterTime::from_document(to).inspect_err(|e| {
            tracing::debug!(
                target: SESSION_TRACING_EVENT_TARGET,
                error = %e,
                "Rejected cluster time advance"
            );
        })?;
        self.advance_cluster_time(&cluster_time);
        Ok(())
    }

    /// Moves this session's operation time forward to `ts`. Older values are ignored.
    pub fn advance_operation_time(&self, ts: Timestamp) {
        let mut state = self.state();
        let newer = match state.operation_time {
            Some(current) => (current.time, current.increment) < (ts.time, ts.increment),
            None => true,
        };
        if newer {
            state.operation_time = Some(ts);
        }
    }

    /// The latest `operationTime` seen in a reply to this session.
    pub fn operation_time(&self) -> Option<Timestamp> {
        self.state().operation_time
    }

    pub(crate) fn causal_consistency(&self) -> bool {
        self.options()
            .and_then(|opts| opts.causal_consistency)
            .unwrap_or(!self.is_implicit())
    }

    /// Marks the server session unfit for reuse after a network error.
    pub(crate) fn mark_dirty(&self) {
        self.state().server_session.dirty = true;
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self) -> bool {
        self.state().server_session.dirty
    }

    /// Updates the date that the underlying server session was last used as part of an
    /// operation sent to the server.
    pub(crate) fn update_last_use(&self) {
        self.state().server_session.last_use = Instant::now();
    }

    /// Checks that this session may be used for an operation on `client`.
    pub(crate) fn check_usable(&self, client: &Client) -> Result<()> {
        if self.has_ended() {
            return Err(ErrorKind::SessionEnded.into());
        }
        if !self.inner.client.is_same_client(client) {
            return Err(Error::invalid_argument(
                "the session provided to an operation must be created from the same client as \
                 the collection/database",
            ));
        }
        Ok(())
    }

    /// Ends this session, returning its server session to the client's pool. Further operations
    /// using the session fail with [`ErrorKind::SessionEnded`]. Ending a session twice is a
    /// no-op.
    pub fn end_session(&self) {
        let server_session = {
            let mut state = self.state();
            if state.ended {
                return;
            }
            state.ended = true;
            state.server_session.clone()
        };
        self.inner.client.check_in_server_session(server_session);
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.ended {
            state.ended = true;
            self.client
                .check_in_server_session(state.server_session.clone());
        }
    }
}

/// The pooled part of a session: the `lsid` and the bookkeeping that decides whether it can be
/// handed out again.
#[derive(Clone, Debug)]
pub(crate) struct ServerSession {
    /// `{ id: <UUID> }`, sent as `lsid`.
    pub(crate) id: Document,

    /// When a command last went out with this id.
    last_use: Instant,

    /// Set after a network error; dirty sessions are never pooled.
    dirty: bool,
}

impl ServerSession {
    fn new() -> Self {
        let binary = Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: Uuid::new_v4().as_bytes().to_vec(),
        });

        Self {
            id: doc! { "id": binary },
            last_use: Instant::now(),
            dirty: false,
        }
    }

    /// Whether the server may time this session out within the next minute.
    fn is_about_to_expire(&self, logical_session_timeout: Option<Duration>) -> bool {
        let timeout = match logical_session_timeout {
            Some(t) => t,
            None => return false,
        };
        let expiration_date = self.last_use + timeout;
        expiration_date < Instant::now() + Duration::from_secs(60)
    }
}
