use std::{
    collections::VecDeque,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use super::ServerSession;
use crate::bson::Document;

#[derive(Debug, Default)]
pub(crate) struct ServerSessionPool {
    pool: Mutex<VecDeque<ServerSession>>,
}

impl ServerSessionPool {
    pub(crate) fn new() -> Self {
        Self {
            pool: Default::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<ServerSession>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks out a server session from the pool. Before doing so, it first clears out all the
    /// expired sessions. If there are no sessions left in the pool after clearing expired ones
    /// out, a new session will be created.
    pub(crate) fn check_out(&self, logical_session_timeout: Option<Duration>) -> ServerSession {
        let mut pool = self.lock();
        while let Some(session) = pool.pop_front() {
            // If a session is about to expire within the next minute, remove it from pool.
            if session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            return session;
        }
        ServerSession::new()
    }

    /// Checks in a server session to the pool. If it is about to expire or is dirty, it will be
    /// discarded.
    ///
    /// This method will also clear out any expired session from the back of the pool before
    /// checking in.
    pub(crate) fn check_in(&self, session: ServerSession, logical_session_timeout: Option<Duration>) {
        let mut pool = self.lock();
        while let Some(pooled_session) = pool.pop_back() {
            if pooled_session.is_about_to_expire(logical_session_timeout) {
                continue;
            }
            pool.push_back(pooled_session);
            break;
        }

        if !session.dirty && !session.is_about_to_expire(logical_session_timeout) {
            pool.push_front(session);
        }
    }

    /// Empties the pool, returning the ids of every session it held.
    pub(crate) fn drain_ids(&self) -> Vec<Document> {
        self.lock().drain(..).map(|session| session.id).collect()
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &Document) -> bool {
        self.lock().iter().any(|s| &s.id == id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}
