use std::{collections::VecDeque, time::Duration};

use crate::{
    bson::{Bson, Document, Timestamp},
    change_stream::event::ResumeToken,
    client::executor::ExecutionDetails,
    error::{Error, Result},
    operation::{Aggregate, CursorInfo, Find, KillCursors, ListCollections},
    transport::{command::Command, StreamDescription},
    trace::CURSOR_TRACING_EVENT_TARGET,
    Client,
    ClientSession,
    Namespace,
};

/// How many documents a cursor asks for, and when it stops asking.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct BatchSizing {
    /// Documents requested per round trip. `None` leaves the choice to the server.
    pub(crate) batch_size: Option<u32>,

    /// Total number of documents the cursor yields before closing itself.
    pub(crate) limit: Option<i64>,

    /// Close the cursor after the first batch.
    pub(crate) single_batch: bool,

    /// Ask the server to close the cursor after the first batch (`singleBatch: true`).
    pub(crate) wire_single_batch: bool,
}

impl BatchSizing {
    /// Normalizes user supplied `find` sizing: a negative batch size or limit caps the cursor
    /// at a single batch of the absolute value, and a batch size of zero closes the cursor after
    /// the first batch of server-chosen size.
    pub(crate) fn new(batch_size: Option<i32>, limit: Option<i64>) -> Self {
        let mut sizing = Self::default();

        match batch_size {
            Some(n) if n > 0 => sizing.batch_size = Some(n.unsigned_abs()),
            Some(n) if n < 0 => {
                sizing.batch_size = Some(n.unsigned_abs());
                sizing.single_batch = true;
                sizing.wire_single_batch = true;
            }
            Some(_) => sizing.single_batch = true,
            None => {}
        }

        match limit {
            Some(n) if n > 0 => sizing.limit = Some(n),
            Some(n) if n < 0 => {
                sizing.limit = Some(n.saturating_abs());
                sizing.single_batch = true;
                sizing.wire_single_batch = true;
            }
            _ => {}
        }

        sizing
    }

    /// Sizing for aggregation cursors, where a batch size of zero asks for an empty first batch.
    pub(crate) fn from_batch_size(batch_size: Option<u32>) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    /// The batch size to send with the initiating command.
    pub(crate) fn initial_batch_size(&self) -> Option<u32> {
        match (self.batch_size, self.remaining(0)) {
            (Some(batch_size), Some(remaining)) => Some(batch_size.min(remaining)),
            (batch_size, _) => batch_size,
        }
    }

    /// The batch size to send with the next `getMore`, given how many documents the server has
    /// returned so far.
    pub(crate) fn get_more_batch_size(&self, returned: u64) -> Option<u32> {
        let batch_size = self.batch_size.filter(|n| *n > 0);
        match (batch_size, self.remaining(returned)) {
            (Some(batch_size), Some(remaining)) => Some(batch_size.min(remaining)),
            (None, Some(remaining)) => Some(remaining),
            (batch_size, None) => batch_size,
        }
    }

    /// Whether the cursor has returned everything it is allowed to.
    pub(crate) fn is_satisfied(&self, returned: u64) -> bool {
        self.remaining(returned) == Some(0)
    }

    fn remaining(&self, returned: u64) -> Option<u32> {
        self.limit.map(|limit| {
            let remaining = (limit as u64).saturating_sub(returned);
            u32::try_from(remaining).unwrap_or(u32::MAX)
        })
    }
}

/// Static information about a cursor.
#[derive(Clone, Debug)]
pub(crate) struct CursorInformation {
    pub(crate) ns: Namespace,
    pub(crate) id: i64,
    pub(crate) sizing: BatchSizing,
    pub(crate) max_time: Option<Duration>,
    pub(crate) comment: Option<Bson>,
}

/// Specification used to create a new cursor.
#[derive(Debug, Clone)]
pub(crate) struct CursorSpecification {
    pub(crate) info: CursorInformation,
    pub(crate) initial_buffer: VecDeque<Document>,
    pub(crate) post_batch_resume_token: Option<ResumeToken>,
    pub(crate) operation_time: Option<Timestamp>,
}

impl CursorSpecification {
    pub(crate) fn new(
        info: CursorInfo,
        sizing: BatchSizing,
        max_time: impl Into<Option<Duration>>,
        comment: impl Into<Option<Bson>>,
        operation_time: Option<Timestamp>,
    ) -> Self {
        Self {
            info: CursorInformation {
                ns: info.ns,
                id: info.id,
                sizing,
                max_time: max_time.into(),
                comment: comment.into(),
            },
            initial_buffer: info.first_batch,
            post_batch_resume_token: ResumeToken::from_document(info.post_batch_resume_token),
            operation_time,
        }
    }

    pub(crate) fn id(&self) -> i64 {
        self.info.id
    }
}

/// The result of asking a cursor for the next document of its current batch.
#[derive(Debug)]
pub(crate) enum BatchValue {
    /// A document, and whether it was the last one buffered.
    Some { doc: Document, is_last: bool },

    /// The last round trip returned no documents, but the cursor is still open.
    Empty,

    /// The cursor has nothing left to return.
    Exhausted,
}

/// The command that opens a cursor. Kept so the cursor can be rewound, cloned or explained.
#[derive(Debug, Clone)]
pub(crate) enum CursorSource {
    Find(Find),
    Aggregate(Aggregate),
    ListCollections(ListCollections),
}

impl CursorSource {
    pub(crate) async fn execute(
        &self,
        client: &Client,
        session: Option<&ClientSession>,
    ) -> Result<ExecutionDetails<CursorSpecification>> {
        match self.clone() {
            Self::Find(mut op) => client.execute_operation_with_details(&mut op, session).await,
            Self::Aggregate(mut op) => {
                client
                    .execute_operation_with_details(&mut op, session)
                    .await
            }
            Self::ListCollections(mut op) => {
                client
                    .execute_operation_with_details(&mut op, session)
                    .await
            }
        }
    }

    pub(crate) fn build(&self, description: &StreamDescription) -> Result<Command> {
        use crate::operation::Operation;

        match self.clone() {
            Self::Find(mut op) => op.build(description),
            Self::Aggregate(mut op) => op.build(description),
            Self::ListCollections(mut op) => op.build(description),
        }
    }

    pub(crate) fn set_batch_size(&mut self, batch_size: i32) -> Result<()> {
        match self {
            Self::Find(op) => op.set_batch_size(batch_size),
            Self::Aggregate(op) => {
                let batch_size = u32::try_from(batch_size).map_err(|_| {
                    Error::invalid_argument("aggregation cursors require a non-negative batch size")
                })?;
                op.set_batch_size(batch_size);
            }
            Self::ListCollections(op) => op.set_batch_size(batch_size),
        }
        Ok(())
    }

    pub(crate) fn has_read_or_write_concern(&self) -> bool {
        match self {
            Self::Find(op) => op.has_read_concern(),
            Self::Aggregate(op) => op.has_read_or_write_concern(),
            Self::ListCollections(_) => false,
        }
    }

    pub(crate) fn is_out_or_merge(&self) -> bool {
        matches!(self, Self::Aggregate(op) if op.is_out_or_merge())
    }
}

/// The session a cursor sends its commands with.
#[derive(Debug, Clone)]
pub(crate) enum CursorSession {
    /// Supplied by the caller, never ended by the cursor.
    Explicit(ClientSession),

    /// Created for the cursor by the client when the initiating command was sent, and ended
    /// once the cursor is exhausted, closed or rewound.
    Implicit(Option<ClientSession>),
}

impl CursorSession {
    pub(crate) fn new(session: Option<ClientSession>) -> Self {
        match session {
            Some(session) if session.is_implicit() => Self::Implicit(Some(session)),
            Some(session) => Self::Explicit(session),
            None => Self::Implicit(None),
        }
    }

    pub(crate) fn get(&self) -> Option<&ClientSession> {
        match self {
            Self::Explicit(session) => Some(session),
            Self::Implicit(session) => session.as_ref(),
        }
    }

    /// Ends and forgets an implicit session. Explicit sessions are left alone.
    pub(crate) fn end_implicit(&mut self) {
        if let Self::Implicit(session) = self {
            if let Some(session) = session.take() {
                session.end_session();
            }
        }
    }

    /// A copy for a fresh cursor over the same source: explicit sessions are shared, implicit
    /// ones are not.
    pub(crate) fn for_clone(&self) -> Self {
        match self {
            Self::Explicit(session) => Self::Explicit(session.clone()),
            Self::Implicit(_) => Self::Implicit(None),
        }
    }
}

/// Mutable state of a started cursor.
#[derive(Debug, Default)]
pub(crate) struct CursorState {
    pub(crate) info: Option<CursorInformation>,
    pub(crate) buffer: VecDeque<Document>,
    pub(crate) exhausted: bool,
    pub(crate) closed: bool,
    pub(crate) returned: u64,
    pub(crate) post_batch_resume_token: Option<ResumeToken>,
    pub(crate) operation_time: Option<Timestamp>,
}

impl CursorState {
    pub(crate) fn is_started(&self) -> bool {
        self.info.is_some()
    }

    /// Whether the server still holds a cursor for this state.
    pub(crate) fn is_alive_on_server(&self) -> bool {
        !self.exhausted && self.info.as_ref().map(|info| info.id != 0).unwrap_or(false)
    }
}

/// Sends `killCursors` for a cursor on a background task, if a runtime is available. The
/// session handle is released once the command completes.
pub(super) fn kill_cursor(
    client: Client,
    ns: Namespace,
    cursor_id: i64,
    session: Option<ClientSession>,
) {
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => return,
    };
    handle.spawn(async move {
        let mut op = KillCursors::new(ns, cursor_id);
        let live_session = session.as_ref().filter(|session| !session.has_ended());
        if let Err(error) = client.execute_operation(&mut op, live_session).await {
            tracing::debug!(
                target: CURSOR_TRACING_EVENT_TARGET,
                error = %error,
                cursor_id,
                "Background killCursors failed"
            );
        }
        if let Some(session) = session.filter(ClientSession::is_implicit) {
            session.end_session();
        }
    });
}
