mod common;
#[cfg(test)]
mod test;

use std::{collections::VecDeque, marker::PhantomData, mem};

use derive_where::derive_where;
use futures_core::Stream;
use serde::de::DeserializeOwned;

use crate::{
    bson::{Document, Timestamp},
    change_stream::event::ResumeToken,
    error::{Error, Result},
    operation::{Explain, GetMore, KillCursors},
    options::ExplainVerbosity,
    trace::CURSOR_TRACING_EVENT_TARGET,
    Client,
    ClientSession,
    Namespace,
};
pub(crate) use common::{
    BatchSizing,
    BatchValue,
    CursorInformation,
    CursorSession,
    CursorSource,
    CursorSpecification,
};
use common::{kill_cursor, CursorState};

/// A `Cursor` streams the result of a query. When a query is made, the returned `Cursor` will
/// contain the first batch of results from the server; the individual results will then be
/// returned as the `Cursor` is iterated. When the batch is exhausted and if there are more
/// results, the `Cursor` will fetch the next batch of documents, and so forth until the results
/// are exhausted.
///
/// Cursors are lazy: the command that opens the cursor on the server isn't sent until the cursor
/// is first iterated (or [`Cursor::has_next`] is called).
///
/// ```rust
/// # use mongodb_cursor_core::{bson::{doc, Document}, error::Result, Collection};
/// # async fn do_stuff(coll: Collection<Document>) -> Result<()> {
/// let mut cursor = coll.find(doc! { "x": { "$gt": 1 } }, None);
///
/// while let Some(doc) = cursor.next().await? {
///     println!("{}", doc)
/// }
/// #
/// # Ok(())
/// # }
/// ```
///
/// A cursor can also be drained into a `Vec` in one go, or adapted into a
/// [`Stream`](futures_core::Stream) with [`Cursor::stream`]:
///
/// ```rust
/// # use futures_util::TryStreamExt;
/// # use mongodb_cursor_core::{bson::{doc, Document}, error::Result, Collection};
/// # async fn do_stuff(coll: Collection<Document>) -> Result<()> {
/// let all: Vec<Document> = coll.find(doc! {}, None).to_vec().await?;
///
/// let names: Vec<String> = coll
///     .find(doc! {}, None)
///     .stream()
///     .map_ok(|doc| doc.get_str("name").unwrap_or_default().to_string())
///     .try_collect()
///     .await?;
/// # Ok(())
/// # }
/// ```
///
/// If a `Cursor` is still open when it goes out of scope, it will automatically be closed via an
/// asynchronous [killCursors](https://www.mongodb.com/docs/manual/reference/command/killCursors/) command executed
/// from its [`Drop`](https://doc.rust-lang.org/std/ops/trait.Drop.html) implementation, provided a
/// tokio runtime is running.
#[derive_where(Debug)]
pub struct Cursor<T> {
    client: Client,
    source: CursorSource,
    session: CursorSession,
    state: CursorState,
    #[derive_where(skip)]
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Cursor<T> {
    pub(crate) fn new(client: Client, source: CursorSource, session: Option<ClientSession>) -> Self {
        Self {
            client,
            source,
            session: CursorSession::new(session),
            state: CursorState::default(),
            _phantom: PhantomData,
        }
    }

    /// The server-side id of this cursor, or 0 if it hasn't been opened yet or is exhausted.
    pub fn id(&self) -> i64 {
        self.state.info.as_ref().map(|info| info.id).unwrap_or(0)
    }

    /// The namespace the server reported for this cursor, once it has been opened.
    pub fn namespace(&self) -> Option<&Namespace> {
        self.state.info.as_ref().map(|info| &info.ns)
    }

    /// Whether the cursor has nothing left to fetch from the server. Documents may still be
    /// buffered locally.
    pub fn is_exhausted(&self) -> bool {
        self.state.exhausted
    }

    /// Whether [`Cursor::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.state.closed
    }

    /// The number of documents that have been fetched from the server but not yet returned.
    pub fn buffered_count(&self) -> usize {
        self.state.buffer.len()
    }

    /// Sets the number of documents requested per batch. Only allowed before the cursor is
    /// opened; afterwards this fails with [`ErrorKind::InvalidArgument`](crate::error::ErrorKind).
    ///
    /// For `find` cursors a negative value returns a single batch of that many documents and a
    /// value of zero closes the cursor after the first batch.
    pub fn batch_size(&mut self, batch_size: i32) -> Result<&mut Self> {
        if self.state.is_started() || self.state.closed {
            return Err(Error::invalid_argument(
                "the batch size of a cursor cannot be changed once it has been opened",
            ));
        }
        self.source.set_batch_size(batch_size)?;
        Ok(self)
    }

    /// Returns the server's explanation of the command that opens this cursor. The cursor
    /// itself is not opened.
    ///
    /// Fails locally when the cursor was created with a read or write concern, or when its
    /// pipeline ends in a `$out` or `$merge` stage.
    pub async fn explain(&self, verbosity: ExplainVerbosity) -> Result<Document> {
        if self.source.has_read_or_write_concern() {
            return Err(Error::invalid_argument(
                "explain cannot be combined with a read concern or a write concern",
            ));
        }
        if self.source.is_out_or_merge() {
            return Err(Error::invalid_argument(
                "explain cannot be combined with a $out or $merge stage",
            ));
        }
        let inner = self.source.build(&self.client.stream_description())?;
        let mut op = Explain::new(inner, verbosity);
        let session = match self.session {
            CursorSession::Explicit(ref session) => Some(session),
            CursorSession::Implicit(_) => None,
        };
        self.client.execute_operation(&mut op, session).await
    }

    /// Closes the cursor. If the server still holds it, a `killCursors` command is sent; its
    /// outcome is not reported. Buffered documents are discarded. Closing a cursor again has no
    /// effect.
    pub async fn close(&mut self) {
        if self.state.closed {
            return;
        }
        if let Err(error) = self.kill().await {
            tracing::debug!(
                target: CURSOR_TRACING_EVENT_TARGET,
                error = %error,
                "killCursors failed while closing cursor"
            );
        }
        self.state.buffer.clear();
        self.session.end_implicit();
    }

    /// Resets the cursor to its unopened state so that the next iteration re-sends the command
    /// that opens it. Buffered documents are discarded. If the server still holds the old
    /// cursor it is killed in the background. An implicit session is ended; a session supplied
    /// by the caller is kept.
    pub fn rewind(&mut self) {
        let session = match self.session {
            CursorSession::Explicit(ref session) => Some(session.clone()),
            CursorSession::Implicit(ref mut session) => session.take(),
        };
        let state = mem::take(&mut self.state);
        match state.info {
            Some(info) if !state.exhausted && !state.closed && info.id != 0 => {
                kill_cursor(self.client.clone(), info.ns, info.id, session);
            }
            _ => {
                if let Some(session) = session.filter(ClientSession::is_implicit) {
                    session.end_session();
                }
            }
        }
    }

    /// Sends `killCursors` if the server still holds the cursor, and marks it closed. The
    /// session is left untouched.
    pub(crate) async fn kill(&mut self) -> Result<()> {
        self.state.closed = true;
        if !self.state.is_alive_on_server() {
            return Ok(());
        }
        self.state.exhausted = true;
        let (ns, id) = match self.state.info {
            Some(ref info) => (info.ns.clone(), info.id),
            None => return Ok(()),
        };
        let mut op = KillCursors::new(ns, id);
        let session = self.session.get().filter(|session| !session.has_ended());
        self.client.execute_operation(&mut op, session).await
    }

    pub(crate) fn post_batch_resume_token(&self) -> Option<&ResumeToken> {
        self.state.post_batch_resume_token.as_ref()
    }

    /// The `operationTime` of the reply that opened this cursor.
    pub(crate) fn operation_time(&self) -> Option<Timestamp> {
        self.state.operation_time
    }

    /// Opens the cursor on the server if it hasn't been opened yet.
    pub(crate) async fn start(&mut self) -> Result<()> {
        if self.state.is_started() || self.state.closed {
            return Ok(());
        }

        let spec = match self.session {
            CursorSession::Explicit(ref session) => {
                self.source.execute(&self.client, Some(session)).await?.output
            }
            CursorSession::Implicit(Some(ref session)) => {
                self.source.execute(&self.client, Some(session)).await?.output
            }
            CursorSession::Implicit(None) => {
                let details = self.source.execute(&self.client, None).await?;
                self.session = CursorSession::Implicit(details.implicit_session);
                details.output
            }
        };

        let exhausted = spec.id() == 0;
        self.state = CursorState {
            exhausted,
            post_batch_resume_token: spec.post_batch_resume_token,
            operation_time: spec.operation_time,
            info: Some(spec.info),
            ..Default::default()
        };
        self.receive_batch(spec.initial_buffer).await;
        Ok(())
    }

    /// Fetches one more batch: opens the cursor if needed, otherwise sends a single `getMore`.
    /// Fetched documents are appended to the buffer.
    async fn fetch_batch(&mut self) -> Result<()> {
        if !self.state.is_started() {
            return self.start().await;
        }
        if !self.state.is_alive_on_server() || self.state.closed {
            return Ok(());
        }

        let mut op = match self.state.info {
            Some(ref info) => {
                GetMore::new(info, info.sizing.get_more_batch_size(self.state.returned))
            }
            None => return Ok(()),
        };

        match self
            .client
            .execute_operation(&mut op, self.session.get())
            .await
        {
            Ok(result) => {
                self.state.exhausted = result.exhausted;
                if let Some(ref mut info) = self.state.info {
                    if result.exhausted {
                        info.id = 0;
                    }
                }
                self.state.post_batch_resume_token = result.post_batch_resume_token;
                self.receive_batch(result.batch).await;
                Ok(())
            }
            Err(error) => {
                // The server no longer has the cursor, or the connection it lived on is gone.
                if error.is_network_error() || error.is_cursor_gone() {
                    self.state.exhausted = true;
                    self.session.end_implicit();
                }
                Err(error)
            }
        }
    }

    /// Appends a batch to the buffer, enforcing any limit and single batch request, and ends
    /// the implicit session once the cursor is exhausted.
    async fn receive_batch(&mut self, mut batch: VecDeque<Document>) {
        let sizing = match self.state.info {
            Some(ref info) => info.sizing,
            None => return,
        };

        if let Some(limit) = sizing.limit {
            let allowed = (limit as u64).saturating_sub(self.state.returned);
            if (batch.len() as u64) > allowed {
                batch.truncate(allowed as usize);
            }
        }
        self.state.returned += batch.len() as u64;
        self.state.buffer.extend(batch);

        if !self.state.exhausted
            && (sizing.single_batch || sizing.is_satisfied(self.state.returned))
        {
            if let Err(error) = self.kill().await {
                tracing::debug!(
                    target: CURSOR_TRACING_EVENT_TARGET,
                    error = %error,
                    "killCursors failed after the cursor returned its last batch"
                );
            }
            // The cursor isn't closed from the caller's point of view; buffered documents are
            // still returned.
            self.state.closed = false;
        }

        if self.state.exhausted {
            self.session.end_implicit();
        }
    }

    /// Returns the next buffered document, fetching at most one batch when the buffer is empty.
    pub(crate) async fn next_in_batch(&mut self) -> Result<BatchValue> {
        if self.state.buffer.is_empty() {
            if self.state.exhausted || self.state.closed {
                return Ok(BatchValue::Exhausted);
            }
            self.fetch_batch().await?;
        }

        match self.state.buffer.pop_front() {
            Some(doc) => Ok(BatchValue::Some {
                doc,
                is_last: self.state.buffer.is_empty(),
            }),
            None if self.state.exhausted || self.state.closed => Ok(BatchValue::Exhausted),
            None => Ok(BatchValue::Empty),
        }
    }

    /// Whether a subsequent call to [`Cursor::next`] would yield a document. Fetches batches
    /// until one is non-empty or the cursor is exhausted; nothing already buffered is discarded.
    pub async fn has_next(&mut self) -> Result<bool> {
        loop {
            if !self.state.buffer.is_empty() {
                return Ok(true);
            }
            if self.state.exhausted || self.state.closed {
                return Ok(false);
            }
            self.fetch_batch().await?;
        }
    }
}

impl<T: DeserializeOwned> Cursor<T> {
    /// Returns the next document, fetching further batches as needed. Returns `None` once the
    /// cursor is exhausted; that is not an error.
    pub async fn next(&mut self) -> Result<Option<T>> {
        loop {
            match self.next_in_batch().await? {
                BatchValue::Some { doc, .. } => return Ok(Some(crate::bson::from_document(doc)?)),
                BatchValue::Empty => continue,
                BatchValue::Exhausted => return Ok(None),
            }
        }
    }

    /// Like [`Cursor::next`], but performs at most one round trip: if the batch it fetches is
    /// empty (e.g. a tailable cursor with no new data), this returns `None` without retrying.
    pub async fn try_next(&mut self) -> Result<Option<T>> {
        match self.next_in_batch().await? {
            BatchValue::Some { doc, .. } => Ok(Some(crate::bson::from_document(doc)?)),
            BatchValue::Empty | BatchValue::Exhausted => Ok(None),
        }
    }

    /// Drains the cursor into a `Vec`. No further `getMore` is sent once the server reports the
    /// cursor exhausted.
    pub async fn to_vec(&mut self) -> Result<Vec<T>> {
        let mut docs = Vec::new();
        loop {
            for doc in self.state.buffer.drain(..) {
                docs.push(crate::bson::from_document(doc)?);
            }
            if self.state.exhausted || self.state.closed {
                return Ok(docs);
            }
            self.fetch_batch().await?;
        }
    }

    /// Calls `f` with every remaining document in order.
    pub async fn for_each(&mut self, mut f: impl FnMut(T)) -> Result<()> {
        while let Some(doc) = self.next().await? {
            f(doc);
        }
        Ok(())
    }

    /// Removes and returns up to `n` buffered documents without contacting the server.
    pub fn read_buffered_documents(&mut self, n: usize) -> Result<Vec<T>> {
        let n = n.min(self.state.buffer.len());
        self.state
            .buffer
            .drain(..n)
            .map(|doc| crate::bson::from_document(doc).map_err(Error::from))
            .collect()
    }

    /// Adapts this cursor into a [`Stream`] of its documents.
    pub fn stream(self) -> impl Stream<Item = Result<T>> {
        futures_util::stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.next().await?.map(|doc| (doc, cursor)))
        })
    }
}

impl<T> Clone for Cursor<T> {
    /// Returns a new, unopened cursor over the same command and options. Buffers and server-side
    /// state are not shared; an explicit session is.
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            source: self.source.clone(),
            session: self.session.for_clone(),
            state: CursorState::default(),
            _phantom: PhantomData,
        }
    }
}

impl<T> Drop for Cursor<T> {
    fn drop(&mut self) {
        if !self.state.is_alive_on_server() || self.state.closed {
            return;
        }
        let info = match self.state.info.take() {
            Some(info) => info,
            None => return,
        };
        let session = match mem::replace(&mut self.session, CursorSession::Implicit(None)) {
            CursorSession::Explicit(session) => Some(session),
            CursorSession::Implicit(session) => session,
        };
        kill_cursor(self.client.clone(), info.ns, info.id, session);
    }
}
