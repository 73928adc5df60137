//! Contains the functionality for change streams.
pub mod event;
pub(crate) mod options;

use std::marker::PhantomData;

use derive_where::derive_where;
use futures_core::Stream;
use serde::de::DeserializeOwned;

use crate::{
    bson::{doc, Document, Timestamp},
    change_stream::{
        event::{ChangeStreamNotification, ResumeToken},
        options::ChangeStreamOptions,
    },
    cursor::{BatchValue, CursorSource},
    error::{Error, ErrorKind, Result},
    event::EventHandler,
    operation::{Aggregate, AggregateTarget, SERVER_4_0_0_WIRE_VERSION},
    trace::CHANGE_STREAM_TRACING_EVENT_TARGET,
    Client,
    ClientSession,
    Cursor,
};

/// A `ChangeStream` streams the ongoing changes of its associated collection, database or
/// deployment. `ChangeStream` instances should be created with method `watch` against the
/// relevant target.
///
/// `ChangeStream`s are "resumable", meaning that they can be restarted at a given place in the
/// stream of events. This is done automatically when the `ChangeStream` encounters certain
/// ["resumable"](https://github.com/mongodb/specifications/blob/master/source/change-streams/change-streams.md#resumable-error)
/// errors, such as transient network failures: the failed cursor is discarded and the
/// `aggregate` is re-issued from the last resume token, at most once per call. It can also be
/// done manually by passing a [`ResumeToken`] retrieved from a past event into either the
/// [`resume_after`](ChangeStreamOptions::resume_after) or
/// [`start_after`](ChangeStreamOptions::start_after) options used to create the `ChangeStream`.
///
/// A `ChangeStream` is lazy: the `aggregate` is sent on first iteration.
///
/// ```rust
/// # use mongodb_cursor_core::{bson::{doc, Document}, error::Result, Collection};
/// # async fn func(coll: Collection<Document>) -> Result<()> {
/// let mut change_stream = coll.watch(None, None);
/// while let Some(event) = change_stream.next().await? {
///     println!("operation performed: {:?}, document: {:?}", event.operation_type, event.full_document);
/// }
/// #
/// # Ok(())
/// # }
/// ```
///
/// An unrecoverable error is returned once; the stream is closed afterwards and further calls
/// return `Ok(None)`.
///
/// See the documentation [here](https://www.mongodb.com/docs/manual/changeStreams) for more
/// details.
#[derive_where(Debug)]
pub struct ChangeStream<T> {
    /// The cursor to iterate over event instances. `None` until the first `aggregate` is sent.
    cursor: Option<Cursor<Document>>,

    /// The client that was used for the initial `$changeStream` aggregation, used to re-issue it
    /// during an automatic resume.
    client: Client,

    /// Arguments to `watch` that created this change stream.
    args: WatchArgs,

    /// The session supplied by the caller, carried over to resumed cursors.
    session: Option<ClientSession>,

    /// Dynamic information associated with this change stream.
    data: ChangeStreamData,

    notification_handler: Option<EventHandler<ChangeStreamNotification>>,

    closed: bool,

    #[derive_where(skip)]
    _phantom: PhantomData<fn() -> T>,
}

/// Arguments passed to a `watch` method, captured to allow resume.
#[derive(Debug, Clone)]
pub(crate) struct WatchArgs {
    /// The pipeline of stages to append to an initial `$changeStream` stage.
    pub(crate) pipeline: Vec<Document>,

    /// The original target of the change stream.
    pub(crate) target: AggregateTarget,

    /// The options provided to the initial `$changeStream` stage.
    pub(crate) options: Option<ChangeStreamOptions>,
}

/// Dynamic change stream data needed for resume.
#[derive(Debug, Default)]
struct ChangeStreamData {
    /// The `operationTime` returned by the initial `aggregate` command, or the
    /// `start_at_operation_time` the stream was created with.
    initial_operation_time: Option<Timestamp>,

    /// The cached resume token.
    resume_token: Option<ResumeToken>,

    /// Whether or not the change stream has returned a document, used to update resume token
    /// during an automatic resume.
    document_returned: bool,

    /// Whether an `aggregate` has ever succeeded for this stream. Failures of the very first one
    /// are never resumed from.
    initialized: bool,
}

impl<T> ChangeStream<T> {
    pub(crate) fn new(args: WatchArgs, client: Client, session: Option<ClientSession>) -> Self {
        let options = args.options.as_ref();
        let data = ChangeStreamData {
            resume_token: options
                .and_then(|o| o.start_after.as_ref().or(o.resume_after.as_ref()))
                .cloned(),
            initial_operation_time: options.and_then(|o| o.start_at_operation_time),
            ..Default::default()
        };
        let notification_handler = options.and_then(|o| o.notification_handler.clone());
        Self {
            cursor: None,
            client,
            args,
            session,
            data,
            notification_handler,
            closed: false,
            _phantom: PhantomData,
        }
    }

    /// Returns the cached resume token that can be used to resume after the most recently returned
    /// change.
    ///
    /// See the documentation
    /// [here](https://www.mongodb.com/docs/manual/changeStreams/#change-stream-resume-token) for more
    /// information on change stream resume tokens.
    pub fn resume_token(&self) -> Option<ResumeToken> {
        self.data.resume_token.clone()
    }

    /// Update the type streamed values will be parsed as.
    pub fn with_type<D: DeserializeOwned>(self) -> ChangeStream<D> {
        ChangeStream {
            cursor: self.cursor,
            client: self.client,
            args: self.args,
            session: self.session,
            data: self.data,
            notification_handler: self.notification_handler,
            closed: self.closed,
            _phantom: PhantomData,
        }
    }

    /// Returns whether the change stream will continue to receive events.
    pub fn is_alive(&self) -> bool {
        !self.closed
    }

    /// Closes the change stream, killing its server-side cursor if there is one. Closing a
    /// stream again has no effect.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close().await;
        }
        self.notify(ChangeStreamNotification::Closed);
    }

    fn notify(&self, notification: ChangeStreamNotification) {
        if let Some(ref handler) = self.notification_handler {
            handler.handle(notification);
        }
    }

    fn set_resume_token(&mut self, token: ResumeToken) {
        if self.data.resume_token.as_ref() == Some(&token) {
            return;
        }
        self.data.resume_token = Some(token.clone());
        self.notify(ChangeStreamNotification::ResumeTokenChanged(token));
    }

    /// Builds the `aggregate` that (re)opens the stream. Once the stream has been opened, the
    /// resume options are derived from the cached token instead of the ones it was created with.
    fn build_aggregate(&self) -> Result<Aggregate> {
        let mut options = self.args.options.clone().unwrap_or_default();

        if self.data.initialized {
            let start_after = options.start_after.take().is_some();
            options.resume_after = None;
            options.start_at_operation_time = None;
            match self.data.resume_token {
                Some(ref token) if start_after && !self.data.document_returned => {
                    options.start_after = Some(token.clone());
                }
                Some(ref token) => options.resume_after = Some(token.clone()),
                None => options.start_at_operation_time = self.data.initial_operation_time,
            }
        }

        let stage = crate::bson::to_document(&options)?;
        let pipeline = std::iter::once(doc! { "$changeStream": stage })
            .chain(self.args.pipeline.iter().cloned());
        Ok(Aggregate::new(
            self.args.target.clone(),
            pipeline,
            Some(options.aggregate_options()),
        ))
    }

    /// Opens a new cursor for the stream and records what the reply tells us about its
    /// position.
    async fn open_cursor(&mut self) -> Result<()> {
        let aggregate = self.build_aggregate()?;
        let cursor = self.cursor.insert(Cursor::new(
            self.client.clone(),
            CursorSource::Aggregate(aggregate),
            self.session.clone(),
        ));
        cursor.start().await?;

        let operation_time = cursor.operation_time();
        let empty_batch_token = if cursor.buffered_count() == 0 {
            cursor.post_batch_resume_token().cloned()
        } else {
            None
        };
        if let Some(token) = empty_batch_token {
            self.set_resume_token(token);
        }
        let has_start_option = self.args.options.as_ref().map_or(false, |o| {
            o.resume_after.is_some()
                || o.start_after.is_some()
                || o.start_at_operation_time.is_some()
        });
        if !self.data.initialized
            && !has_start_option
            && self
                .client
                .stream_description()
                .wire_version_at_least(SERVER_4_0_0_WIRE_VERSION)
        {
            self.data.initial_operation_time = operation_time;
        }
        self.data.initialized = true;
        Ok(())
    }

    /// Discards the current cursor and re-opens the stream from the cached resume token.
    async fn resume(&mut self, error: Error) -> Result<()> {
        tracing::debug!(
            target: CHANGE_STREAM_TRACING_EVENT_TARGET,
            error = %error,
            "Resuming change stream"
        );
        if let Some(mut cursor) = self.cursor.take() {
            if let Err(kill_error) = cursor.kill().await {
                tracing::debug!(
                    target: CHANGE_STREAM_TRACING_EVENT_TARGET,
                    error = %kill_error,
                    "killCursors failed while resuming change stream"
                );
            }
        }
        self.open_cursor().await?;
        self.notify(ChangeStreamNotification::Resumed { error });
        Ok(())
    }

    /// Reports an unrecoverable error and closes the stream.
    async fn fail(&mut self, error: Error) -> Error {
        self.notify(ChangeStreamNotification::Error(error.clone()));
        self.close().await;
        error
    }

    /// Fetches the next document of the current batch, opening or resuming the stream as
    /// needed. Performs at most one `getMore` and at most one resume.
    async fn next_batch_value(&mut self) -> Result<Option<BatchValue>> {
        let mut resume_attempted = false;
        loop {
            if self.closed {
                return Ok(None);
            }

            let result = match self.cursor {
                Some(ref mut cursor) => cursor.next_in_batch().await,
                None => match self.open_cursor().await {
                    // An empty first batch counts as this call's round trip.
                    Ok(()) if self.cursor.as_ref().map_or(false, |c| c.buffered_count() == 0) => {
                        return Ok(Some(BatchValue::Empty));
                    }
                    Ok(()) => continue,
                    Err(error) => Err(error),
                },
            };

            match result {
                Ok(value) => return Ok(Some(value)),
                Err(error) if self.data.initialized && !resume_attempted && error.is_resumable() => {
                    resume_attempted = true;
                    if let Err(resume_error) = self.resume(error).await {
                        if resume_error.is_resumable() {
                            return Err(resume_error);
                        }
                        return Err(self.fail(resume_error).await);
                    }
                }
                Err(error) => {
                    if self.data.initialized && error.is_resumable() {
                        return Err(error);
                    }
                    return Err(self.fail(error).await);
                }
            }
        }
    }

    /// Fetches the next raw change, updating the resume token. Returns `Ok(None)` when a round
    /// trip returned no changes or the stream is closed.
    async fn next_if_any(&mut self) -> Result<Option<Document>> {
        let value = match self.next_batch_value().await? {
            Some(value) => value,
            None => return Ok(None),
        };

        let batch_token = self
            .cursor
            .as_ref()
            .and_then(|c| c.post_batch_resume_token())
            .cloned();

        match value {
            BatchValue::Some { doc, is_last } => {
                let doc_token = match doc.get("_id") {
                    Some(id) => ResumeToken(id.clone()),
                    None => {
                        return Err(self.fail(ErrorKind::MissingResumeToken.into()).await);
                    }
                };
                let token = match batch_token {
                    Some(batch_token) if is_last => batch_token,
                    _ => doc_token,
                };
                self.set_resume_token(token);
                self.data.document_returned = true;
                Ok(Some(doc))
            }
            BatchValue::Empty => {
                if let Some(token) = batch_token {
                    self.set_resume_token(token);
                }
                Ok(None)
            }
            BatchValue::Exhausted => {
                self.close().await;
                Ok(None)
            }
        }
    }
}

impl<T: DeserializeOwned> ChangeStream<T> {
    /// Returns the next change, waiting (issuing `getMore`s) until one is available. Resumable
    /// errors are recovered from transparently.
    ///
    /// Returns `Ok(None)` once the stream is closed.
    pub async fn next(&mut self) -> Result<Option<T>> {
        loop {
            if let Some(doc) = self.next_if_any().await? {
                return Ok(Some(crate::bson::from_document(doc)?));
            }
            if self.closed {
                return Ok(None);
            }
        }
    }

    /// Returns the next change if one is available after at most one round trip to the server.
    /// The resume token is updated even when no change is returned.
    pub async fn try_next(&mut self) -> Result<Option<T>> {
        match self.next_if_any().await? {
            Some(doc) => Ok(Some(crate::bson::from_document(doc)?)),
            None => Ok(None),
        }
    }

    /// Adapts this change stream into a [`Stream`] of its changes.
    pub fn stream(self) -> impl Stream<Item = Result<T>> {
        futures_util::stream::try_unfold(self, |mut stream| async move {
            Ok(stream.next().await?.map(|change| (change, stream)))
        })
    }
}
