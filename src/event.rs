//! Contains the events and functionality for monitoring `Client` behavior.

pub mod command;

use std::sync::Arc;

use futures_core::future::BoxFuture;

/// A destination for events.  Allows implicit conversion via [`From`] for concrete types for
/// convenience with [`crate::options::ClientOptions`] construction:
///
/// ```rust
/// # use mongodb_cursor_core::options::ClientOptions;
/// # fn example() {
/// let (tx, mut rx) = tokio::sync::mpsc::channel(100);
/// tokio::spawn(async move {
///     while let Some(ev) = rx.recv().await {
///         println!("{:?}", ev);
///     }
/// });
/// let options = ClientOptions::builder()
///                 .command_event_handler(tx)
///                 .build();
/// # }
/// ```
///
/// or explicit construction for `Fn` traits:
///
/// ```rust
/// # use mongodb_cursor_core::options::ClientOptions;
/// # use mongodb_cursor_core::event::EventHandler;
/// # fn example() {
/// let options = ClientOptions::builder()
///                 .command_event_handler(EventHandler::callback(|ev| println!("{:?}", ev)))
///                 .build();
/// # }
/// ```
#[derive(Clone)]
#[non_exhaustive]
pub enum EventHandler<T> {
    /// A callback, invoked synchronously at the point the event occurs.
    Callback(Arc<dyn Fn(T) + Sync + Send>),
    /// An async callback, spawned onto the current runtime.
    AsyncCallback(Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Sync + Send>),
    /// A `tokio` channel sender.
    TokioMpsc(tokio::sync::mpsc::Sender<T>),
}

impl<T> std::fmt::Debug for EventHandler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventHandler").finish()
    }
}

impl<T> From<tokio::sync::mpsc::Sender<T>> for EventHandler<T> {
    fn from(value: tokio::sync::mpsc::Sender<T>) -> Self {
        Self::TokioMpsc(value)
    }
}

impl<T: Send + Sync + 'static> EventHandler<T> {
    /// Construct a new event handler with a callback.
    pub fn callback(f: impl Fn(T) + Send + Sync + 'static) -> Self {
        Self::Callback(Arc::new(f))
    }

    /// Construct a new event handler with an async callback.
    pub fn async_callback(f: impl Fn(T) -> BoxFuture<'static, ()> + Send + Sync + 'static) -> Self {
        Self::AsyncCallback(Arc::new(f))
    }

    pub(crate) fn handle(&self, event: T) {
        match self {
            Self::Callback(cb) => (cb)(event),
            Self::AsyncCallback(cb) => {
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn((cb)(event));
                }
            }
            Self::TokioMpsc(sender) => {
                // Only a full channel falls back to a spawned send.
                if let Err(tokio::sync::mpsc::error::TrySendError::Full(event)) =
                    sender.try_send(event)
                {
                    if let Ok(handle) = tokio::runtime::Handle::try_current() {
                        let sender = sender.clone();
                        handle.spawn(async move {
                            let _ = sender.send(event).await;
                        });
                    }
                }
            }
        }
    }
}
