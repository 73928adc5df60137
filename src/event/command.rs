//! Contains the events and functionality for monitoring the commands and responses that a
//! `Client` sends and receives from the server.

use std::time::Duration;

use crate::{bson::Document, error::Error};

/// An event that triggers when a database command is initiated.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandStartedEvent {
    /// The command being run.
    pub command: Document,

    /// The name of the database the command is being run against.
    pub db: String,

    /// The type of command being run, e.g. "find" or "getMore".
    pub command_name: String,

    /// The client-generated identifier for the request. Applications can use this to identify
    /// the corresponding event triggered by the completion of this command (i.e. either
    /// `CommandSucceededEvent` or `CommandFailedEvent`).
    pub request_id: i32,
}

/// An event that triggers when a database command completes without an error.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandSucceededEvent {
    /// The total execution time of the command (including the network round-trip).
    pub duration: Duration,

    /// The server's reply to the command. Unacknowledged writes report `{ ok: 1 }`.
    pub reply: Document,

    /// The type of command that was run, e.g. "find" or "getMore".
    pub command_name: String,

    /// The client-generated identifier for the request. Applications can use this to identify
    /// the corresponding `CommandStartedEvent` that triggered earlier.
    pub request_id: i32,
}

/// An event that triggers when a command failed to complete successfully.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct CommandFailedEvent {
    /// The total execution time of the command (including the network round-trip).
    pub duration: Duration,

    /// The type of command that was run, e.g. "find" or "getMore".
    pub command_name: String,

    /// The error that the client returned due to the event failing.
    pub failure: Error,

    /// The client-generated identifier for the request. Applications can use this to identify
    /// the corresponding `CommandStartedEvent` that triggered earlier.
    pub request_id: i32,
}

/// Usage of this enum is the same as the individual event types it wraps.
#[derive(Clone, Debug)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum CommandEvent {
    Started(CommandStartedEvent),
    Succeeded(CommandSucceededEvent),
    Failed(CommandFailedEvent),
}

impl CommandEvent {
    /// The name of the command this event describes.
    pub fn command_name(&self) -> &str {
        match self {
            CommandEvent::Started(event) => event.command_name.as_str(),
            CommandEvent::Succeeded(event) => event.command_name.as_str(),
            CommandEvent::Failed(event) => event.command_name.as_str(),
        }
    }

    /// The request id shared by a started event and its matching completion event.
    pub fn request_id(&self) -> i32 {
        match self {
            CommandEvent::Started(event) => event.request_id,
            CommandEvent::Succeeded(event) => event.request_id,
            CommandEvent::Failed(event) => event.request_id,
        }
    }
}
