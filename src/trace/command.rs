use crate::{
    bson::{oid::ObjectId, Document},
    event::command::CommandEvent,
    trace::{serialize_command_or_reply, TracingRepresentation, COMMAND_TRACING_EVENT_TARGET},
};

use super::DEFAULT_MAX_DOCUMENT_LENGTH_BYTES;

/// Writes command monitoring events to `tracing` at debug level. Command and reply documents are
/// rendered as relaxed extended JSON, cut to the configured length.
pub(crate) struct CommandTracer {
    client_id: String,
    wire_version: Option<i32>,
    max_document_length_bytes: usize,
}

impl CommandTracer {
    /// Returns `None` unless a subscriber is listening on the command target.
    pub(crate) fn if_enabled(
        client_id: ObjectId,
        wire_version: Option<i32>,
        max_document_length_bytes: Option<usize>,
    ) -> Option<Self> {
        if !tracing::enabled!(
            target: COMMAND_TRACING_EVENT_TARGET,
            tracing::Level::DEBUG
        ) {
            return None;
        }
        Some(Self {
            client_id: client_id.tracing_representation(),
            wire_version,
            max_document_length_bytes: max_document_length_bytes
                .unwrap_or(DEFAULT_MAX_DOCUMENT_LENGTH_BYTES),
        })
    }

    fn render(&self, doc: &Document) -> String {
        serialize_command_or_reply(doc, self.max_document_length_bytes)
    }

    pub(crate) fn trace(&self, event: &CommandEvent) {
        match event {
            CommandEvent::Started(started) => tracing::debug!(
                target: COMMAND_TRACING_EVENT_TARGET,
                clientId = %self.client_id,
                wireVersion = ?self.wire_version,
                requestId = started.request_id,
                databaseName = %started.db,
                commandName = %started.command_name,
                command = %self.render(&started.command),
                "Command started"
            ),
            CommandEvent::Succeeded(succeeded) => tracing::debug!(
                target: COMMAND_TRACING_EVENT_TARGET,
                clientId = %self.client_id,
                wireVersion = ?self.wire_version,
                requestId = succeeded.request_id,
                commandName = %succeeded.command_name,
                durationMS = succeeded.duration.as_millis(),
                reply = %self.render(&succeeded.reply),
                "Command succeeded"
            ),
            CommandEvent::Failed(failed) => tracing::debug!(
                target: COMMAND_TRACING_EVENT_TARGET,
                clientId = %self.client_id,
                wireVersion = ?self.wire_version,
                requestId = failed.request_id,
                commandName = %failed.command_name,
                durationMS = failed.duration.as_millis(),
                networkError = failed.failure.is_network_error(),
                failure = %failed.failure.tracing_representation(),
                "Command failed"
            ),
        }
    }
}
