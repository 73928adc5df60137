use std::{
    sync::atomic::{AtomicI32, Ordering},
    time::Instant,
};

use crate::{
    bson::Document,
    error::{Error, ErrorKind, Result},
    event::command::{
        CommandEvent,
        CommandFailedEvent,
        CommandStartedEvent,
        CommandSucceededEvent,
    },
    operation::Operation,
    trace::{command::CommandTracer, SESSION_TRACING_EVENT_TARGET},
    transport::command::RawCommandResponse,
    Client,
    ClientSession,
};

/// Servers below this wire version (3.6) don't understand `$clusterTime`.
const CLUSTER_TIME_MIN_WIRE_VERSION: i32 = 6;

static REQUEST_ID: AtomicI32 = AtomicI32::new(1);

/// Request ids are unique across all clients in the process.
pub(crate) fn next_request_id() -> i32 {
    REQUEST_ID.fetch_add(1, Ordering::SeqCst)
}

/// The output of an operation, along with the implicit session it was run with, if any.
pub(crate) struct ExecutionDetails<O> {
    pub(crate) output: O,
    pub(crate) implicit_session: Option<ClientSession>,
}

impl Client {
    /// Execute the given operation.
    ///
    /// An implicit session will be created if the operation and write concern are compatible
    /// with sessions and an explicit session is not provided.
    pub(crate) async fn execute_operation<T: Operation>(
        &self,
        op: &mut T,
        session: impl Into<Option<&ClientSession>>,
    ) -> Result<T::O> {
        self.execute_operation_with_details(op, session)
            .await
            .map(|details| details.output)
    }

    /// Execute the given operation, returning the implicit session created for it if one was.
    ///
    /// Callers that keep server-side state alive across several commands (i.e. cursors) hold
    /// on to that session so the follow-up commands carry the same `lsid`.
    pub(crate) async fn execute_operation_with_details<T: Operation>(
        &self,
        op: &mut T,
        session: impl Into<Option<&ClientSession>>,
    ) -> Result<ExecutionDetails<T::O>> {
        if self.is_shutdown() {
            return Err(ErrorKind::Shutdown.into());
        }

        match session.into() {
            Some(session) => {
                session.check_usable(self)?;
                if !op.is_acknowledged() {
                    return Err(Error::invalid_argument(
                        "Cannot use ClientSessions with unacknowledged write concern",
                    ));
                }
                let output = self.execute_operation_on_transport(op, Some(session)).await?;
                Ok(ExecutionDetails {
                    output,
                    implicit_session: None,
                })
            }
            None => {
                let implicit_session = self.start_implicit_session(op);
                let output = self
                    .execute_operation_on_transport(op, implicit_session.as_ref())
                    .await?;
                Ok(ExecutionDetails {
                    output,
                    implicit_session,
                })
            }
        }
    }

    /// Builds the command for `op`, stamps it with session and cluster time metadata, sends it,
    /// and interprets the reply. Command monitoring events are emitted around the round trip.
    pub(crate) async fn execute_operation_on_transport<T: Operation>(
        &self,
        op: &mut T,
        session: Option<&ClientSession>,
    ) -> Result<T::O> {
        let description = self.inner.transport.description();
        let wire_version = description.max_wire_version;

        let mut cmd = op.build(&description)?;

        if let Some(session) = session.filter(|_| op.supports_sessions()) {
            cmd.set_session(session.id().clone());
            session.update_last_use();
            if session.causal_consistency() && op.supports_read_concern(&description) {
                if let Some(operation_time) = session.operation_time() {
                    cmd.set_after_cluster_time(operation_time)?;
                }
            }
        }

        if description.wire_version_at_least(CLUSTER_TIME_MIN_WIRE_VERSION) {
            let session_cluster_time = match session.and_then(ClientSession::cluster_time) {
                Some(cluster_time) => {
                    cluster_time.validate()?;
                    Some(cluster_time)
                }
                None => None,
            };
            if let Some(cluster_time) =
                std::cmp::max(session_cluster_time, self.cluster_time())
            {
                cmd.set_cluster_time(&cluster_time)?;
            }
        }

        let request_id = next_request_id();
        let should_redact = cmd.should_redact();
        let command_name = cmd.name.clone();
        let target_db = cmd.target_db.clone();

        self.emit_command_event(|| {
            let command_body = if should_redact {
                Document::new()
            } else {
                cmd.body.clone()
            };
            CommandEvent::Started(CommandStartedEvent {
                command: command_body,
                db: target_db.clone(),
                command_name: command_name.clone(),
                request_id,
            })
        });

        let start_time = Instant::now();
        let send_result = if op.is_acknowledged() {
            self.inner
                .transport
                .send_command(&target_db, cmd.body)
                .await
                .map(RawCommandResponse::new)
        } else {
            self.inner
                .transport
                .send_unacknowledged(&target_db, cmd.body)
                .await
                .map(|()| RawCommandResponse::unacknowledged())
        };
        let duration = start_time.elapsed();

        let response = match send_result {
            Ok(response) => response,
            Err(error) => {
                if error.is_network_error() {
                    if let Some(session) = session {
                        session.mark_dirty();
                    }
                }
                let error = error.with_wire_version(wire_version);
                self.emit_command_event(|| {
                    CommandEvent::Failed(CommandFailedEvent {
                        duration,
                        command_name: command_name.clone(),
                        failure: error.clone(),
                        request_id,
                    })
                });
                return op.handle_error(error);
            }
        };

        // Failed replies gossip cluster times too.
        self.update_cluster_time(&response, session);
        if let (Some(session), Some(operation_time)) = (session, response.operation_time()) {
            session.advance_operation_time(operation_time);
        }

        match response.validate() {
            Ok(()) => {
                self.emit_command_event(|| {
                    let reply = if should_redact {
                        Document::new()
                    } else {
                        response.raw().clone()
                    };
                    CommandEvent::Succeeded(CommandSucceededEvent {
                        duration,
                        reply,
                        command_name: command_name.clone(),
                        request_id,
                    })
                });
                op.handle_response(response, &description)
                    .map_err(|e| e.with_wire_version(wire_version))
            }
            Err(error) => {
                let error = error.with_wire_version(wire_version);
                self.emit_command_event(|| {
                    CommandEvent::Failed(CommandFailedEvent {
                        duration,
                        command_name: command_name.clone(),
                        failure: error.clone(),
                        request_id,
                    })
                });
                op.handle_error(error)
            }
        }
    }

    fn update_cluster_time(&self, response: &RawCommandResponse, session: Option<&ClientSession>) {
        match response.cluster_time() {
            Some(Ok(cluster_time)) => {
                self.advance_cluster_time(&cluster_time);
                if let Some(session) = session {
                    session.advance_cluster_time(&cluster_time);
                }
            }
            Some(Err(error)) => {
                tracing::warn!(
                    target: SESSION_TRACING_EVENT_TARGET,
                    error = %error,
                    "Ignoring malformed $clusterTime in server reply"
                );
            }
            None => {}
        }
    }

    fn emit_command_event(&self, generate_event: impl FnOnce() -> CommandEvent) {
        let tracer = CommandTracer::if_enabled(
            self.inner.id,
            self.inner.transport.description().max_wire_version,
            self.inner.options.tracing_max_document_length_bytes,
        );
        let handler = self.inner.options.command_event_handler.as_ref();
        if tracer.is_none() && handler.is_none() {
            return;
        }

        let event = generate_event();
        if let Some(tracer) = tracer {
            tracer.trace(&event);
        }
        if let Some(handler) = handler {
            handler.handle(event);
        }
    }
}
