mod event_buffer;
mod mock;

pub(crate) use self::{
    event_buffer::EventBuffer,
    mock::{
        command_error,
        cursor_reply,
        cursor_reply_with_token,
        get_more_reply,
        get_more_reply_with_token,
        network_error,
        MockTransport,
    },
};

use crate::{event::command::CommandEvent, options::ClientOptions, Client};

/// A client over `transport` whose command events are captured in the returned buffer.
pub(crate) fn event_client(transport: &MockTransport) -> (Client, EventBuffer<CommandEvent>) {
    event_client_with_options(transport, ClientOptions::default())
}

pub(crate) fn event_client_with_options(
    transport: &MockTransport,
    mut options: ClientOptions,
) -> (Client, EventBuffer<CommandEvent>) {
    let buffer = EventBuffer::new();
    options.command_event_handler = Some(buffer.handler());
    (Client::with_transport(transport.clone(), options), buffer)
}
