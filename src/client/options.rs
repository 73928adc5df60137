//! Contains the options for configuring a [`Client`](crate::Client) and the sessions it starts.

use typed_builder::TypedBuilder;

use crate::{
    concern::{ReadConcern, WriteConcern},
    event::{command::CommandEvent, EventHandler},
};

/// Contains the options that can be used to create a new [`Client`](crate::Client).
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct ClientOptions {
    /// The handler that should process all command-related events.
    ///
    /// Note that monitoring command events may incur a performance penalty.
    #[builder(setter(strip_option))]
    pub command_event_handler: Option<EventHandler<CommandEvent>>,

    /// The default read concern for operations performed on the Client. See the
    /// [`ReadConcern`] type documentation for more details.
    pub read_concern: Option<ReadConcern>,

    /// The default write concern for operations performed on the Client. See the
    /// [`WriteConcern`] type documentation for more details.
    pub write_concern: Option<WriteConcern>,

    /// Configures the maximum allowed length for serialized BSON documents in tracing events.
    /// If unset, defaults to 1000 bytes. Longer documents are truncated on a UTF-8 boundary and
    /// marked with a trailing `...`.
    pub tracing_max_document_length_bytes: Option<usize>,
}

/// Contains the options that can be used to create a new
/// [`ClientSession`](crate::ClientSession).
#[derive(Clone, Debug, Default, TypedBuilder)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct SessionOptions {
    /// If true, reads performed using this session will attach the session's operation time as
    /// `readConcern.afterClusterTime`, so that they observe every write the session has already
    /// seen acknowledged. Defaults to true for sessions started explicitly.
    pub causal_consistency: Option<bool>,
}
