//! The seam between this crate and the code that actually talks to a server.

pub(crate) mod command;

use std::time::Duration;

use futures_core::future::BoxFuture;
use typed_builder::TypedBuilder;

use crate::{
    bson::Document,
    bson_util,
    error::{Error, Result},
};

/// A connection (or pool of connections) to a MongoDB deployment.
///
/// Implementations own the wire protocol: framing, compression, authentication, server
/// selection and pooling. A [`Client`](crate::Client) hands a fully built command document to
/// the transport and expects the server's reply document back.
///
/// Transport-level failures (connection reset, socket timeout, ...) should be reported with
/// [`Error::network`] so that change streams can classify them as resumable and sessions used
/// with them are discarded instead of pooled.
pub trait Transport: Send + Sync + 'static {
    /// Describes the server commands are currently routed to.
    fn description(&self) -> StreamDescription;

    /// Sends `command` to the database `db` and returns the server's reply, whether or not the
    /// reply reports `ok: 1`.
    fn send_command<'a>(&'a self, db: &'a str, command: Document)
        -> BoxFuture<'a, Result<Document>>;

    /// Sends `command` to the database `db` using fire-and-forget framing. The server sends no
    /// reply.
    fn send_unacknowledged<'a>(&'a self, db: &'a str, command: Document)
        -> BoxFuture<'a, Result<()>>;
}

/// Contains information about a given server in a format digestible by a `Client`.
#[derive(Clone, Debug, PartialEq, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
#[non_exhaustive]
pub struct StreamDescription {
    /// The maximum wire version that the server understands.
    #[builder(default = Some(21))]
    pub max_wire_version: Option<i32>,

    /// The minimum wire version that the server understands.
    #[builder(default)]
    pub min_wire_version: Option<i32>,

    /// How long sessions started on this server will stay alive without executing an operation
    /// before the server kills them. Servers that don't report this don't support sessions.
    #[builder(default = Some(Duration::from_secs(30 * 60)))]
    pub logical_session_timeout: Option<Duration>,

    /// The maximum size of a single document the server accepts.
    #[builder(default = 16 * 1024 * 1024)]
    pub max_bson_object_size: i64,

    /// The maximum number of inserts, updates, or deletes that can be included in a write
    /// batch.
    #[builder(default = 100_000)]
    pub max_write_batch_size: i64,

    /// The maximum permitted size of a BSON wire protocol message.
    #[builder(default = 48_000_000)]
    pub max_message_size_bytes: i32,
}

impl Default for StreamDescription {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl StreamDescription {
    /// Constructs a `StreamDescription` from the reply to a `hello` command.
    pub fn from_hello_reply(reply: &Document) -> Result<Self> {
        let int_field = |key: &str| reply.get(key).and_then(bson_util::get_int);

        let max_wire_version = int_field("maxWireVersion")
            .map(i32::try_from)
            .transpose()
            .map_err(|_| Error::invalid_response("maxWireVersion out of range"))?;
        let min_wire_version = int_field("minWireVersion")
            .map(i32::try_from)
            .transpose()
            .map_err(|_| Error::invalid_response("minWireVersion out of range"))?;
        let logical_session_timeout = int_field("logicalSessionTimeoutMinutes")
            .and_then(|mins| u64::try_from(mins).ok())
            .map(|mins| Duration::from_secs(mins * 60));

        let defaults = Self::default();
        Ok(Self {
            max_wire_version,
            min_wire_version,
            logical_session_timeout,
            max_bson_object_size: int_field("maxBsonObjectSize")
                .unwrap_or(defaults.max_bson_object_size),
            // mongocryptd omits this field.
            max_write_batch_size: int_field("maxWriteBatchSize")
                .unwrap_or(defaults.max_write_batch_size),
            max_message_size_bytes: int_field("maxMessageSizeBytes")
                .and_then(|n| i32::try_from(n).ok())
                .unwrap_or(defaults.max_message_size_bytes),
        })
    }

    /// Whether the server supports logical sessions.
    pub(crate) fn supports_sessions(&self) -> bool {
        self.logical_session_timeout.is_some()
    }

    pub(crate) fn wire_version_at_least(&self, version: i32) -> bool {
        self.max_wire_version.map_or(false, |v| v >= version)
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::StreamDescription;
    use crate::bson::doc;

    #[test]
    fn from_hello_reply() {
        let reply = doc! {
            "isWritablePrimary": true,
            "maxWireVersion": 8,
            "minWireVersion": 0,
            "logicalSessionTimeoutMinutes": 30,
            "maxBsonObjectSize": 16777216,
            "maxMessageSizeBytes": 48000000,
            "ok": 1,
        };
        let description = StreamDescription::from_hello_reply(&reply).unwrap();
        assert_eq!(description.max_wire_version, Some(8));
        assert_eq!(description.min_wire_version, Some(0));
        assert_eq!(
            description.logical_session_timeout,
            Some(Duration::from_secs(30 * 60))
        );
        assert_eq!(description.max_write_batch_size, 100_000);
        assert!(description.supports_sessions());
    }

    #[test]
    fn standalone_without_sessions() {
        let description =
            StreamDescription::from_hello_reply(&doc! { "maxWireVersion": 6, "ok": 1 }).unwrap();
        assert!(!description.supports_sessions());
        assert!(!description.wire_version_at_least(7));
    }
}
