use serde::de::DeserializeOwned;

use crate::{
    bson::{Bson, Document, Timestamp},
    bson_util,
    client::session::ClusterTime,
    concern::ReadConcernInternal,
    error::{Error, Result},
    operation::CommandErrorBody,
};

/// Commands whose bodies and replies are never published to monitoring.
pub(crate) const REDACTED_COMMANDS: [&str; 9] = [
    "authenticate",
    "saslstart",
    "saslcontinue",
    "getnonce",
    "createuser",
    "updateuser",
    "copydbgetnonce",
    "copydbsaslstart",
    "copydb",
];

/// `Command` is a client side abstraction of a server command containing all the information
/// necessary to hand it to a `Transport`.
#[derive(Debug, Clone)]
pub(crate) struct Command {
    pub(crate) name: String,
    pub(crate) target_db: String,
    pub(crate) body: Document,
}

impl Command {
    pub(crate) fn new(name: impl Into<String>, target_db: impl Into<String>, body: Document) -> Self {
        Self {
            name: name.into(),
            target_db: target_db.into(),
            body,
        }
    }

    pub(crate) fn set_session(&mut self, session_id: Document) {
        self.body.insert("lsid", session_id);
    }

    pub(crate) fn set_cluster_time(&mut self, cluster_time: &ClusterTime) -> Result<()> {
        let doc = crate::bson::to_bson(cluster_time)?;
        self.body.insert("$clusterTime", doc);
        Ok(())
    }

    /// Merges `afterClusterTime` into the command's read concern, keeping any level already set.
    pub(crate) fn set_after_cluster_time(&mut self, timestamp: Timestamp) -> Result<()> {
        let mut read_concern: ReadConcernInternal = match self.body.get("readConcern") {
            Some(Bson::Document(rc)) => crate::bson::from_document(rc.clone())?,
            _ => ReadConcernInternal::default(),
        };
        read_concern.after_cluster_time = Some(timestamp);
        self.body
            .insert("readConcern", crate::bson::to_document(&read_concern)?);
        Ok(())
    }

    pub(crate) fn should_redact(&self) -> bool {
        let name = self.name.to_lowercase();
        REDACTED_COMMANDS.contains(&name.as_str())
    }
}

/// A server reply that hasn't been interpreted yet.
#[derive(Debug, Clone)]
pub(crate) struct RawCommandResponse {
    raw: Document,
}

impl RawCommandResponse {
    pub(crate) fn new(raw: Document) -> Self {
        Self { raw }
    }

    /// An `{ ok: 1 }` reply standing in for the response an unacknowledged write never gets.
    pub(crate) fn unacknowledged() -> Self {
        Self::new(crate::bson::doc! { "ok": 1 })
    }

    /// Returns whether this response indicates a success or not (i.e. if "ok: 1")
    pub(crate) fn is_success(&self) -> bool {
        match self.raw.get("ok") {
            Some(b) => bson_util::get_int(b) == Some(1),
            None => false,
        }
    }

    /// Returns a result indicating whether this response corresponds to a command failure.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.is_success() {
            return Ok(());
        }
        let error_body: CommandErrorBody = crate::bson::from_document(self.raw.clone())
            .map_err(|_| Error::invalid_response("invalid server response"))?;
        Err(error_body.into())
    }

    /// Deserialize the body of the response.
    pub(crate) fn body<T: DeserializeOwned>(&self) -> Result<T> {
        crate::bson::from_document(self.raw.clone())
            .map_err(|e| Error::invalid_response(format!("{}", e)))
    }

    /// The `$clusterTime` this reply gossips, if any. Malformed values are rejected.
    pub(crate) fn cluster_time(&self) -> Option<Result<ClusterTime>> {
        match self.raw.get("$clusterTime") {
            Some(Bson::Document(doc)) => Some(ClusterTime::from_document(doc)),
            Some(_) => Some(Err(Error::invalid_response(
                "$clusterTime must be a document",
            ))),
            None => None,
        }
    }

    pub(crate) fn operation_time(&self) -> Option<Timestamp> {
        match self.raw.get("operationTime") {
            Some(Bson::Timestamp(ts)) => Some(*ts),
            _ => None,
        }
    }

    pub(crate) fn raw(&self) -> &Document {
        &self.raw
    }

    pub(crate) fn into_document(self) -> Document {
        self.raw
    }
}
