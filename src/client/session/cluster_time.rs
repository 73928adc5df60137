use derive_where::derive_where;
use serde::{Deserialize, Serialize};

use crate::{
    bson::{Bson, Document, Timestamp},
    error::{Error, Result},
};

/// Struct modeling a cluster time reported by the server.
///
/// Cluster times are ordered by their timestamp alone; the signature only proves to the server
/// that the value was issued by the deployment.
///
/// See [the MongoDB documentation](https://www.mongodb.com/docs/manual/core/read-isolation-consistency-recency/)
/// for more information.
#[derive(Debug, Deserialize, Clone, Serialize)]
#[derive_where(PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterTime {
    cluster_time: Timestamp,

    #[derive_where(skip)]
    signature: Document,
}

impl ClusterTime {
    /// Parses and validates a `$clusterTime` document of the shape
    /// `{ clusterTime: Timestamp, signature: { hash: BinData, keyId: Int64 } }`.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let cluster_time: ClusterTime = crate::bson::from_document(doc.clone())
            .map_err(|e| Error::invalid_argument(format!("invalid cluster time: {}", e)))?;
        cluster_time.validate()?;
        Ok(cluster_time)
    }

    /// The timestamp of this cluster time.
    pub fn timestamp(&self) -> Timestamp {
        self.cluster_time
    }

    /// The signature the server attached to this cluster time.
    pub fn signature(&self) -> &Document {
        &self.signature
    }

    /// Checks that the signature has the shape servers issue.
    pub(crate) fn validate(&self) -> Result<()> {
        match self.signature.get("hash") {
            Some(Bson::Binary(_)) => {}
            _ => {
                return Err(Error::invalid_argument(
                    "invalid cluster time: signature.hash must be binary data",
                ))
            }
        }
        match self.signature.get("keyId") {
            Some(Bson::Int64(_)) | Some(Bson::Int32(_)) => Ok(()),
            _ => Err(Error::invalid_argument(
                "invalid cluster time: signature.keyId must be an integer",
            )),
        }
    }
}

impl std::cmp::Ord for ClusterTime {
    fn cmp(&self, other: &ClusterTime) -> std::cmp::Ordering {
        let lhs = (self.cluster_time.time, self.cluster_time.increment);
        let rhs = (other.cluster_time.time, other.cluster_time.increment);
        lhs.cmp(&rhs)
    }
}

impl std::cmp::PartialOrd for ClusterTime {
    fn partial_cmp(&self, other: &ClusterTime) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
