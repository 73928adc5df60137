//! Read and write concerns, and how they are attached to commands.


use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use typed_builder::TypedBuilder;

use crate::{
    bson::Timestamp,
    bson_util,
    error::{Error, Result},
};

/// The consistency a read operation asks the server for.
///
/// See the [server manual](https://www.mongodb.com/docs/manual/reference/read-concern/) for what
/// each level guarantees.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[non_exhaustive]
pub struct ReadConcern {
    /// The requested level.
    pub level: ReadConcernLevel,
}

/// The `readConcern` document sent with a command. Besides the level configured by the user it
/// may carry the `afterClusterTime` of a causally consistent session.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ReadConcernInternal {
    pub(crate) level: Option<ReadConcernLevel>,

    pub(crate) after_cluster_time: Option<Timestamp>,
}

impl ReadConcern {
    /// `{ level: "majority" }`
    pub fn majority() -> Self {
        ReadConcernLevel::Majority.into()
    }

    /// `{ level: "local" }`
    pub fn local() -> Self {
        ReadConcernLevel::Local.into()
    }

    /// `{ level: "linearizable" }`
    pub fn linearizable() -> Self {
        ReadConcernLevel::Linearizable.into()
    }

    /// `{ level: "available" }`
    pub fn available() -> Self {
        ReadConcernLevel::Available.into()
    }

    /// `{ level: "snapshot" }`
    pub fn snapshot() -> Self {
        ReadConcernLevel::Snapshot.into()
    }

    /// A read concern with an arbitrary level name. Known names map to their named variant.
    pub fn custom(level: impl AsRef<str>) -> Self {
        ReadConcernLevel::from(level.as_ref().to_string()).into()
    }
}

impl From<ReadConcern> for ReadConcernInternal {
    fn from(rc: ReadConcern) -> Self {
        Self {
            level: Some(rc.level),
            after_cluster_time: None,
        }
    }
}

impl From<ReadConcernLevel> for ReadConcern {
    fn from(level: ReadConcernLevel) -> Self {
        Self { level }
    }
}

/// The level of a [`ReadConcern`]. Serialized as its bare string name.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
#[non_exhaustive]
pub enum ReadConcernLevel {
    /// `"local"`
    Local,

    /// `"majority"`
    Majority,

    /// `"linearizable"`
    Linearizable,

    /// `"available"`
    Available,

    /// `"snapshot"`
    Snapshot,

    /// Any level this crate has no variant for, sent to the server as-is.
    Custom(String),
}

impl ReadConcernLevel {
    pub(crate) fn as_str(&self) -> &str {
        match self {
            Self::Local => "local",
            Self::Majority => "majority",
            Self::Linearizable => "linearizable",
            Self::Available => "available",
            Self::Snapshot => "snapshot",
            Self::Custom(level) => level,
        }
    }
}

impl From<String> for ReadConcernLevel {
    fn from(level: String) -> Self {
        match level.as_str() {
            "local" => Self::Local,
            "majority" => Self::Majority,
            "linearizable" => Self::Linearizable,
            "available" => Self::Available,
            "snapshot" => Self::Snapshot,
            _ => Self::Custom(level),
        }
    }
}

impl From<ReadConcernLevel> for String {
    fn from(level: ReadConcernLevel) -> Self {
        match level {
            ReadConcernLevel::Custom(level) => level,
            other => other.as_str().to_string(),
        }
    }
}

/// How much acknowledgement a write operation waits for.
///
/// See the [server manual](https://www.mongodb.com/docs/manual/reference/write-concern/).
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, TypedBuilder, Serialize, Deserialize)]
#[builder(field_defaults(default, setter(into)))]
#[non_exhaustive]
pub struct WriteConcern {
    /// The number or kind of nodes the write must reach.
    pub w: Option<Acknowledgment>,

    /// How long the server waits for `w` to be satisfied before reporting a write concern error.
    #[serde(
        rename = "wtimeout",
        serialize_with = "bson_util::serialize_duration_option_as_int_millis",
        skip_deserializing
    )]
    pub w_timeout: Option<Duration>,

    /// Whether the write must reach the on-disk journal.
    #[serde(rename = "j", alias = "journal")]
    pub journal: Option<bool>,
}

/// The `w` field of a [`WriteConcern`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AcknowledgmentRepr", into = "AcknowledgmentRepr")]
#[non_exhaustive]
pub enum Acknowledgment {
    /// Wait until this many nodes have the write. `Nodes(0)` is fire-and-forget and cannot be
    /// combined with an explicit session.
    Nodes(u32),

    /// Wait until a majority of voting nodes have the write.
    Majority,

    /// Wait on a custom write concern defined by replica set tags.
    Custom(String),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum AcknowledgmentRepr {
    Nodes(i32),
    Tag(String),
}

impl TryFrom<AcknowledgmentRepr> for Acknowledgment {
    type Error = String;

    fn try_from(repr: AcknowledgmentRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            AcknowledgmentRepr::Nodes(n) => u32::try_from(n)
                .map(Self::Nodes)
                .map_err(|_| format!("w must not be negative, got {}", n)),
            AcknowledgmentRepr::Tag(tag) => Ok(tag.into()),
        }
    }
}

impl From<Acknowledgment> for AcknowledgmentRepr {
    fn from(w: Acknowledgment) -> Self {
        match w {
            Acknowledgment::Nodes(n) => Self::Nodes(i32::try_from(n).unwrap_or(i32::MAX)),
            Acknowledgment::Majority => Self::Tag("majority".to_string()),
            Acknowledgment::Custom(tag) => Self::Tag(tag),
        }
    }
}

impl From<u32> for Acknowledgment {
    fn from(n: u32) -> Self {
        Self::Nodes(n)
    }
}

impl From<String> for Acknowledgment {
    fn from(tag: String) -> Self {
        if tag == "majority" {
            Self::Majority
        } else {
            Self::Custom(tag)
        }
    }
}

impl From<&str> for Acknowledgment {
    fn from(tag: &str) -> Self {
        tag.to_string().into()
    }
}

impl WriteConcern {
    /// `{ w: <n> }`
    pub fn nodes(n: u32) -> Self {
        Acknowledgment::Nodes(n).into()
    }

    /// `{ w: "majority" }`
    pub fn majority() -> Self {
        Acknowledgment::Majority.into()
    }

    /// `{ w: 0 }`. Writes using it are sent fire-and-forget.
    pub fn unacknowledged() -> Self {
        Acknowledgment::Nodes(0).into()
    }

    /// Whether the server replies to writes sent with this write concern.
    pub fn is_acknowledged(&self) -> bool {
        self.w != Some(Acknowledgment::Nodes(0)) || self.journal == Some(true)
    }

    /// An empty write concern defers to the server default and is omitted from commands.
    pub(crate) fn is_empty(&self) -> bool {
        self.w.is_none() && self.w_timeout.is_none() && self.journal.is_none()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.w == Some(Acknowledgment::Nodes(0)) && self.journal == Some(true) {
            return Err(Error::invalid_argument(
                "a write concern cannot combine w: 0 with j: true",
            ));
        }
        Ok(())
    }
}

impl From<Acknowledgment> for WriteConcern {
    fn from(w: Acknowledgment) -> Self {
        Self {
            w: Some(w),
            ..Default::default()
        }
    }
}
