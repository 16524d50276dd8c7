use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RecordError;
use crate::nsid;

/// One JSON frame from the Jetstream websocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JetstreamEvent {
    /// Repository DID the event belongs to.
    pub did: String,

    #[serde(default)]
    pub time_us: i64,

    /// `commit`, `identity` or `account`.
    #[serde(default)]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<Commit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    #[serde(default)]
    pub rev: String,

    pub operation: Operation,

    pub collection: String,

    pub rkey: String,

    /// Raw record body; absent on deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
    #[serde(other)]
    Unknown,
}

/// The six (operation, collection) pairs the indexer reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommitRoute {
    CreatePost,
    DeletePost,
    CreateLike,
    DeleteLike,
    CreateRepost,
    DeleteRepost,
}

impl CommitRoute {
    /// Resolve a route; `None` for every pair the indexer ignores.
    pub fn resolve(operation: Operation, collection: &str) -> Option<Self> {
        match (operation, collection) {
            (Operation::Create, nsid::FEED_POST) => Some(Self::CreatePost),
            (Operation::Delete, nsid::FEED_POST) => Some(Self::DeletePost),
            (Operation::Create, nsid::FEED_LIKE) => Some(Self::CreateLike),
            (Operation::Delete, nsid::FEED_LIKE) => Some(Self::DeleteLike),
            (Operation::Create, nsid::FEED_REPOST) => Some(Self::CreateRepost),
            (Operation::Delete, nsid::FEED_REPOST) => Some(Self::DeleteRepost),
            _ => None,
        }
    }

    pub fn collection(&self) -> &'static str {
        match self {
            Self::CreatePost | Self::DeletePost => nsid::FEED_POST,
            Self::CreateLike | Self::DeleteLike => nsid::FEED_LIKE,
            Self::CreateRepost | Self::DeleteRepost => nsid::FEED_REPOST,
        }
    }

    pub fn is_create(&self) -> bool {
        matches!(
            self,
            Self::CreatePost | Self::CreateLike | Self::CreateRepost
        )
    }
}

impl std::fmt::Display for CommitRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = if self.is_create() { "create" } else { "delete" };
        write!(f, "{} {}", op, self.collection())
    }
}

impl JetstreamEvent {
    /// Route for this event, or `None` when there is no commit or the pair is ignored.
    pub fn route(&self) -> Option<CommitRoute> {
        let commit = self.commit.as_ref()?;
        CommitRoute::resolve(commit.operation, &commit.collection)
    }
}

impl Commit {
    /// Decode the raw record into a typed record.
    pub fn decode_record<T: DeserializeOwned>(&self) -> Result<T, RecordError> {
        let raw = self
            .record
            .as_ref()
            .ok_or_else(|| RecordError::MissingRecord {
                collection: self.collection.clone(),
            })?;
        T::deserialize(raw).map_err(|source| RecordError::Decode {
            collection: self.collection.clone(),
            source,
        })
    }
}
