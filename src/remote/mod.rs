//! Boundary over the externally supplied shared record store.
//!
//! Every call is a suspension point and may fail independently; callers decide
//! per call whether a failure aborts their flow.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::RecordId;
use crate::AppError;

pub mod memory;

pub use memory::{InMemoryRemote, RemoteOp};

/// Record type under which shares themselves are stored.
pub const SHARE_RECORD_TYPE: &str = "cloudkit.share";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRecord {
    pub id: RecordId,
    pub record_type: String,
    /// Parent (or owning share) reference, if any.
    #[serde(default)]
    pub parent: Option<RecordId>,
}

impl RemoteRecord {
    pub fn new(id: RecordId, record_type: impl Into<String>) -> Self {
        Self {
            id,
            record_type: record_type.into(),
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: RecordId) -> Self {
        self.parent = Some(parent);
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    #[default]
    None,
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Owner,
    Participant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identity: String,
    pub role: ParticipantRole,
    pub display_name: Option<String>,
}

impl Participant {
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.identity)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareHandle {
    pub id: RecordId,
    /// Record the share hangs off; `None` when the root no longer resolves.
    pub root_record: Option<RecordId>,
    pub url: Option<Url>,
    pub title: Option<String>,
    pub share_type: Option<String>,
    pub public_permission: PermissionLevel,
    pub owner: Participant,
    pub participants: Vec<Participant>,
}

impl ShareHandle {
    /// Everyone on the share except its owner.
    pub fn participants_excluding_owner(&self) -> Vec<Participant> {
        self.participants
            .iter()
            .filter(|p| p.identity != self.owner.identity)
            .cloned()
            .collect()
    }
}

/// What an invitation link resolves to before it is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareMetadata {
    pub share_id: RecordId,
    pub url: Url,
    pub owner: Participant,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("remote record not found: {0}")]
    NotFound(RecordId),
    #[error("remote store rejected the request: {0}")]
    Rejected(String),
    #[error("remote store returned an unexpected response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    pub fn code(&self) -> &'static str {
        match self {
            RemoteError::Unavailable(_) => "REMOTE/UNAVAILABLE",
            RemoteError::NotFound(_) => "REMOTE/NOT_FOUND",
            RemoteError::Rejected(_) => "REMOTE/REJECTED",
            RemoteError::InvalidResponse(_) => "REMOTE/INVALID_RESPONSE",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

impl From<RemoteError> for AppError {
    fn from(error: RemoteError) -> Self {
        let app = AppError::new(error.code(), error.to_string());
        match &error {
            RemoteError::NotFound(id) => app.with_context("record", id.as_str()),
            _ => app,
        }
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates a share rooted at `root`, mirroring the record first if needed.
    async fn create_share(&self, root: &RemoteRecord) -> RemoteResult<ShareHandle>;

    async fn fetch_share(&self, id: &RecordId) -> RemoteResult<ShareHandle>;

    async fn save_share(&self, share: &ShareHandle) -> RemoteResult<ShareHandle>;

    /// Adds `record` to `share`, saving it with the share as parent.
    async fn attach_to_share(&self, share: &RecordId, record: &RemoteRecord) -> RemoteResult<()>;

    /// The share that `record` belongs to, if any.
    async fn share_for_record(&self, record: &RecordId) -> RemoteResult<Option<ShareHandle>>;

    async fn fetch_record(&self, id: &RecordId) -> RemoteResult<RemoteRecord>;

    async fn query(&self, record_type: &str) -> RemoteResult<Vec<RemoteRecord>>;

    async fn list_shares(&self) -> RemoteResult<Vec<ShareHandle>>;

    async fn save_records(&self, records: &[RemoteRecord]) -> Vec<(RecordId, RemoteResult<()>)>;

    async fn delete_records(&self, ids: &[RecordId]) -> Vec<(RecordId, RemoteResult<()>)>;

    async fn delete_record(&self, id: &RecordId) -> RemoteResult<()>;

    async fn share_metadata(&self, url: &Url) -> RemoteResult<ShareMetadata>;

    async fn accept_share(&self, metadata: &ShareMetadata) -> RemoteResult<()>;
}
