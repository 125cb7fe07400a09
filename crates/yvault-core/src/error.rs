use thiserror::Error;

use crate::ids::UserId;

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Node, ancestor, send object, or user row is absent
    #[error("not found: {0}")]
    NotFound(String),

    /// Caller has no path to the node
    #[error("access denied: {0}")]
    Access(String),

    /// Operation requires the canonical owner
    #[error("not the owner: {0}")]
    NotOwner(String),

    /// Write attempted without can_modify
    #[error("read-only: {0}")]
    ReadOnly(String),

    #[error("item is already shared with this recipient")]
    AlreadyShared,

    #[error("invalid share target: {0}")]
    InvalidTarget(String),

    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("quota exceeded for {user}: {used} of {available} bytes used")]
    QuotaExceeded {
        user: UserId,
        used: i64,
        available: i64,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("expired: {0}")]
    Expired(String),

    /// The node forest violates an invariant (cycle, runaway depth)
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Opaque I/O failure from the backend store, never retried here
    #[error("backend error: {0}")]
    Backend(String),

    #[error("{} errors: {}", .0.len(), display_joined(.0))]
    Joined(Vec<VaultError>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// Collapse a batch of worker errors: `None` when empty, the error
    /// itself when there is only one, `Joined` otherwise.
    pub fn join(mut errors: Vec<VaultError>) -> Option<VaultError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(VaultError::Joined(errors)),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, VaultError::NotFound(_))
    }
}

fn display_joined(errors: &[VaultError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
