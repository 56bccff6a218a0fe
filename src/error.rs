//! Error types for the synchronized checkpoint subsystem

use thiserror::Error;

/// Errors that can occur in checkpoint store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Corrupt value under key {0}")]
    Corrupt(String),

    #[error("Write rejected: {0}")]
    WriteFailed(String),
}

/// Errors that can occur in checkpoint operations
///
/// `Conflict` and the harmless-stale case are deliberately *not* errors:
/// they are decisions returned by the validator (`CheckpointDecision`),
/// so callers never have to infer intent from log output.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint signature verification failed")]
    BadSignature,

    #[error("Invalid checkpoint key: {0}")]
    InvalidKey(String),

    #[error("Checkpoint signing failed: {0}")]
    SigningFailed(String),

    #[error("Checkpoint signing key not configured")]
    NoSigningKey,

    #[error("Block index missing entry for {0}")]
    MissingBlock(String),

    #[error("Block index structure failure: no parent for {0}")]
    StructureFailure(String),

    #[error("Checkpoint candidate not accepted: {0}")]
    NotAccepted(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Checkpoint state lock poisoned")]
    LockPoisoned,
}

/// Result type for checkpoint operations
pub type CheckpointResult<T> = Result<T, CheckpointError>;
