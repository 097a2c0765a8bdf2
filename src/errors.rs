// src/errors.rs
//
// =============================================================================
// WORKCELL CORE: ERROR TAXONOMY
// =============================================================================
//
// Wire-stable kinds, not exception names (spec §7). Every store, linker,
// lock, and acquirer operation returns `Result<_, CoreError>` so callers can
// branch on `kind` instead of parsing a message string. Application glue
// (the executor's outer boundary, the CLI) wraps this in `anyhow::Result`
// and adds `.context(...)`, the same two-tier split the teacher uses.

use crate::enums::ProtocolRunStatus;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    Uniqueness { field: String },
    ForeignKey { referencing: String },
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("entity not found")]
    NotFound,

    #[error("definition not found: {0}")]
    DefinitionNotFound(String),

    #[error("conflict: {kind:?} ({details})")]
    Conflict { kind: ConflictKind, details: String },

    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ProtocolRunStatus,
        to: ProtocolRunStatus,
    },

    #[error("asset acquisition failed: {0}")]
    AssetAcquisition(String),

    #[error("asset release failed: {0}")]
    AssetRelease(String),

    #[error("runtime initialization failed: {0}")]
    RuntimeInit(String),

    #[error("could not determine plate dimensions: {0}")]
    InvalidPlateDimensions(String),

    #[error("flat array length {got} does not match plate dimensions (expected {expected})")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("invalid link operation: {0}")]
    InvalidLinkOperation(String),

    #[error("execution context not initialized")]
    ContextNotInitialized,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// `AssetAcquisitionError` is retryable by the orchestrator (spec §4.4);
    /// `RuntimeInitError` is not. This helper lets callers branch without
    /// matching the whole enum.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::AssetAcquisition(_))
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
