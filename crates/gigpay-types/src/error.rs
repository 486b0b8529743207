use thiserror::Error;

/// Ledger core error taxonomy
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    /// Bad input, rejected before any write
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Invariant violation (double-completion, overdraw, duplicate active loan)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid lifecycle transition
    #[error("Invalid state transition: from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Blockchain adapter unreachable or transiently failing; retried with backoff
    #[error("External system unavailable: {0}")]
    ExternalUnavailable(String),

    /// On-chain state disagrees with the ledger; surfaced to operators, never auto-resolved
    #[error("Reconciliation mismatch for stream {stream_id}: ledger {ledger}, on-chain {onchain}")]
    ReconciliationMismatch {
        stream_id: u64,
        ledger: String,
        onchain: String,
    },

    /// Max retries exhausted; the transaction is failed, not dropped
    #[error("Terminal failure after {retries} retries: {reason}")]
    TerminalFailure { retries: u32, reason: String },

    /// Entity lookup miss
    #[error("Not found: {0}")]
    NotFound(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Stable machine-readable code for the API layer. The UI only ever
    /// sees this code plus the message, never internal state.
    pub fn error_code(&self) -> &'static str {
        match self {
            LedgerError::Validation(_) => "VALIDATION_ERROR",
            LedgerError::Conflict(_) => "CONFLICT_ERROR",
            LedgerError::InvalidTransition { .. } => "INVALID_TRANSITION",
            LedgerError::ExternalUnavailable(_) => "EXTERNAL_UNAVAILABLE",
            LedgerError::ReconciliationMismatch { .. } => "RECONCILIATION_MISMATCH",
            LedgerError::TerminalFailure { .. } => "TERMINAL_FAILURE",
            LedgerError::NotFound(_) => "NOT_FOUND",
            LedgerError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Retriable errors are retried inside the owning component;
    /// invariant violations propagate to the caller.
    pub fn is_retriable(&self) -> bool {
        matches!(self, LedgerError::ExternalUnavailable(_))
    }
}

/// Result type for ledger core operations
pub type Result<T> = std::result::Result<T, LedgerError>;
