//! Error types for the subscription engine

/// Result type for collaborator operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for run-level operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Error type for collaborator (store, provider, sink) operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Conflicting write: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration errors. These are fatal at startup, never per call.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid timezone: {0}")]
    InvalidTimezone(String),

    #[error("Invalid value for: {0}")]
    InvalidValue(String),
}

/// Run-level errors surfaced to whoever triggered the run.
///
/// Item-level failures never show up here; they are recorded on the run ledger.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Unable to fetch candidate subscriptions: {0}")]
    CandidateFetch(#[source] StoreError),

    #[error("Unable to fetch delivery tax settings: {0}")]
    Settings(#[source] StoreError),

    #[error("Run ledger error: {0}")]
    Ledger(#[from] crate::ledger::LedgerError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
