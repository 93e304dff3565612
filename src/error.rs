use thiserror::Error;
use uuid::Uuid;

/// Every failure the ledger surfaces to its callers.
///
/// Entity-state failures (`NotFound`, `InvalidState`, `InsufficientFunds`,
/// `PaymentDeclined`) are normal, recoverable outcomes. `LedgerCorrupted` is a
/// broken invariant and callers must treat it as fatal.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("invalid state for {entity} {id}: {reason}")]
    InvalidState {
        entity: &'static str,
        id: String,
        reason: String,
    },
    #[error("insufficient funds for {user}: requested {requested}, available {available}")]
    InsufficientFunds {
        user: String,
        requested: i64,
        available: i64,
    },
    #[error("payment declined: {0}")]
    PaymentDeclined(String),
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("ledger corrupted: {0}")]
    LedgerCorrupted(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("storage error: {0}")]
    StorageError(#[from] rocksdb::Error),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn invalid_state(entity: &'static str, id: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            entity,
            id: id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn session_state(id: Uuid, reason: impl Into<String>) -> Self {
        Self::invalid_state("checkout session", id, reason)
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
