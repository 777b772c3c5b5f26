use sled::transaction::{ConflictableTransactionError, TransactionError};
use thiserror::Error;

use crate::validation::ValidationError;

/// Errors that can arise while interacting with the storage registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A uniqueness or referential rule enforced by the store was violated.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The referenced storage id does not exist.
    #[error("storage not found: {0}")]
    NotFound(u64),

    /// Input rejected before any transaction began.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around IO errors (directory creation, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when deserializing a record with an unexpected schema version.
    #[error("schema mismatch for {entity}: expected {expected}, got {found}")]
    SchemaMismatch {
        entity: &'static str,
        expected: u8,
        found: u8,
    },

    /// An index entry or key could not be decoded.
    #[error("corrupt registry data: {0}")]
    Corrupt(String),
}

impl RegistryError {
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, RegistryError::ConstraintViolation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryError::NotFound(_))
    }
}

impl From<TransactionError<RegistryError>> for RegistryError {
    fn from(err: TransactionError<RegistryError>) -> Self {
        match err {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(inner) => RegistryError::Sled(inner),
        }
    }
}

/// Abort the surrounding transaction with `err`.
pub(crate) fn abort<E: Into<RegistryError>>(err: E) -> ConflictableTransactionError<RegistryError> {
    ConflictableTransactionError::Abort(err.into())
}
