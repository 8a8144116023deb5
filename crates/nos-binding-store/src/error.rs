//! Binding store errors.

use nos_fabric_common::FabricError;
use thiserror::Error;

/// Result type alias for binding store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a binding store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No binding matched the filter.
    #[error("Port binding ({filters}) is not present")]
    NotFound {
        /// Rendered lookup filter.
        filters: String,
    },

    /// The binding 4-tuple is already present.
    #[error("Port binding ({binding}) already exists")]
    Duplicate {
        /// Rendered binding key.
        binding: String,
    },

    /// A lookup that needs exactly one row matched several.
    #[error("Expected a single port binding for ({filters}), found {count}")]
    Ambiguous {
        /// Rendered lookup filter.
        filters: String,
        /// Number of matching rows.
        count: usize,
    },

    /// A persisted row could not be decoded.
    #[error("Corrupt port binding {binding_id}: {message}")]
    Corrupt {
        /// Surrogate key of the row.
        binding_id: u64,
        /// What was wrong with it.
        message: String,
    },

    /// Redis command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl StoreError {
    /// Returns true for the expected "no such binding" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<StoreError> for FabricError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { filters } => FabricError::BindingNotFound { filters },
            StoreError::Duplicate { binding } => FabricError::DuplicateBinding { binding },
            StoreError::Ambiguous { .. } => FabricError::store("lookup_one", err),
            StoreError::Corrupt { .. } => FabricError::store("decode", err),
            StoreError::Redis(e) => FabricError::store("redis", e),
        }
    }
}
