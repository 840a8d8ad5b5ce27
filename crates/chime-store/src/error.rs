//! Error types for the store.

use thiserror::Error;

use crate::OccurrenceStatus;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness violation on the ledger's `(user, bucket)` identity.
    /// Expected under races; callers treat it as a duplicate skip.
    #[error("occurrence already exists: {user_id}/{bucket_key}")]
    DuplicateOccurrence { user_id: String, bucket_key: String },

    /// Ledger row not found.
    #[error("occurrence not found: {user_id}/{bucket_key}")]
    OccurrenceNotFound { user_id: String, bucket_key: String },

    /// Attempted to mutate a row already in a terminal status.
    #[error("occurrence already terminal: {user_id}/{bucket_key} ({status})")]
    AlreadyTerminal {
        user_id: String,
        bucket_key: String,
        status: OccurrenceStatus,
    },

    /// No preference exists for the user.
    #[error("preference not found for user: {0}")]
    PreferenceNotFound(String),
}
