//! Error types for dispatch.

use thiserror::Error;

/// Errors that can occur while orchestrating or executing deliveries.
///
/// Per-occurrence failures (no subscriptions, expired endpoints, stale
/// rows) are ledger state, not errors; only storage faults surface here.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] chime_store::StoreError),
}
