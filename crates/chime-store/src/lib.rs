//! Durable storage for the Chime reminder engine.
//!
//! This crate provides:
//! - The persisted entities: accounts, push subscriptions, notification
//!   preferences, and the occurrence ledger
//! - The [`Store`] contract: atomic insert-if-absent on the ledger's
//!   `(user, bucket)` identity plus check-then-set claim and completion
//!   writes, which is all the engine needs for its idempotency guarantees
//! - [`MemoryStore`], the in-process implementation used by the daemon
//!   and tests
//! - The TTL lease lock and shared engine state

mod error;
mod state;
mod store;
mod types;

pub use error::StoreError;
pub use state::StateManager;
pub use store::{ClaimDecision, LAST_TICK_KEY, MemoryStore, Store, TICK_LOCK};
pub use types::{
    Cadence, FailureReason, NotificationPreference, Occurrence, OccurrenceOutcome,
    OccurrenceStatus, PushSubscription, UserAccount,
};
