//! Recurrence resolution for the Chime reminder engine.
//!
//! Pure functions over `(preference, now)`:
//! - [`compute_next_due`] decides when a preference's next occurrence is
//!   due, doing all cadence arithmetic in the preference's local calendar
//!   and returning UTC
//! - [`bucket_key`] derives the deterministic occurrence identifier the
//!   ledger's uniqueness constraint dedups on

mod resolver;

pub use resolver::{bucket_key, compute_next_due};
