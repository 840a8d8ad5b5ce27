//! Tick orchestration and delivery execution for Chime.
//!
//! The engine's moving parts:
//! - [`TickOrchestrator`]: the lease-guarded periodic pass that detects
//!   due preferences, claims occurrences in the ledger, enqueues delivery
//!   tasks, and advances due pointers
//! - [`DeliveryExecutor`]: the per-occurrence task that claims the single
//!   delivery attempt, fans out to the user's endpoints, and records the
//!   outcome
//! - The [`PushSender`] transport capability with its [`Fanout`] wrapper

mod error;
mod executor;
mod orchestrator;
mod push;
mod queue;

pub use error::DispatchError;
pub use executor::{DeliveryExecutor, ExecutionOutcome};
pub use orchestrator::{TickConfig, TickOrchestrator, TickOutcome, TickSummary};
pub use push::{Fanout, FanoutReport, LogSender, PushSender, ReminderPayload};
pub use queue::{DeliveryQueue, DeliveryTask};
