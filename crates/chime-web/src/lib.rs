//! HTTP trigger surface for the Chime reminder engine.
//!
//! Exposes the orchestrator's entry point to external schedulers
//! (`POST /tick`), a liveness probe, and a dashboard status endpoint.
//! The CRUD/admin surfaces live elsewhere; nothing here mutates
//! preferences or subscriptions.

mod error;
mod routes;

pub use error::WebError;
pub use routes::{AppState, create_router};
