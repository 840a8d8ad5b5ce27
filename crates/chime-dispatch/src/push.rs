//! Push delivery boundary.
//!
//! The engine never sees encryption or protocol details. It hands the
//! transport a user's registered endpoints and a payload, and gets back
//! per-endpoint success/failure/expiry counts.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use chime_store::{PushSubscription, Store};

/// Payload handed to the transport for every reminder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPayload {
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
}

impl ReminderPayload {
    /// The fixed check-in reminder.
    pub fn reminder() -> Self {
        Self {
            title: "Time to check in".to_string(),
            body: "How are you feeling right now?".to_string(),
            data: serde_json::json!({ "url": "/log" }),
        }
    }
}

/// Per-endpoint results of one fan-out call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanoutReport {
    pub succeeded: u32,
    pub failed: u32,
    pub expired: u32,
    /// Endpoints the push service reported gone (HTTP 404/410). The
    /// fan-out wrapper deregisters these.
    #[serde(default)]
    pub expired_endpoints: Vec<String>,
}

/// Transport capability: attempt delivery to every given endpoint.
///
/// Implementations own payload encryption and the HTTP push protocol.
/// Reporting happens through counts; transport-level failures on a single
/// endpoint count as `failed`, never as an error of the whole call.
#[async_trait]
pub trait PushSender: Send + Sync {
    async fn send(
        &self,
        user_id: &str,
        subscriptions: &[PushSubscription],
        payload: &ReminderPayload,
    ) -> FanoutReport;
}

/// Fan-out delivery: invoke the transport across a user's registered
/// endpoints, then deregister everything it reported expired.
pub struct Fanout {
    sender: Arc<dyn PushSender>,
    store: Arc<dyn Store>,
}

impl Fanout {
    pub fn new(sender: Arc<dyn PushSender>, store: Arc<dyn Store>) -> Self {
        Self { sender, store }
    }

    /// Deliver to every endpoint and prune the expired ones.
    pub async fn send(
        &self,
        user_id: &str,
        subscriptions: &[PushSubscription],
        payload: &ReminderPayload,
    ) -> FanoutReport {
        let report = self.sender.send(user_id, subscriptions, payload).await;

        for endpoint in &report.expired_endpoints {
            match self.store.remove_subscription(user_id, endpoint).await {
                Ok(true) => debug!(user_id, endpoint, "deregistered expired subscription"),
                Ok(false) => {}
                // Pruning is cleanup; a failure here must not turn a
                // delivered reminder into an error.
                Err(e) => {
                    warn!(user_id, endpoint, error = %e, "failed to deregister expired subscription");
                }
            }
        }

        report
    }
}

/// Development transport: logs each would-be delivery and reports every
/// endpoint as succeeded.
pub struct LogSender;

#[async_trait]
impl PushSender for LogSender {
    async fn send(
        &self,
        user_id: &str,
        subscriptions: &[PushSubscription],
        payload: &ReminderPayload,
    ) -> FanoutReport {
        info!(
            user_id,
            endpoints = subscriptions.len(),
            title = %payload.title,
            "log transport delivering reminder"
        );
        FanoutReport {
            succeeded: subscriptions.len() as u32,
            ..Default::default()
        }
    }
}
