//! The delivery executor.
//!
//! Runs once per enqueued `(user, bucket)` task under at-least-once task
//! semantics. The claim write is the linearization point: it strictly
//! precedes any transport call, and every re-entry re-checks status and
//! claim before acting, so a redelivered or concurrently executed task
//! can never double-notify a user.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use chime_store::{
    ClaimDecision, FailureReason, OccurrenceOutcome, Store, StoreError,
};

use crate::{DeliveryTask, DispatchError, Fanout, ReminderPayload};

/// What one executor invocation did, for observability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Delivery attempted; at least one endpoint accepted.
    Sent { targeted: u32, failed: u32 },
    /// Terminal failure recorded with the given reason.
    Failed { reason: FailureReason },
    /// A prior attempt claimed the row and never finished; recorded as a
    /// terminal skip.
    SkippedAlreadyAttempted,
    /// The row was already terminal; nothing to do.
    NoOp,
    /// No ledger row for the task (defensive; nothing recorded).
    MissingRow,
}

/// The per-occurrence delivery task.
pub struct DeliveryExecutor {
    store: Arc<dyn Store>,
    fanout: Fanout,
    payload: ReminderPayload,
}

impl DeliveryExecutor {
    pub fn new(store: Arc<dyn Store>, fanout: Fanout) -> Self {
        Self {
            store,
            fanout,
            payload: ReminderPayload::reminder(),
        }
    }

    /// Execute one delivery task.
    #[tracing::instrument(skip(self, task), fields(user_id = %task.user_id, bucket_key = %task.bucket_key))]
    pub async fn execute(&self, task: &DeliveryTask) -> Result<ExecutionOutcome, DispatchError> {
        let now = Utc::now();

        // The claim is an atomic first-write-wins update; its decision
        // tells us which re-entry case this invocation landed in.
        let claim = match self
            .store
            .claim_occurrence(&task.user_id, &task.bucket_key, now)
            .await
        {
            Ok(decision) => decision,
            Err(StoreError::OccurrenceNotFound { .. }) => {
                // The orchestrator inserts before enqueueing, so this
                // should be unreachable.
                error!("delivery task has no ledger row, aborting");
                return Ok(ExecutionOutcome::MissingRow);
            }
            Err(e) => return Err(e.into()),
        };

        match claim {
            ClaimDecision::AlreadyTerminal(occ) => {
                debug!(status = %occ.status, "occurrence already terminal, no-op");
                Ok(ExecutionOutcome::NoOp)
            }
            ClaimDecision::AlreadyClaimed(_) => {
                // A prior attempt started and died before finishing. Never
                // re-attempt a claimed send: possible under-delivery beats
                // double-notifying.
                self.store
                    .complete_occurrence(
                        &task.user_id,
                        &task.bucket_key,
                        OccurrenceOutcome::skipped(FailureReason::AlreadyAttempted, now),
                    )
                    .await?;
                info!("occurrence already attempted, recorded skip");
                Ok(ExecutionOutcome::SkippedAlreadyAttempted)
            }
            ClaimDecision::Claimed(_) => self.attempt(task).await,
        }
    }

    /// The single delivery attempt for a freshly claimed occurrence.
    async fn attempt(&self, task: &DeliveryTask) -> Result<ExecutionOutcome, DispatchError> {
        if self.store.get_user(&task.user_id).await?.is_none() {
            return self.fail(task, FailureReason::UserMissing, 0, 0).await;
        }

        let subscriptions = self.store.list_subscriptions(&task.user_id).await?;
        if subscriptions.is_empty() {
            return self.fail(task, FailureReason::NoSubscriptions, 0, 0).await;
        }

        let report = self
            .fanout
            .send(&task.user_id, &subscriptions, &self.payload)
            .await;
        let targeted = report.succeeded + report.failed + report.expired;
        let devices_failed = report.failed + report.expired;
        let now = Utc::now();

        if report.succeeded > 0 {
            self.store
                .complete_occurrence(
                    &task.user_id,
                    &task.bucket_key,
                    OccurrenceOutcome::sent(targeted, report.succeeded, devices_failed, now),
                )
                .await?;

            // Best-effort bookkeeping in a separate write. A crash between
            // the ledger write and this one leaves last_sent_at stale,
            // which is acceptable: nothing consults it for dedup.
            if let Err(e) = self.store.set_last_sent(&task.user_id, now).await {
                warn!(error = %e, "failed to update last_sent_at");
            }

            info!(
                targeted,
                succeeded = report.succeeded,
                failed = devices_failed,
                "reminder sent"
            );
            Ok(ExecutionOutcome::Sent {
                targeted,
                failed: devices_failed,
            })
        } else {
            let reason = if targeted > 0 && report.expired == targeted {
                FailureReason::AllExpired
            } else {
                FailureReason::AllFailed
            };
            self.fail(task, reason, targeted, devices_failed).await
        }
    }

    async fn fail(
        &self,
        task: &DeliveryTask,
        reason: FailureReason,
        targeted: u32,
        failed: u32,
    ) -> Result<ExecutionOutcome, DispatchError> {
        self.store
            .complete_occurrence(
                &task.user_id,
                &task.bucket_key,
                OccurrenceOutcome::failed(reason, targeted, failed, Utc::now()),
            )
            .await?;
        info!(reason = %reason, targeted, "delivery failed");
        Ok(ExecutionOutcome::Failed { reason })
    }
}
