//! The tick orchestrator.
//!
//! One tick is a single serialized pass under a store-backed lease: reap
//! stale ledger rows, backfill missing due pointers, scan for due
//! preferences, claim occurrences in the ledger, enqueue delivery tasks,
//! and advance every evaluated due pointer past "now". Ticks are never
//! queued: a busy lease skips the whole pass, and the next external
//! trigger retries (the lookahead window absorbs the jitter).

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use chime_scheduler::{bucket_key, compute_next_due};
use chime_store::{
    NotificationPreference, Occurrence, StateManager, Store, StoreError, TICK_LOCK,
};

use crate::{DeliveryQueue, DeliveryTask, DispatchError};

/// Tuning knobs for the orchestrator.
#[derive(Debug, Clone)]
pub struct TickConfig {
    /// Lease TTL. Kept slightly under the external 60s driving cadence so
    /// a crashed holder blocks at most one trigger.
    pub lock_ttl: Duration,
    /// Preferences due within this window of "now" dispatch this tick
    /// instead of racing the clock against the tick's own runtime.
    pub lookahead: Duration,
    /// Queued rows unclaimed for longer than this are forced to failed.
    pub stale_after: Duration,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::seconds(55),
            lookahead: Duration::seconds(30),
            stale_after: Duration::seconds(120),
        }
    }
}

/// Counters for one tick, emitted for observability and returned to the
/// external trigger.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    pub due: u32,
    pub dispatched: u32,
    pub duplicates: u32,
    pub backfilled: u32,
    pub stale_failed: u32,
    pub enqueue_failures: u32,
    pub duration_ms: u64,
}

/// Result of one trigger invocation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TickOutcome {
    /// The tick ran to completion.
    Completed { summary: TickSummary },
    /// Another orchestrator holds the lease; this tick was skipped.
    AlreadyRunning,
}

/// The lease-guarded periodic driver.
pub struct TickOrchestrator {
    store: Arc<dyn Store>,
    queue: DeliveryQueue,
    config: TickConfig,
    /// Lease fencing token; one per orchestrator instance.
    owner: String,
}

impl TickOrchestrator {
    pub fn new(store: Arc<dyn Store>, queue: DeliveryQueue) -> Self {
        Self::with_config(store, queue, TickConfig::default())
    }

    pub fn with_config(store: Arc<dyn Store>, queue: DeliveryQueue, config: TickConfig) -> Self {
        Self {
            store,
            queue,
            config,
            owner: Uuid::new_v4().to_string(),
        }
    }

    /// Run one tick.
    ///
    /// Returns [`TickOutcome::AlreadyRunning`] without doing any work when
    /// the lease is held elsewhere. Every other path runs the full pass
    /// and releases the lease, including on error.
    #[tracing::instrument(skip(self))]
    pub async fn run_tick(&self) -> Result<TickOutcome, DispatchError> {
        let now = Utc::now();
        let acquired = self
            .store
            .try_acquire_lock(TICK_LOCK, &self.owner, self.config.lock_ttl, now)
            .await?;
        if !acquired {
            info!("tick lease busy, skipping");
            return Ok(TickOutcome::AlreadyRunning);
        }

        let result = self.tick_locked(now).await;

        // Released on every path; a failed tick must not also starve the
        // next one.
        if let Err(e) = self.store.release_lock(TICK_LOCK, &self.owner).await {
            warn!(error = %e, "failed to release tick lease");
        }

        Ok(TickOutcome::Completed { summary: result? })
    }

    async fn tick_locked(&self, now: DateTime<Utc>) -> Result<TickSummary, DispatchError> {
        let started = std::time::Instant::now();
        let mut summary = TickSummary::default();

        // 1. Stale reaping: bound how long a lost delivery task can hide.
        let cutoff = now - self.config.stale_after;
        let reaped = self.store.fail_stale_queued(cutoff, now).await?;
        summary.stale_failed = reaped.len() as u32;
        for occ in &reaped {
            warn!(
                user_id = %occ.user_id,
                bucket_key = %occ.bucket_key,
                due_at = %occ.due_at,
                "reaped stale occurrence"
            );
        }

        // 2. Backfill: newly created or re-enabled preferences have no due
        // pointer yet.
        for pref in self.store.list_preferences().await? {
            if !pref.enabled || pref.next_due_at.is_some() {
                continue;
            }
            match compute_next_due(&pref, now) {
                Some(next) => {
                    self.store.set_next_due(&pref.user_id, Some(next)).await?;
                    summary.backfilled += 1;
                    debug!(user_id = %pref.user_id, next_due_at = %next, "backfilled due pointer");
                }
                None => {
                    debug!(user_id = %pref.user_id, "preference cannot schedule, no backfill");
                }
            }
        }

        // 3 + 4. Due scan and dispatch. Re-read so freshly backfilled
        // pointers are visible to this same tick.
        let horizon = now + self.config.lookahead;
        for pref in self.store.list_preferences().await? {
            if !pref.enabled {
                continue;
            }
            let Some(due_at) = pref.next_due_at else {
                continue;
            };
            if due_at > horizon {
                continue;
            }

            match self.store.get_user(&pref.user_id).await {
                Ok(Some(user)) if !user.disabled => {}
                Ok(_) => {
                    debug!(user_id = %pref.user_id, "owner disabled or missing, not due");
                    continue;
                }
                Err(e) => {
                    warn!(user_id = %pref.user_id, error = %e, "owner lookup failed, skipping");
                    continue;
                }
            }

            summary.due += 1;

            // One preference's failure never blocks the rest of the batch.
            if let Err(e) = self.dispatch_one(&pref, due_at, now, &mut summary).await {
                warn!(user_id = %pref.user_id, error = %e, "dispatch failed for preference");
            }
        }

        summary.duration_ms = started.elapsed().as_millis() as u64;

        // Dashboard bookkeeping goes through the shared store so every
        // replica observes the same last-tick value.
        let state = StateManager::new(Arc::clone(&self.store));
        if let Err(e) = state.set_last_tick_at(now).await {
            warn!(error = %e, "failed to persist last tick");
        }

        info!(
            due = summary.due,
            dispatched = summary.dispatched,
            duplicates = summary.duplicates,
            backfilled = summary.backfilled,
            stale_failed = summary.stale_failed,
            enqueue_failures = summary.enqueue_failures,
            duration_ms = summary.duration_ms,
            "tick complete"
        );

        Ok(summary)
    }

    /// Claim one occurrence in the ledger and enqueue its delivery.
    ///
    /// The preference's due pointer advances whether the insert dispatched,
    /// deduplicated, or errored: a stalled pointer would repeat the same
    /// due time forever.
    async fn dispatch_one(
        &self,
        pref: &NotificationPreference,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) -> Result<(), DispatchError> {
        let key = bucket_key(pref, due_at);
        let insert = self
            .store
            .insert_occurrence(Occurrence::queued(&pref.user_id, &key, due_at, now))
            .await;

        match &insert {
            Ok(()) => {
                debug!(user_id = %pref.user_id, bucket_key = %key, "occurrence inserted, enqueueing delivery");
                let task = DeliveryTask {
                    user_id: pref.user_id.clone(),
                    bucket_key: key.clone(),
                };
                if self.queue.enqueue(task).await {
                    summary.dispatched += 1;
                } else {
                    summary.enqueue_failures += 1;
                }
            }
            Err(StoreError::DuplicateOccurrence { .. }) => {
                // Expected under racing ticks: a previous pass (or a
                // concurrent orchestrator) owns this bucket.
                debug!(user_id = %pref.user_id, bucket_key = %key, "duplicate occurrence, skipped");
                summary.duplicates += 1;
            }
            Err(e) => {
                warn!(user_id = %pref.user_id, bucket_key = %key, error = %e, "occurrence insert failed");
            }
        }

        let next = compute_next_due(pref, now);
        self.store.set_next_due(&pref.user_id, next).await?;
        match next {
            Some(next) => debug!(user_id = %pref.user_id, next_due_at = %next, "advanced due pointer"),
            None => debug!(user_id = %pref.user_id, "preference no longer schedulable, pointer cleared"),
        }

        match insert {
            Ok(()) | Err(StoreError::DuplicateOccurrence { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
