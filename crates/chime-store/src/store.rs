//! Storage contract and the in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::{
    NotificationPreference, Occurrence, OccurrenceOutcome, OccurrenceStatus, PushSubscription,
    StoreError, UserAccount,
};

/// Name of the orchestrator's mutual-exclusion lease.
pub const TICK_LOCK: &str = "tick";

/// Shared-state key holding the last successful tick instant.
pub const LAST_TICK_KEY: &str = "last_tick_at";

/// Outcome of an atomic claim attempt on a ledger row.
#[derive(Debug, Clone)]
pub enum ClaimDecision {
    /// The claim was written; this caller owns the single delivery attempt.
    Claimed(Occurrence),
    /// Another attempt already claimed the row and never finished.
    AlreadyClaimed(Occurrence),
    /// The row already reached a terminal status.
    AlreadyTerminal(Occurrence),
}

/// Storage surface the engine runs against.
///
/// Any backend satisfies the engine's correctness requirements as long as
/// `insert_occurrence` is an atomic insert-if-absent on the ledger's
/// `(user_id, bucket_key)` identity, and `claim_occurrence` /
/// `complete_occurrence` apply their check-then-set under one critical
/// section.
#[async_trait]
pub trait Store: Send + Sync {
    // Users and subscriptions.

    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, StoreError>;

    async fn put_user(&self, user: UserAccount) -> Result<(), StoreError>;

    async fn list_subscriptions(&self, user_id: &str)
    -> Result<Vec<PushSubscription>, StoreError>;

    async fn put_subscription(&self, subscription: PushSubscription) -> Result<(), StoreError>;

    /// Deregister one endpoint. Returns whether anything was removed.
    async fn remove_subscription(&self, user_id: &str, endpoint: &str)
    -> Result<bool, StoreError>;

    // Preferences.

    async fn list_preferences(&self) -> Result<Vec<NotificationPreference>, StoreError>;

    async fn get_preference(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, StoreError>;

    async fn put_preference(&self, preference: NotificationPreference) -> Result<(), StoreError>;

    /// Move (or clear) the preference's due pointer.
    async fn set_next_due(
        &self,
        user_id: &str,
        next_due_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError>;

    /// Advisory bookkeeping after a confirmed successful delivery.
    async fn set_last_sent(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    // Occurrence ledger.

    /// Atomic insert-if-absent. Fails with [`StoreError::DuplicateOccurrence`]
    /// when the `(user, bucket)` identity already exists.
    async fn insert_occurrence(&self, occurrence: Occurrence) -> Result<(), StoreError>;

    async fn get_occurrence(
        &self,
        user_id: &str,
        bucket_key: &str,
    ) -> Result<Option<Occurrence>, StoreError>;

    /// Atomic first-write-wins claim. Writes `claimed_at` only when the row
    /// is non-terminal and unclaimed; otherwise reports which re-entry case
    /// the caller landed in.
    async fn claim_occurrence(
        &self,
        user_id: &str,
        bucket_key: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimDecision, StoreError>;

    /// Write a terminal outcome. Refuses rows already terminal.
    async fn complete_occurrence(
        &self,
        user_id: &str,
        bucket_key: &str,
        outcome: OccurrenceOutcome,
    ) -> Result<Occurrence, StoreError>;

    /// Force every queued, unclaimed row due before `cutoff` to a terminal
    /// `failed`/`stale_queued` state. Returns the reaped rows.
    async fn fail_stale_queued(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Occurrence>, StoreError>;

    async fn list_occurrences(&self, user_id: &str) -> Result<Vec<Occurrence>, StoreError>;

    /// Ledger size per status, for dashboards.
    async fn status_counts(&self) -> Result<HashMap<OccurrenceStatus, usize>, StoreError>;

    // Shared engine state.

    async fn get_state(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_state(&self, key: &str, value: String) -> Result<(), StoreError>;

    // Lease lock.

    /// Try to take (or re-take) the named lease for `ttl`. Returns false
    /// when a different owner holds an unexpired lease.
    async fn try_acquire_lock(
        &self,
        name: &str,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Release the named lease if this owner still holds it. A lease taken
    /// over after TTL expiry is not released by the old owner.
    async fn release_lock(&self, name: &str, owner: &str) -> Result<(), StoreError>;
}

#[derive(Debug, Clone)]
struct LockLease {
    owner: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<String, UserAccount>,
    subscriptions: HashMap<String, Vec<PushSubscription>>,
    preferences: HashMap<String, NotificationPreference>,
    occurrences: HashMap<(String, String), Occurrence>,
    state: HashMap<String, String>,
    locks: HashMap<String, LockLease>,
}

/// In-process store.
///
/// One lock over the whole data set is what makes the insert-if-absent and
/// check-then-set operations atomic here; a database backend would use its
/// unique index and row-level conditional writes instead.
#[derive(Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_user(&self, user_id: &str) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn put_user(&self, user: UserAccount) -> Result<(), StoreError> {
        self.inner.write().await.users.insert(user.id.clone(), user);
        Ok(())
    }

    async fn list_subscriptions(
        &self,
        user_id: &str,
    ) -> Result<Vec<PushSubscription>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .subscriptions
            .get(user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_subscription(&self, subscription: PushSubscription) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let subs = inner
            .subscriptions
            .entry(subscription.user_id.clone())
            .or_default();
        // One entry per endpoint; re-registration replaces key material.
        subs.retain(|s| s.endpoint != subscription.endpoint);
        subs.push(subscription);
        Ok(())
    }

    async fn remove_subscription(
        &self,
        user_id: &str,
        endpoint: &str,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        let Some(subs) = inner.subscriptions.get_mut(user_id) else {
            return Ok(false);
        };
        let before = subs.len();
        subs.retain(|s| s.endpoint != endpoint);
        Ok(subs.len() != before)
    }

    async fn list_preferences(&self) -> Result<Vec<NotificationPreference>, StoreError> {
        let mut prefs: Vec<_> = self.inner.read().await.preferences.values().cloned().collect();
        prefs.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Ok(prefs)
    }

    async fn get_preference(
        &self,
        user_id: &str,
    ) -> Result<Option<NotificationPreference>, StoreError> {
        Ok(self.inner.read().await.preferences.get(user_id).cloned())
    }

    async fn put_preference(&self, preference: NotificationPreference) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .preferences
            .insert(preference.user_id.clone(), preference);
        Ok(())
    }

    async fn set_next_due(
        &self,
        user_id: &str,
        next_due_at: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let pref = inner
            .preferences
            .get_mut(user_id)
            .ok_or_else(|| StoreError::PreferenceNotFound(user_id.to_string()))?;
        pref.next_due_at = next_due_at;
        Ok(())
    }

    async fn set_last_sent(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let pref = inner
            .preferences
            .get_mut(user_id)
            .ok_or_else(|| StoreError::PreferenceNotFound(user_id.to_string()))?;
        pref.last_sent_at = Some(at);
        Ok(())
    }

    async fn insert_occurrence(&self, occurrence: Occurrence) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let key = (occurrence.user_id.clone(), occurrence.bucket_key.clone());
        if inner.occurrences.contains_key(&key) {
            return Err(StoreError::DuplicateOccurrence {
                user_id: occurrence.user_id,
                bucket_key: occurrence.bucket_key,
            });
        }
        inner.occurrences.insert(key, occurrence);
        Ok(())
    }

    async fn get_occurrence(
        &self,
        user_id: &str,
        bucket_key: &str,
    ) -> Result<Option<Occurrence>, StoreError> {
        Ok(self
            .inner
            .read()
            .await
            .occurrences
            .get(&(user_id.to_string(), bucket_key.to_string()))
            .cloned())
    }

    async fn claim_occurrence(
        &self,
        user_id: &str,
        bucket_key: &str,
        now: DateTime<Utc>,
    ) -> Result<ClaimDecision, StoreError> {
        let mut inner = self.inner.write().await;
        let occ = inner
            .occurrences
            .get_mut(&(user_id.to_string(), bucket_key.to_string()))
            .ok_or_else(|| StoreError::OccurrenceNotFound {
                user_id: user_id.to_string(),
                bucket_key: bucket_key.to_string(),
            })?;

        if occ.status.is_terminal() {
            return Ok(ClaimDecision::AlreadyTerminal(occ.clone()));
        }
        if occ.claimed_at.is_some() {
            return Ok(ClaimDecision::AlreadyClaimed(occ.clone()));
        }
        occ.claimed_at = Some(now);
        Ok(ClaimDecision::Claimed(occ.clone()))
    }

    async fn complete_occurrence(
        &self,
        user_id: &str,
        bucket_key: &str,
        outcome: OccurrenceOutcome,
    ) -> Result<Occurrence, StoreError> {
        let mut inner = self.inner.write().await;
        let occ = inner
            .occurrences
            .get_mut(&(user_id.to_string(), bucket_key.to_string()))
            .ok_or_else(|| StoreError::OccurrenceNotFound {
                user_id: user_id.to_string(),
                bucket_key: bucket_key.to_string(),
            })?;

        if occ.status.is_terminal() {
            return Err(StoreError::AlreadyTerminal {
                user_id: user_id.to_string(),
                bucket_key: bucket_key.to_string(),
                status: occ.status,
            });
        }

        occ.status = outcome.status;
        occ.failure_reason = outcome.failure_reason;
        occ.devices_targeted = outcome.devices_targeted;
        occ.devices_succeeded = outcome.devices_succeeded;
        occ.devices_failed = outcome.devices_failed;
        occ.completed_at = Some(outcome.completed_at);
        Ok(occ.clone())
    }

    async fn fail_stale_queued(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Occurrence>, StoreError> {
        let mut inner = self.inner.write().await;
        let mut reaped = Vec::new();
        for occ in inner.occurrences.values_mut() {
            if occ.status == OccurrenceStatus::Queued
                && occ.claimed_at.is_none()
                && occ.due_at < cutoff
            {
                occ.status = OccurrenceStatus::Failed;
                occ.failure_reason = Some(crate::FailureReason::StaleQueued);
                occ.completed_at = Some(now);
                reaped.push(occ.clone());
            }
        }
        Ok(reaped)
    }

    async fn list_occurrences(&self, user_id: &str) -> Result<Vec<Occurrence>, StoreError> {
        let mut occs: Vec<_> = self
            .inner
            .read()
            .await
            .occurrences
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        occs.sort_by_key(|o| o.due_at);
        Ok(occs)
    }

    async fn status_counts(&self) -> Result<HashMap<OccurrenceStatus, usize>, StoreError> {
        let inner = self.inner.read().await;
        let mut counts = HashMap::new();
        for occ in inner.occurrences.values() {
            *counts.entry(occ.status).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn get_state(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.read().await.state.get(key).cloned())
    }

    async fn set_state(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.inner.write().await.state.insert(key.to_string(), value);
        Ok(())
    }

    async fn try_acquire_lock(
        &self,
        name: &str,
        owner: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.write().await;
        if let Some(lease) = inner.locks.get(name)
            && lease.owner != owner
            && lease.expires_at > now
        {
            return Ok(false);
        }
        inner.locks.insert(
            name.to_string(),
            LockLease {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        debug!(name, owner, "lease acquired");
        Ok(true)
    }

    async fn release_lock(&self, name: &str, owner: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        if inner.locks.get(name).is_some_and(|l| l.owner == owner) {
            inner.locks.remove(name);
            debug!(name, owner, "lease released");
        }
        Ok(())
    }
}
