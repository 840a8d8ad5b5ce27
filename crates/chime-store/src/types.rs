//! Persisted entities.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// A user account. Owns preferences and subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: String,
    /// Disabled accounts are excluded from the due scan.
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    /// Create an active account.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            disabled: false,
            created_at: Utc::now(),
        }
    }
}

/// A registered push delivery endpoint.
///
/// The key material is opaque to the engine; only the transport behind
/// `PushSender` interprets it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushSubscription {
    pub user_id: String,
    /// Push service URL. Unique within a user's subscription set.
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
    pub created_at: DateTime<Utc>,
}

/// Recurrence family governing how often a preference produces occurrences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Hourly,
    Daily,
    Weekly,
}

/// Per-user notification settings plus the engine's scheduling pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreference {
    pub user_id: String,
    pub enabled: bool,
    pub cadence: Option<Cadence>,
    /// Local time of day. Required for daily and weekly cadences.
    pub daily_time: Option<NaiveTime>,
    /// Day of week, 0 = Sunday through 6 = Saturday. Required for weekly.
    pub weekly_day: Option<u8>,
    /// IANA zone id, e.g. "America/Chicago".
    pub timezone: String,
    /// When set, the preference is due every N seconds regardless of
    /// cadence. Used to verify the pipeline without waiting on real
    /// cadences.
    pub test_override_seconds: Option<u64>,
    /// Due time of the next occurrence. Advanced past "now" by every tick
    /// that evaluates it, whether or not dispatch succeeded.
    pub next_due_at: Option<DateTime<Utc>>,
    /// Updated after a confirmed successful delivery. Advisory only;
    /// never consulted for dedup.
    pub last_sent_at: Option<DateTime<Utc>>,
}

impl NotificationPreference {
    /// An hourly preference in the given zone.
    pub fn hourly(user_id: impl Into<String>, timezone: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            enabled: true,
            cadence: Some(Cadence::Hourly),
            daily_time: None,
            weekly_day: None,
            timezone: timezone.into(),
            test_override_seconds: None,
            next_due_at: None,
            last_sent_at: None,
        }
    }

    /// A daily preference at the given local time.
    pub fn daily(
        user_id: impl Into<String>,
        timezone: impl Into<String>,
        daily_time: NaiveTime,
    ) -> Self {
        Self {
            daily_time: Some(daily_time),
            cadence: Some(Cadence::Daily),
            ..Self::hourly(user_id, timezone)
        }
    }

    /// A weekly preference on the given day (0 = Sunday) at the given
    /// local time.
    pub fn weekly(
        user_id: impl Into<String>,
        timezone: impl Into<String>,
        weekly_day: u8,
        daily_time: NaiveTime,
    ) -> Self {
        Self {
            daily_time: Some(daily_time),
            weekly_day: Some(weekly_day),
            cadence: Some(Cadence::Weekly),
            ..Self::hourly(user_id, timezone)
        }
    }

    /// A test-override preference, due every `seconds` seconds.
    pub fn test_override(user_id: impl Into<String>, seconds: u64) -> Self {
        Self {
            test_override_seconds: Some(seconds),
            cadence: None,
            ..Self::hourly(user_id, "UTC")
        }
    }
}

/// Lifecycle state of a ledger row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccurrenceStatus {
    /// Created by the orchestrator, waiting for its delivery attempt.
    #[default]
    Queued,
    /// At least one endpoint accepted the delivery.
    Sent,
    /// Terminal failure; see the failure reason.
    Failed,
    /// Terminal skip without a delivery attempt.
    Skipped,
}

impl OccurrenceStatus {
    /// Whether this status ends the row's lifecycle. Terminal rows are
    /// never mutated again.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued)
    }
}

impl std::fmt::Display for OccurrenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Why a delivery ended without a successful send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Queued row never claimed within the grace window.
    StaleQueued,
    /// A prior attempt claimed the row and never finished; never retried.
    AlreadyAttempted,
    /// Target user no longer exists.
    UserMissing,
    /// Target has no registered delivery endpoints.
    NoSubscriptions,
    /// Every targeted endpoint was reported expired.
    AllExpired,
    /// Zero successes, not expiry-only.
    AllFailed,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::StaleQueued => "stale_queued",
            Self::AlreadyAttempted => "already_attempted",
            Self::UserMissing => "user_missing",
            Self::NoSubscriptions => "no_subscriptions",
            Self::AllExpired => "all_expired",
            Self::AllFailed => "all_failed",
        };
        write!(f, "{}", s)
    }
}

/// One due instance of a preference's cadence: the unit of delivery and of
/// the idempotency guarantee.
///
/// Identity is `(user_id, bucket_key)`. The store enforces uniqueness on
/// that pair, which is what collapses independent computations of the same
/// occurrence into a single delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Occurrence {
    pub user_id: String,
    pub bucket_key: String,
    pub due_at: DateTime<Utc>,
    /// Set exactly once, at the first execution attempt. A claimed but
    /// unfinished row is skipped, never re-attempted.
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: OccurrenceStatus,
    pub failure_reason: Option<FailureReason>,
    pub devices_targeted: u32,
    pub devices_succeeded: u32,
    pub devices_failed: u32,
    pub created_at: DateTime<Utc>,
}

impl Occurrence {
    /// A freshly queued ledger row.
    pub fn queued(
        user_id: impl Into<String>,
        bucket_key: impl Into<String>,
        due_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            bucket_key: bucket_key.into(),
            due_at,
            claimed_at: None,
            completed_at: None,
            status: OccurrenceStatus::Queued,
            failure_reason: None,
            devices_targeted: 0,
            devices_succeeded: 0,
            devices_failed: 0,
            created_at: now,
        }
    }
}

/// Terminal outcome written back to a ledger row by the executor.
#[derive(Debug, Clone)]
pub struct OccurrenceOutcome {
    pub status: OccurrenceStatus,
    pub failure_reason: Option<FailureReason>,
    pub devices_targeted: u32,
    pub devices_succeeded: u32,
    pub devices_failed: u32,
    pub completed_at: DateTime<Utc>,
}

impl OccurrenceOutcome {
    /// A successful delivery: at least one endpoint accepted.
    pub fn sent(targeted: u32, succeeded: u32, failed: u32, now: DateTime<Utc>) -> Self {
        Self {
            status: OccurrenceStatus::Sent,
            failure_reason: None,
            devices_targeted: targeted,
            devices_succeeded: succeeded,
            devices_failed: failed,
            completed_at: now,
        }
    }

    /// A terminal failure with the given reason.
    pub fn failed(reason: FailureReason, targeted: u32, failed: u32, now: DateTime<Utc>) -> Self {
        Self {
            status: OccurrenceStatus::Failed,
            failure_reason: Some(reason),
            devices_targeted: targeted,
            devices_succeeded: 0,
            devices_failed: failed,
            completed_at: now,
        }
    }

    /// A terminal skip without a delivery attempt.
    pub fn skipped(reason: FailureReason, now: DateTime<Utc>) -> Self {
        Self {
            status: OccurrenceStatus::Skipped,
            failure_reason: Some(reason),
            devices_targeted: 0,
            devices_succeeded: 0,
            devices_failed: 0,
            completed_at: now,
        }
    }
}
