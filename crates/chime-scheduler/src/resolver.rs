//! Recurrence resolution.
//!
//! All cadence arithmetic happens in the preference's local calendar;
//! persisted due times are always UTC. The split is what keeps daily and
//! weekly cadences stable across daylight-saving transitions: a day is
//! added as a calendar unit, not as 24 fixed hours.

use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

use chime_store::{Cadence, NotificationPreference};

/// Compute the next due instant for a preference, evaluated at `now`.
///
/// Returns `None` when the preference cannot produce an occurrence:
/// no cadence, a daily/weekly cadence missing its required local time or
/// weekday, or an unparseable timezone.
pub fn compute_next_due(
    pref: &NotificationPreference,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    // The override replaces all cadence math; it exists so the pipeline
    // can be verified end to end without waiting on a real cadence.
    if let Some(seconds) = pref.test_override_seconds {
        return Some(now + Duration::seconds(seconds as i64));
    }

    let tz = parse_zone(&pref.timezone)?;
    let now_local = now.with_timezone(&tz);

    let next_local = match pref.cadence? {
        Cadence::Hourly => {
            let top_of_hour = now_local.date_naive().and_hms_opt(now_local.hour(), 0, 0)?;
            resolve_local(tz, top_of_hour + Duration::hours(1))
        }
        Cadence::Daily => {
            let time = pref.daily_time?;
            let mut candidate = now_local.date_naive().and_time(time);
            if resolve_local(tz, candidate) <= now_local {
                candidate += Duration::days(1);
            }
            resolve_local(tz, candidate)
        }
        Cadence::Weekly => {
            let time = pref.daily_time?;
            let target = u32::from(pref.weekly_day?);
            if target > 6 {
                return None;
            }
            let mut candidate = now_local.date_naive().and_time(time);
            let mut found = None;
            for _ in 0..=7 {
                let resolved = resolve_local(tz, candidate);
                if candidate.weekday().num_days_from_sunday() == target && resolved > now_local {
                    found = Some(resolved);
                    break;
                }
                candidate += Duration::days(1);
            }
            // A matching weekday always exists within the window.
            found?
        }
    };

    Some(next_local.with_timezone(&Utc))
}

/// Derive the canonical bucket identifier for an occurrence.
///
/// The key is a deterministic function of cadence and the occurrence's
/// *local* calendar truncation, so independent computations of the same
/// occurrence by any process produce the identical key. That determinism
/// is what turns the ledger's uniqueness constraint into a dedup barrier.
pub fn bucket_key(pref: &NotificationPreference, due_at: DateTime<Utc>) -> String {
    if pref.test_override_seconds.is_some() {
        // Full-precision timestamp: every test occurrence is its own bucket.
        return format!("test:{}", due_at.to_rfc3339());
    }

    let local = match parse_zone(&pref.timezone) {
        Some(tz) => due_at.with_timezone(&tz).naive_local(),
        // Fall back to UTC truncation so even a malformed row gets a
        // stable key.
        None => due_at.naive_utc(),
    };

    match pref.cadence {
        Some(Cadence::Hourly) => format!("hourly:{}", local.format("%Y-%m-%dT%H")),
        Some(Cadence::Daily) => format!("daily:{}", local.format("%Y-%m-%d")),
        // Weekly reuses daily granularity; the weekday gate already pinned
        // which day of the week this occurrence lands on.
        Some(Cadence::Weekly) => format!("weekly:{}", local.format("%Y-%m-%d")),
        // Unreachable once compute_next_due has gated scheduling.
        None => format!("unknown:{}", local.format("%Y-%m-%dT%H:%M")),
    }
}

fn parse_zone(id: &str) -> Option<Tz> {
    match id.parse::<Tz>() {
        Ok(tz) => Some(tz),
        Err(_) => {
            warn!(timezone = id, "unparseable timezone id, preference cannot schedule");
            None
        }
    }
}

/// Map a naive local datetime into the zone.
///
/// A wall time inside a spring-forward gap is walked forward until it
/// exists; an ambiguous fall-back time maps to the earlier instant.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    let mut candidate = naive;
    loop {
        match tz.from_local_datetime(&candidate) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earliest, _) => return earliest,
            LocalResult::None => candidate += Duration::hours(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveTime;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    // === Unit Tests ===

    #[test]
    fn test_hourly_rounds_up_to_next_top_of_hour() {
        let pref = NotificationPreference::hourly("u1", "America/Chicago");
        let now = utc("2026-02-02T16:15:00Z");

        let next = compute_next_due(&pref, now).unwrap();
        assert_eq!(next, utc("2026-02-02T17:00:00Z"));

        // Chicago is UTC-6 in February: 17:00Z renders as local hour 11.
        assert_eq!(bucket_key(&pref, next), "hourly:2026-02-02T11");

        // Re-evaluating at the due instant advances to the following hour.
        let after = compute_next_due(&pref, next).unwrap();
        assert_eq!(after, utc("2026-02-02T18:00:00Z"));
    }

    #[test]
    fn test_hourly_exactly_on_the_hour_moves_forward() {
        let pref = NotificationPreference::hourly("u1", "UTC");
        let next = compute_next_due(&pref, utc("2026-02-02T16:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-02-02T17:00:00Z"));
    }

    #[test]
    fn test_daily_today_when_time_not_yet_passed() {
        let pref = NotificationPreference::daily("u1", "America/Chicago", t(9, 0));
        // 08:00 local.
        let now = utc("2026-02-02T14:00:00Z");
        let next = compute_next_due(&pref, now).unwrap();
        // 09:00 CST = 15:00Z, same day.
        assert_eq!(next, utc("2026-02-02T15:00:00Z"));
        assert_eq!(bucket_key(&pref, next), "daily:2026-02-02");
    }

    #[test]
    fn test_daily_advances_a_calendar_day_once_passed() {
        let pref = NotificationPreference::daily("u1", "America/Chicago", t(9, 0));
        // 10:00 local, past today's 09:00.
        let now = utc("2026-02-02T16:00:00Z");
        let next = compute_next_due(&pref, now).unwrap();
        assert_eq!(next, utc("2026-02-03T15:00:00Z"));
        assert_eq!(bucket_key(&pref, next), "daily:2026-02-03");
    }

    #[test]
    fn test_daily_exactly_at_time_is_not_strictly_after() {
        let pref = NotificationPreference::daily("u1", "UTC", t(9, 0));
        let next = compute_next_due(&pref, utc("2026-02-02T09:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-02-03T09:00:00Z"));
    }

    #[test]
    fn test_weekly_lands_on_requested_weekday() {
        // 2026-02-02 is a Monday; weekday 3 is Wednesday.
        let pref = NotificationPreference::weekly("u1", "UTC", 3, t(9, 0));
        let next = compute_next_due(&pref, utc("2026-02-02T12:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-02-04T09:00:00Z"));
        assert_eq!(bucket_key(&pref, next), "weekly:2026-02-04");
    }

    #[test]
    fn test_weekly_same_day_time_passed_waits_a_full_week() {
        // 2026-02-02 is a Monday (weekday 1); its 09:00 has passed.
        let pref = NotificationPreference::weekly("u1", "UTC", 1, t(9, 0));
        let next = compute_next_due(&pref, utc("2026-02-02T12:00:00Z")).unwrap();
        assert_eq!(next, utc("2026-02-09T09:00:00Z"));
    }

    #[test]
    fn test_weekly_across_spring_forward_keeps_local_rendering() {
        // US DST begins 2026-03-08 (a Sunday, weekday 0) at 02:00 local.
        let chicago: Tz = "America/Chicago".parse().unwrap();
        let pref = NotificationPreference::weekly("u1", "America/Chicago", 0, t(9, 0));
        // Monday 2026-03-02, 10:00 CST.
        let now = utc("2026-03-02T16:00:00Z");

        let next = compute_next_due(&pref, now).unwrap();
        let local = next.with_timezone(&chicago);

        assert_eq!(local.weekday().num_days_from_sunday(), 0);
        assert_eq!(local.time(), t(9, 0));
        // CDT is UTC-5, so 09:00 local is 14:00Z; fixed-duration math from
        // a CST starting point would have produced 15:00Z.
        assert_eq!(next, utc("2026-03-08T14:00:00Z"));
    }

    #[test]
    fn test_daily_inside_spring_forward_gap_shifts_forward() {
        // 02:30 does not exist on 2026-03-08 in Chicago.
        let pref = NotificationPreference::daily("u1", "America/Chicago", t(2, 30));
        let now = utc("2026-03-08T02:00:00Z"); // 20:00 CST on the 7th.
        let next = compute_next_due(&pref, now).unwrap();
        // The gap maps 02:30 onto 03:30 CDT = 08:30Z.
        assert_eq!(next, utc("2026-03-08T08:30:00Z"));
    }

    #[test]
    fn test_test_override_bypasses_cadence_math() {
        let pref = NotificationPreference::test_override("u1", 45);
        let now = utc("2026-02-02T16:15:00Z");
        assert_eq!(compute_next_due(&pref, now), Some(now + Duration::seconds(45)));

        let key = bucket_key(&pref, now);
        assert!(key.starts_with("test:2026-02-02T16:15:00"));
    }

    #[test]
    fn test_test_override_wins_over_cadence() {
        let mut pref = NotificationPreference::hourly("u1", "UTC");
        pref.test_override_seconds = Some(10);
        let now = utc("2026-02-02T16:15:00Z");
        assert_eq!(compute_next_due(&pref, now), Some(now + Duration::seconds(10)));
        assert!(bucket_key(&pref, now).starts_with("test:"));
    }

    #[test]
    fn test_unschedulable_preferences_return_none() {
        let now = utc("2026-02-02T16:15:00Z");

        let mut pref = NotificationPreference::hourly("u1", "UTC");
        pref.cadence = None;
        assert_eq!(compute_next_due(&pref, now), None);

        let mut pref = NotificationPreference::daily("u1", "UTC", t(9, 0));
        pref.daily_time = None;
        assert_eq!(compute_next_due(&pref, now), None);

        let mut pref = NotificationPreference::weekly("u1", "UTC", 3, t(9, 0));
        pref.weekly_day = None;
        assert_eq!(compute_next_due(&pref, now), None);

        let mut pref = NotificationPreference::weekly("u1", "UTC", 3, t(9, 0));
        pref.weekly_day = Some(9);
        assert_eq!(compute_next_due(&pref, now), None);

        let pref = NotificationPreference::hourly("u1", "Not/AZone");
        assert_eq!(compute_next_due(&pref, now), None);
    }

    #[test_case(Some(Cadence::Hourly), "hourly:" ; "hourly prefix")]
    #[test_case(Some(Cadence::Daily), "daily:" ; "daily prefix")]
    #[test_case(Some(Cadence::Weekly), "weekly:" ; "weekly prefix")]
    #[test_case(None, "unknown:" ; "fallback prefix")]
    fn test_bucket_key_prefixes(cadence: Option<Cadence>, prefix: &str) {
        let mut pref = NotificationPreference::hourly("u1", "UTC");
        pref.cadence = cadence;
        let key = bucket_key(&pref, utc("2026-02-02T16:15:00Z"));
        assert!(key.starts_with(prefix), "key {} missing prefix {}", key, prefix);
    }

    #[test]
    fn test_bucket_key_is_local_not_utc() {
        // 2026-02-03T03:00Z is still 2026-02-02 in Chicago.
        let pref = NotificationPreference::daily("u1", "America/Chicago", t(21, 0));
        assert_eq!(
            bucket_key(&pref, utc("2026-02-03T03:00:00Z")),
            "daily:2026-02-02"
        );
    }

    // === Property-Based Tests ===

    proptest! {
        // The resolver's output is always strictly in the future.
        #[test]
        fn next_due_is_strictly_after_now(
            offset_mins in 0i64..(14 * 24 * 60),
            cadence_pick in 0u8..3,
        ) {
            let now = utc("2026-01-01T00:00:00Z") + Duration::minutes(offset_mins);
            let pref = match cadence_pick {
                0 => NotificationPreference::hourly("u1", "America/Chicago"),
                1 => NotificationPreference::daily("u1", "America/Chicago", t(9, 0)),
                _ => NotificationPreference::weekly("u1", "America/Chicago", 0, t(9, 0)),
            };

            let next = compute_next_due(&pref, now).unwrap();
            prop_assert!(next > now, "next {} not after now {}", next, now);
        }

        // Resolution is deterministic: same inputs, same output.
        #[test]
        fn next_due_is_deterministic(offset_mins in 0i64..(14 * 24 * 60)) {
            let now = utc("2026-01-01T00:00:00Z") + Duration::minutes(offset_mins);
            let pref = NotificationPreference::daily("u1", "America/Chicago", t(9, 0));

            prop_assert_eq!(compute_next_due(&pref, now), compute_next_due(&pref, now));
        }

        // Hourly results land exactly on a local top-of-hour.
        #[test]
        fn hourly_lands_on_top_of_hour(offset_mins in 0i64..(14 * 24 * 60)) {
            let chicago: Tz = "America/Chicago".parse().unwrap();
            let now = utc("2026-01-01T00:00:00Z") + Duration::minutes(offset_mins);
            let pref = NotificationPreference::hourly("u1", "America/Chicago");

            let next = compute_next_due(&pref, now).unwrap();
            let local = next.with_timezone(&chicago);
            prop_assert_eq!(local.minute(), 0);
            prop_assert_eq!(local.second(), 0);
        }

        // Bucket keys are stable for any instant within the same local hour.
        #[test]
        fn hourly_bucket_constant_within_hour(minute in 0u32..60) {
            let pref = NotificationPreference::hourly("u1", "America/Chicago");
            let base = utc("2026-02-02T17:00:00Z");
            let within = base + Duration::minutes(i64::from(minute));

            prop_assert_eq!(bucket_key(&pref, base), bucket_key(&pref, within));
        }

        // Weekly always lands on the requested weekday, for every weekday.
        #[test]
        fn weekly_matches_requested_weekday(
            day in 0u8..7,
            offset_hours in 0i64..(21 * 24),
        ) {
            let chicago: Tz = "America/Chicago".parse().unwrap();
            let now = utc("2026-01-01T00:00:00Z") + Duration::hours(offset_hours);
            let pref = NotificationPreference::weekly("u1", "America/Chicago", day, t(9, 0));

            let next = compute_next_due(&pref, now).unwrap();
            let local = next.with_timezone(&chicago);
            prop_assert_eq!(local.weekday().num_days_from_sunday(), u32::from(day));
            prop_assert!(next - now <= Duration::days(8), "weekly jumped past one week");
        }
    }

    // === Metamorphic Tests ===

    // Chaining the resolver from its own output walks strictly forward.
    #[test]
    fn metamorphic_resolution_chain_is_strictly_increasing() {
        let pref = NotificationPreference::daily("u1", "America/Chicago", t(9, 0));
        let mut now = utc("2026-03-05T00:00:00Z");

        let mut previous = None;
        // Walks across the 2026-03-08 spring-forward transition.
        for _ in 0..10 {
            let next = compute_next_due(&pref, now).unwrap();
            if let Some(prev) = previous {
                assert!(next > prev, "chain regressed: {} then {}", prev, next);
            }
            previous = Some(next);
            now = next;
        }
    }

    // Two users in the same zone computing the same occurrence agree on
    // the bucket, which is what the ledger's uniqueness key relies on.
    #[test]
    fn metamorphic_bucket_agreement_across_computations() {
        let a = NotificationPreference::hourly("u1", "America/Chicago");
        let b = NotificationPreference::hourly("u1", "America/Chicago");
        let due = utc("2026-02-02T17:00:00Z");

        assert_eq!(bucket_key(&a, due), bucket_key(&b, due));
    }
}
