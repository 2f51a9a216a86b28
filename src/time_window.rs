//! Pure time-window arithmetic over a campaign's daily schedule.
//!
//! Every function here takes `(schedule, now)` and returns a bool; none of
//! them touch the store, the clock, or any other side effect, which is what
//! makes `SchedulerLoop` safe to call them on every tick without a guard.

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::models::Schedule;

/// `now` converted into the schedule's timezone, falling back to UTC (with
/// a warning) for a timezone this build of `chrono-tz` doesn't recognize.
/// §4.1 documents this as a deliberate fallback, not an error.
fn localize(schedule: &Schedule, now: DateTime<Utc>) -> DateTime<Tz> {
    match schedule.timezone.parse::<Tz>() {
        Ok(tz) => now.with_timezone(&tz),
        Err(_) => {
            tracing::warn!(
                timezone = %schedule.timezone,
                "unknown timezone, falling back to UTC"
            );
            now.with_timezone(&chrono_tz::UTC)
        }
    }
}

fn tz_of(schedule: &Schedule) -> Tz {
    schedule.timezone.parse::<Tz>().unwrap_or(chrono_tz::UTC)
}

/// The `(S, E)` instants for `schedule`'s window on `reference_date`, in the
/// schedule's timezone. `E` rolls to the next day when `end_time <
/// scheduled_time` (a window that crosses midnight).
fn window_bounds(
    schedule: &Schedule,
    reference_date: chrono::NaiveDate,
) -> (DateTime<Tz>, DateTime<Tz>) {
    let tz = tz_of(schedule);
    let start_naive = NaiveDateTime::new(reference_date, schedule.scheduled_time);
    let start = single_or_earliest(&tz, start_naive);

    let end_date = if schedule.end_time < schedule.scheduled_time {
        reference_date + Duration::days(1)
    } else {
        reference_date
    };
    let end_naive = NaiveDateTime::new(end_date, schedule.end_time);
    let end = single_or_earliest(&tz, end_naive);

    (start, end)
}

/// DST transitions can make a local wall-clock time ambiguous (fall back)
/// or nonexistent (spring forward). Neither case is specified precisely by
/// spec.md §9 ("best-effort"); we take the earliest valid instant, which
/// keeps `shouldStart`/`shouldStop` monotonic in wall-clock time.
fn single_or_earliest(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(earliest, _) => earliest,
        chrono::LocalResult::None => tz.from_utc_datetime(&naive),
    }
}

/// The grace period after a window opens during which a process that just
/// started (or just came back from downtime) will still pick it up.
const START_GRACE: Duration = Duration::minutes(30);

/// `now >= S && now < S + 30min && now < E`.
pub fn should_start(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    let local = localize(schedule, now);
    let (start, end) = window_bounds(schedule, schedule.scheduled_date);
    local >= start && local < start + START_GRACE && local < end
}

/// The calendar date `window_bounds` should be anchored to for whatever
/// window is currently in effect around `local`. Ordinarily that's just
/// `local`'s own date; for a window that crosses midnight (`endTime <
/// scheduledTime`), a `local` time-of-day before `scheduledTime` actually
/// falls inside the window that opened *yesterday*, so the anchor shifts
/// back a day. This is what lets `should_stop`/`can_resume_in_window` track
/// "today's" window across a campaign's entire multi-day lifetime instead
/// of freezing on the day the campaign first started.
fn current_window_reference_date(schedule: &Schedule, local: DateTime<Tz>) -> chrono::NaiveDate {
    let today = local.date_naive();
    if local.time() < schedule.scheduled_time {
        today - Duration::days(1)
    } else {
        today
    }
}

/// `now >= E`, evaluated against *today's* window — not the campaign's
/// original `scheduledDate` — so a campaign that's still active days after
/// it first started keeps being measured against the window that's
/// actually running right now.
pub fn should_stop(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    let local = localize(schedule, now);
    let reference_date = current_window_reference_date(schedule, local);
    let (_, end) = window_bounds(schedule, reference_date);
    local >= end
}

/// `S <= now < E`, evaluated against *today's* window in the schedule's
/// timezone — used to resume a `paused-time-window` campaign on a later
/// day at the same daily hour.
pub fn can_resume_in_window(schedule: &Schedule, now: DateTime<Utc>) -> bool {
    let local = localize(schedule, now);
    let reference_date = current_window_reference_date(schedule, local);
    let (start, end) = window_bounds(schedule, reference_date);
    local >= start && local < end
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn schedule(date: NaiveDate, start: &str, end: &str, tz: &str) -> Schedule {
        Schedule {
            scheduled_date: date,
            scheduled_time: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            end_time: NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
            timezone: tz.to_string(),
        }
    }

    fn ny_instant(date: NaiveDate, time: &str) -> DateTime<Utc> {
        let naive = NaiveDateTime::new(date, NaiveTime::parse_from_str(time, "%H:%M").unwrap());
        chrono_tz::America::New_York
            .from_local_datetime(&naive)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn should_start_true_at_exact_open() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let sched = schedule(date, "10:00", "18:00", "America/New_York");
        assert!(should_start(&sched, ny_instant(date, "10:00")));
    }

    #[test]
    fn should_start_false_before_window() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let sched = schedule(date, "10:00", "18:00", "America/New_York");
        assert!(!should_start(&sched, ny_instant(date, "09:59")));
    }

    #[test]
    fn should_start_false_after_grace_period() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let sched = schedule(date, "10:00", "18:00", "America/New_York");
        assert!(!should_start(&sched, ny_instant(date, "10:31")));
    }

    #[test]
    fn should_start_true_within_grace_period() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let sched = schedule(date, "10:00", "18:00", "America/New_York");
        assert!(should_start(&sched, ny_instant(date, "10:29")));
    }

    #[test]
    fn should_stop_true_at_end() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let sched = schedule(date, "10:00", "10:05", "America/New_York");
        assert!(should_stop(&sched, ny_instant(date, "10:05")));
        assert!(!should_stop(&sched, ny_instant(date, "10:04")));
    }

    #[test]
    fn past_midnight_window_rolls_end_to_next_day() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let sched = schedule(date, "22:00", "02:00", "America/New_York");
        // 01:00 the *next* calendar day is still inside the window.
        let next_day = date + Duration::days(1);
        assert!(!should_stop(&sched, ny_instant(next_day, "01:00")));
        assert!(should_stop(&sched, ny_instant(next_day, "02:00")));
    }

    #[test]
    fn should_stop_tracks_todays_window_after_a_multi_day_resume() {
        // S5: a campaign resumed on a later day must be measured against
        // *that* day's window, not the day it originally started.
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let sched = schedule(date, "10:00", "10:05", "America/New_York");
        let next_day = date + Duration::days(1);
        assert!(!should_stop(&sched, ny_instant(next_day, "10:02")));
        assert!(should_stop(&sched, ny_instant(next_day, "10:05")));
    }

    #[test]
    fn can_resume_in_window_next_day() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let sched = schedule(date, "10:00", "10:05", "America/New_York");
        let next_day = date + Duration::days(1);
        assert!(can_resume_in_window(&sched, ny_instant(next_day, "10:02")));
        assert!(!can_resume_in_window(&sched, ny_instant(next_day, "10:06")));
    }

    #[test]
    fn unknown_timezone_falls_back_to_utc() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let sched = schedule(date, "10:00", "18:00", "Not/A_Zone");
        let now = Utc.with_ymd_and_hms(2026, 7, 28, 10, 0, 0).unwrap();
        assert!(should_start(&sched, now));
    }
}
