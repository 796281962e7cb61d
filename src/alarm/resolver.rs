use chrono::{
    DateTime, Datelike, Days, Local, LocalResult, NaiveDateTime, NaiveTime, TimeDelta, TimeZone,
};
use serde::Serialize;

use crate::alarm::countdown::format_minutes;
use crate::alarm::model::{AlarmRecord, candidates};

pub const PROJECTION_DAYS: u64 = 8;
pub const IMMINENT_WINDOW_MINUTES: i64 = 2;

const MILLIS_PER_MINUTE: i64 = 60_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedAlarm {
    #[serde(flatten)]
    pub alarm: AlarmRecord,
    pub minutes_until_ring: i64,
    pub display_text: String,
    pub ring_at: NaiveDateTime,
}

impl ResolvedAlarm {
    pub fn is_imminent(&self) -> bool {
        (0..=IMMINENT_WINDOW_MINUTES).contains(&self.minutes_until_ring)
    }
}

struct Projection<'a> {
    alarm: &'a AlarmRecord,
    ring_at: NaiveDateTime,
    diff_minutes: i64,
}

pub fn resolve_next(alarms: &[AlarmRecord]) -> Option<ResolvedAlarm> {
    resolve_next_at(alarms, &Local::now(), &Local)
}

// The first day with any ringing candidate decides; within it the smallest
// wait wins, earlier records first on ties.
pub fn resolve_next_at<Tz>(
    alarms: &[AlarmRecord],
    now: &DateTime<Tz>,
    timezone: &Tz,
) -> Option<ResolvedAlarm>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let candidates = candidates(alarms).collect::<Vec<_>>();
    if candidates.is_empty() {
        return None;
    }

    for day_offset in 0..PROJECTION_DAYS {
        let mut projections = project_day(&candidates, day_offset, now, timezone);
        if projections.is_empty() {
            continue;
        }

        projections.sort_by_key(|projection| projection.diff_minutes);
        let first = projections.into_iter().next()?;
        return Some(ResolvedAlarm {
            alarm: first.alarm.clone(),
            minutes_until_ring: first.diff_minutes,
            display_text: format_minutes(first.diff_minutes),
            ring_at: first.ring_at,
        });
    }

    None
}

fn project_day<'a, Tz>(
    candidates: &[&'a AlarmRecord],
    day_offset: u64,
    now: &DateTime<Tz>,
    timezone: &Tz,
) -> Vec<Projection<'a>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    let Some(date) = now.date_naive().checked_add_days(Days::new(day_offset)) else {
        return Vec::new();
    };
    let weekday = date.weekday();

    candidates
        .iter()
        .filter_map(|alarm| {
            let time = NaiveTime::from_hms_opt(alarm.hour, alarm.minute, 0)?;
            let ring_at = resolve_local_datetime(timezone, date.and_time(time))?;
            let diff_ms = ring_at.signed_duration_since(now).num_milliseconds();

            if day_offset == 0 && diff_ms <= 0 {
                return None;
            }
            if !alarm.rings_on(weekday) {
                return None;
            }

            Some(Projection {
                alarm,
                ring_at: ring_at.naive_local(),
                diff_minutes: diff_ms.div_euclid(MILLIS_PER_MINUTE),
            })
        })
        .collect()
}

// Ambiguous wall times take the earlier instant; times inside a DST gap
// move forward by an hour.
fn resolve_local_datetime<Tz>(timezone: &Tz, naive: NaiveDateTime) -> Option<DateTime<Tz>>
where
    Tz: TimeZone,
    Tz::Offset: Copy,
{
    match timezone.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(first, _second) => Some(first),
        LocalResult::None => timezone
            .from_local_datetime(&(naive + TimeDelta::hours(1)))
            .earliest(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Local, NaiveDate, TimeZone, Timelike, Utc, Weekday};
    use chrono_tz::America::New_York;

    use super::*;

    fn alarm(name: &str, hour: u32, minute: u32, days: &[i64]) -> AlarmRecord {
        AlarmRecord {
            name: name.to_string(),
            hour,
            minute,
            days: days.iter().copied().map(Some).collect(),
            active: Some(true),
            ring_time: Some("2026-02-09T00:00:00Z".to_string()),
        }
    }

    // Monday 2026-02-09, UTC.
    fn monday_at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 9, hour, minute, second)
            .single()
            .expect("valid time")
    }

    fn resolve(alarms: &[AlarmRecord], now: DateTime<Utc>) -> Option<ResolvedAlarm> {
        resolve_next_at(alarms, &now, &Utc)
    }

    #[test]
    fn alarm_later_today_is_next() {
        let next = resolve(&[alarm("Wake", 7, 10, &[])], monday_at(7, 0, 0)).expect("next alarm");
        assert_eq!(next.alarm.name, "Wake");
        assert_eq!(next.minutes_until_ring, 10);
        assert_eq!(next.display_text, "10m");
        assert_eq!(
            next.ring_at,
            NaiveDate::from_ymd_opt(2026, 2, 9)
                .expect("date")
                .and_hms_opt(7, 10, 0)
                .expect("time")
        );
    }

    #[test]
    fn empty_list_has_no_next_alarm() {
        assert_eq!(resolve(&[], monday_at(7, 0, 0)), None);
    }

    #[test]
    fn disabled_alarm_is_never_returned() {
        let mut disabled = alarm("Off", 7, 10, &[]);
        disabled.active = Some(false);
        assert_eq!(resolve(&[disabled], monday_at(7, 0, 0)), None);
    }

    #[test]
    fn unset_active_flag_still_rings() {
        let mut unflagged = alarm("Unflagged", 7, 10, &[]);
        unflagged.active = None;
        assert!(resolve(&[unflagged], monday_at(7, 0, 0)).is_some());
    }

    #[test]
    fn alarm_without_ring_time_is_never_returned() {
        let mut placeholder = alarm("Placeholder", 7, 10, &[]);
        placeholder.ring_time = None;
        assert_eq!(resolve(&[placeholder], monday_at(7, 0, 0)), None);
    }

    #[test]
    fn passed_alarm_moves_to_tomorrow() {
        let next = resolve(&[alarm("Early", 6, 30, &[])], monday_at(7, 0, 0)).expect("tomorrow");
        assert_eq!(next.minutes_until_ring, 23 * 60 + 30);
        assert_eq!(next.display_text, "23h 30m");
        assert_eq!(next.ring_at.date().weekday(), Weekday::Tue);
    }

    #[test]
    fn alarm_at_exactly_now_waits_a_day() {
        let next = resolve(&[alarm("Now", 7, 0, &[])], monday_at(7, 0, 0)).expect("tomorrow");
        assert_eq!(next.minutes_until_ring, 1440);
        assert_eq!(next.display_text, "1d 00h 00m");
    }

    #[test]
    fn sub_minute_wait_floors_to_zero_and_is_imminent() {
        let next = resolve(&[alarm("Soon", 7, 1, &[])], monday_at(7, 0, 30)).expect("today");
        assert_eq!(next.minutes_until_ring, 0);
        assert_eq!(next.display_text, "");
        assert!(next.is_imminent());
    }

    #[test]
    fn imminent_window_is_two_minutes() {
        let now = monday_at(7, 0, 0);
        let two = resolve(&[alarm("Two", 7, 2, &[])], now).expect("next");
        assert!(two.is_imminent());
        let three = resolve(&[alarm("Three", 7, 3, &[])], now).expect("next");
        assert!(!three.is_imminent());
    }

    #[test]
    fn recurrence_selects_matching_weekday_only() {
        let wednesday = resolve(&[alarm("Wed", 6, 0, &[3])], monday_at(7, 0, 0)).expect("wed");
        assert_eq!(wednesday.ring_at.date().weekday(), Weekday::Wed);
        assert_eq!(wednesday.minutes_until_ring, 2 * 1440 - 60);
        assert_eq!(wednesday.display_text, "1d 23h 00m");
    }

    #[test]
    fn sunday_is_day_seven() {
        let sunday = resolve(&[alarm("Sun", 8, 0, &[7])], monday_at(7, 0, 0)).expect("sun");
        assert_eq!(sunday.ring_at.date().weekday(), Weekday::Sun);
        assert_eq!(sunday.minutes_until_ring, 6 * 1440 + 60);
    }

    #[test]
    fn same_weekday_next_week_is_reached_on_the_last_offset() {
        let next = resolve(&[alarm("Weekly", 6, 0, &[1])], monday_at(7, 0, 0)).expect("next week");
        assert_eq!(next.ring_at.date(), NaiveDate::from_ymd_opt(2026, 2, 16).expect("date"));
        assert_eq!(next.minutes_until_ring, 7 * 1440 - 60);
    }

    #[test]
    fn unknown_weekday_never_rings() {
        assert_eq!(resolve(&[alarm("Never", 8, 0, &[9])], monday_at(7, 0, 0)), None);
    }

    #[test]
    fn smallest_wait_wins_within_a_day() {
        let alarms = [alarm("Later", 7, 45, &[]), alarm("Sooner", 7, 10, &[])];
        let next = resolve(&alarms, monday_at(7, 0, 0)).expect("next");
        assert_eq!(next.alarm.name, "Sooner");
        assert_eq!(next.minutes_until_ring, 10);
    }

    #[test]
    fn ties_keep_list_order() {
        let alarms = [alarm("First", 8, 0, &[]), alarm("Second", 8, 0, &[])];
        let next = resolve(&alarms, monday_at(7, 0, 0)).expect("next");
        assert_eq!(next.alarm.name, "First");
    }

    #[test]
    fn first_day_with_a_match_wins() {
        // Today's only survivor rings at 23:59; tomorrow's Tuesday-only
        // alarm and the daily 06:00 alarm belong to later days.
        let alarms = [
            alarm("Tuesday", 0, 1, &[2]),
            alarm("Daily", 6, 0, &[]),
            alarm("Late", 23, 59, &[]),
        ];
        let next = resolve(&alarms, monday_at(7, 0, 0)).expect("next");
        assert_eq!(next.alarm.name, "Late");
        assert_eq!(next.minutes_until_ring, 16 * 60 + 59);
    }

    #[test]
    fn result_matches_flattened_minimum_across_days() {
        let alarms = [
            alarm("Tuesday", 0, 1, &[2]),
            alarm("Weekend", 9, 0, &[6, 7]),
            alarm("Passed", 6, 0, &[]),
        ];
        let now = monday_at(7, 0, 0);
        let next = resolve(&alarms, now).expect("next");

        let flattened_min = (0..PROJECTION_DAYS)
            .flat_map(|offset| {
                let candidates = alarms.iter().collect::<Vec<_>>();
                project_day(&candidates, offset, &now, &Utc)
                    .into_iter()
                    .map(|projection| projection.diff_minutes)
                    .collect::<Vec<_>>()
            })
            .min()
            .expect("some projection");
        assert_eq!(next.alarm.name, "Tuesday");
        assert_eq!(next.minutes_until_ring, flattened_min);
        assert_eq!(next.minutes_until_ring, 17 * 60 + 1);
    }

    #[test]
    fn dst_fall_back_uses_first_ambiguous_instant() {
        let now = New_York
            .with_ymd_and_hms(2026, 11, 1, 0, 0, 0)
            .single()
            .expect("valid");
        let next = resolve_next_at(&[alarm("Fall", 1, 30, &[])], &now, &New_York).expect("next");
        assert_eq!(next.minutes_until_ring, 90);
    }

    #[test]
    fn dst_spring_forward_gap_moves_forward_an_hour() {
        let now = New_York
            .with_ymd_and_hms(2026, 3, 8, 0, 30, 0)
            .single()
            .expect("valid");
        let next =
            resolve_next_at(&[alarm("Spring", 2, 30, &[])], &now, &New_York).expect("next");
        assert_eq!(next.ring_at.time().hour(), 3);
        assert_eq!(next.minutes_until_ring, 120);
    }

    #[test]
    fn repeated_calls_agree() {
        let target = (Local::now() + TimeDelta::minutes(10)).time();
        let alarms = [alarm("Soon", target.hour(), target.minute(), &[])];

        let first = resolve_next(&alarms).expect("first");
        let second = resolve_next(&alarms).expect("second");
        assert_eq!(first.alarm, second.alarm);
        assert!((first.minutes_until_ring - second.minutes_until_ring).abs() <= 1);
        assert!((9..=10).contains(&first.minutes_until_ring));
        assert!(!first.display_text.is_empty());
    }
}
