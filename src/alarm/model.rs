use anyhow::{Result, anyhow};
use chrono::Weekday;
use serde::Serialize;
use tracing::{debug, warn};

use crate::variant::{Variant, parse_variant_text};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmRecord {
    pub name: String,
    pub hour: u32,
    pub minute: u32,
    // 1 = Monday through 7 = Sunday, empty means every day
    pub days: Vec<Option<i64>>,
    pub active: Option<bool>,
    pub ring_time: Option<String>,
}

impl AlarmRecord {
    pub fn is_candidate(&self) -> bool {
        self.active != Some(false) && self.ring_time.is_some()
    }

    pub fn rings_on(&self, weekday: Weekday) -> bool {
        self.days.is_empty()
            || self
                .days
                .contains(&Some(i64::from(weekday.number_from_monday())))
    }
}

pub fn candidates(alarms: &[AlarmRecord]) -> impl Iterator<Item = &AlarmRecord> {
    alarms.iter().filter(|alarm| alarm.is_candidate())
}

pub fn parse_alarm_list_text(content: &str) -> Result<Vec<AlarmRecord>> {
    let value = parse_store_text(content)?;
    Ok(decode_alarms(&value))
}

pub fn parse_store_text(content: &str) -> Result<Variant> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(Variant::Array(Vec::new()));
    }

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(value) => Ok(Variant::from(value)),
        Err(json_err) => parse_variant_text(trimmed).map_err(|variant_err| {
            anyhow!(
                "invalid alarm list: not JSON (line {}, column {}: {json_err}) and not GVariant text ({variant_err})",
                json_err.line(),
                json_err.column()
            )
        }),
    }
}

pub fn decode_alarms(value: &Variant) -> Vec<AlarmRecord> {
    let Some(entries) = value.as_array() else {
        if !matches!(value.unpack(), Variant::Maybe(None)) {
            warn!("alarm list is not a list, ignoring it");
        }
        return Vec::new();
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| decode_alarm(index, entry))
        .collect()
}

fn decode_alarm(index: usize, entry: &Variant) -> Option<AlarmRecord> {
    if !matches!(entry.unpack(), Variant::Dict(_)) {
        debug!(index, "skipping alarm entry that is not a dictionary");
        return None;
    }

    let hour = entry.lookup("hour").and_then(Variant::as_i64).unwrap_or(0);
    let minute = entry.lookup("minute").and_then(Variant::as_i64).unwrap_or(0);
    let (Ok(hour @ 0..=23), Ok(minute @ 0..=59)) = (u32::try_from(hour), u32::try_from(minute))
    else {
        warn!(index, hour, minute, "skipping alarm with out-of-range time");
        return None;
    };

    let days = entry
        .lookup("days")
        .map(Variant::deep_unpack)
        .map(|days| {
            days.as_array()
                .unwrap_or_default()
                .iter()
                .map(day_number)
                .collect()
        })
        .unwrap_or_default();

    Some(AlarmRecord {
        name: entry.lookup("name").map(display_string).unwrap_or_default(),
        hour,
        minute,
        days,
        active: entry.lookup("active").and_then(Variant::as_bool),
        ring_time: entry
            .lookup("ring_time")
            .filter(|value| value.is_truthy())
            .map(display_string),
    })
}

// Entries compare by numeric identity; text such as "3" stays in the list
// but never matches a weekday.
fn day_number(value: &Variant) -> Option<i64> {
    match value {
        Variant::Int(day) => Some(*day),
        Variant::Double(day) if day.fract() == 0.0 => Some(*day as i64),
        _ => None,
    }
}

fn display_string(value: &Variant) -> String {
    match value.unpack() {
        Variant::Str(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_gsettings_text() {
        let text = "[{'name': <'Wake'>, 'hour': <6>, 'minute': <45>, 'days': <[1, 2, 3, 4, 5]>, \
            'active': <true>, 'ring_time': <'2026-02-09T06:45:00+0100'>}]";
        let alarms = parse_alarm_list_text(text).expect("valid list");
        assert_eq!(
            alarms,
            vec![AlarmRecord {
                name: "Wake".to_string(),
                hour: 6,
                minute: 45,
                days: (1..=5).map(Some).collect(),
                active: Some(true),
                ring_time: Some("2026-02-09T06:45:00+0100".to_string()),
            }]
        );
        assert!(alarms[0].is_candidate());
    }

    #[test]
    fn parses_plain_json() {
        let json = r#"
[
  {"name": "Standup", "hour": 9, "minute": 30, "days": [1, 3], "ring_time": "set"},
  {"name": "Off", "hour": 10, "minute": 0, "active": false, "ring_time": "set"}
]
"#;
        let alarms = parse_alarm_list_text(json).expect("valid list");
        assert_eq!(alarms.len(), 2);
        assert_eq!(alarms[0].active, None);
        assert!(alarms[0].is_candidate());
        assert!(!alarms[1].is_candidate());
        assert_eq!(candidates(&alarms).count(), 1);
    }

    #[test]
    fn empty_or_nothing_means_no_alarms() {
        assert!(parse_alarm_list_text("").expect("empty").is_empty());
        assert!(parse_alarm_list_text("  @aa{sv} []\n").expect("typed empty").is_empty());
        assert!(parse_alarm_list_text("null").expect("null").is_empty());
        assert!(decode_alarms(&Variant::Int(3)).is_empty());
    }

    #[test]
    fn rejects_text_that_is_neither_format() {
        let err = parse_alarm_list_text("{ not-valid ").expect_err("garbage should fail");
        assert!(err.to_string().contains("invalid alarm list"));
    }

    #[test]
    fn coerces_malformed_fields() {
        let json = r#"[{"hour": "7", "minute": 15.9, "days": [null, [1], 5, 2.0], "ring_time": 1}]"#;
        let alarms = parse_alarm_list_text(json).expect("valid list");
        assert_eq!(alarms[0].hour, 7);
        assert_eq!(alarms[0].minute, 15);
        assert_eq!(alarms[0].days, vec![None, None, Some(5), Some(2)]);
        assert_eq!(alarms[0].name, "");
        assert_eq!(alarms[0].ring_time.as_deref(), Some("1"));
    }

    #[test]
    fn textual_days_never_match() {
        let json = r#"[{"hour": 8, "days": ["3", "wed", 3.5], "ring_time": "t"}]"#;
        let alarms = parse_alarm_list_text(json).expect("valid list");
        assert_eq!(alarms[0].days, vec![None, None, None]);
        assert!(!alarms[0].rings_on(Weekday::Wed));

        let gvariant = "[{'hour': <8>, 'days': <['3']>, 'ring_time': <'t'>}]";
        let alarms = parse_alarm_list_text(gvariant).expect("valid list");
        assert_eq!(alarms[0].days, vec![None]);
        assert!(!alarms[0].rings_on(Weekday::Wed));
    }

    #[test]
    fn deeply_nested_text_is_an_error() {
        let deep = format!("{}{}", "[".repeat(200_000), "]".repeat(200_000));
        let err = parse_alarm_list_text(&deep).expect_err("nesting should be bounded");
        assert!(err.to_string().contains("nested too deeply"));
    }

    #[test]
    fn missing_time_fields_read_as_midnight() {
        let alarms = parse_alarm_list_text(r#"[{"name": "x", "ring_time": "t"}]"#).expect("valid");
        assert_eq!((alarms[0].hour, alarms[0].minute), (0, 0));
    }

    #[test]
    fn drops_out_of_range_times_and_non_dictionaries() {
        let json = r#"[{"hour": 24, "minute": 0, "ring_time": "t"}, 5, {"hour": 1, "minute": -1}]"#;
        assert!(parse_alarm_list_text(json).expect("valid").is_empty());
    }

    #[test]
    fn falsy_ring_time_is_absent() {
        let json = r#"[{"hour": 1, "ring_time": ""}, {"hour": 2, "ring_time": null}, {"hour": 3, "ring_time": 0}]"#;
        let alarms = parse_alarm_list_text(json).expect("valid");
        assert_eq!(alarms.len(), 3);
        assert!(alarms.iter().all(|alarm| alarm.ring_time.is_none()));
        assert_eq!(candidates(&alarms).count(), 0);
    }

    #[test]
    fn weekday_membership_uses_monday_first_numbering() {
        let alarm = AlarmRecord {
            name: String::new(),
            hour: 0,
            minute: 0,
            days: vec![Some(3), Some(7)],
            active: None,
            ring_time: None,
        };
        assert!(alarm.rings_on(Weekday::Wed));
        assert!(alarm.rings_on(Weekday::Sun));
        assert!(!alarm.rings_on(Weekday::Mon));

        let unknown_day_only = AlarmRecord {
            days: vec![Some(9)],
            ..alarm
        };
        assert!(!unknown_day_only.rings_on(Weekday::Tue));
    }
}
