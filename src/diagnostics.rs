use std::io::{self, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};

use crate::alarm::model::{AlarmRecord, candidates};
use crate::alarm::resolver::resolve_next_at;
use crate::indicator::{format_clock_time, panel_label};
use crate::settings::{SelectedStore, load_alarms_strict};

pub fn run_diagnostics(selected: &SelectedStore, now: DateTime<Local>) -> Result<()> {
    let alarms = load_alarms_strict(selected.store.as_ref())
        .with_context(|| format!("failed to load alarms from {}", selected.label))?;
    let stdout = io::stdout();
    write_report(&mut stdout.lock(), selected, &alarms, now)
}

fn write_report<W: Write>(
    out: &mut W,
    selected: &SelectedStore,
    alarms: &[AlarmRecord],
    now: DateTime<Local>,
) -> Result<()> {
    writeln!(out, "alarmbar diagnostics")?;
    writeln!(out, "Selected settings source: {}", selected.label)?;
    if let Some(reason) = selected.fallback_reason.as_deref() {
        writeln!(out, "Fallback reason: {reason}")?;
    }
    writeln!(out, "Current time: {}", now.format("%Y-%m-%d %H:%M:%S %:z"))?;
    writeln!(out, "Decoded alarms: {}", alarms.len())?;
    writeln!(out, "Candidates: {}", candidates(alarms).count())?;
    for alarm in alarms {
        writeln!(
            out,
            "  {} [{}] days={} active={} ring_time={}",
            if alarm.name.is_empty() { "-" } else { alarm.name.as_str() },
            format_clock_time(alarm.hour, alarm.minute),
            describe_days(&alarm.days),
            alarm
                .active
                .map_or_else(|| "unset".to_string(), |active| active.to_string()),
            alarm.ring_time.as_deref().unwrap_or("-"),
        )?;
    }

    match resolve_next_at(alarms, &now, &Local) {
        Some(next) => writeln!(
            out,
            "Next alarm: {} ({} minutes, rings {})",
            panel_label(&next),
            next.minutes_until_ring,
            next.ring_at.format("%a %Y-%m-%d %H:%M")
        )?,
        None => writeln!(out, "Next alarm: none within 8 days")?,
    }
    Ok(())
}

fn describe_days(days: &[Option<i64>]) -> String {
    if days.is_empty() {
        return "every".to_string();
    }
    days.iter()
        .map(|day| day.map_or_else(|| "?".to_string(), |day| day.to_string()))
        .collect::<Vec<_>>()
        .join(",")
}
