use std::io::{self, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::alarm::resolver::{ResolvedAlarm, resolve_next, resolve_next_at};
use crate::settings::{SettingsStore, load_alarms};

pub const DEFAULT_LAUNCH_COMMAND: &str = "gapplication launch org.gnome.clocks";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelState {
    pub label: Option<String>,
    pub icon_dimmed: bool,
    pub next: Option<ResolvedAlarm>,
}

pub fn panel_state(next: Option<ResolvedAlarm>) -> PanelState {
    match next {
        None => PanelState {
            label: None,
            icon_dimmed: true,
            next: None,
        },
        Some(next) => PanelState {
            label: Some(panel_label(&next)),
            icon_dimmed: false,
            next: Some(next),
        },
    }
}

pub fn panel_label(next: &ResolvedAlarm) -> String {
    let time = format_clock_time(next.alarm.hour, next.alarm.minute);
    if next.display_text.is_empty() {
        format!("{} [{time}]", next.alarm.name)
    } else {
        format!("{} \u{2022} {} [{time}]", next.display_text, next.alarm.name)
    }
}

pub fn format_clock_time(hour: u32, minute: u32) -> String {
    format!("{hour:02}:{minute:02}")
}

pub trait DisplaySink {
    fn show(&mut self, state: &PanelState) -> Result<()>;
}

pub struct WriterSink<W: Write> {
    out: W,
    json: bool,
}

pub type StdoutSink = WriterSink<io::Stdout>;

impl StdoutSink {
    pub fn stdout(json: bool) -> Self {
        Self::new(io::stdout(), json)
    }
}

impl<W: Write> WriterSink<W> {
    pub fn new(out: W, json: bool) -> Self {
        Self { out, json }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> DisplaySink for WriterSink<W> {
    fn show(&mut self, state: &PanelState) -> Result<()> {
        if self.json {
            serde_json::to_writer(&mut self.out, state)?;
            writeln!(self.out)?;
        } else {
            writeln!(self.out, "{}", state.label.as_deref().unwrap_or_default())?;
        }
        self.out.flush()?;
        Ok(())
    }
}

pub trait AppLauncher {
    fn launch(&self) -> Result<()>;
}

impl<T: AppLauncher + ?Sized> AppLauncher for Box<T> {
    fn launch(&self) -> Result<()> {
        (**self).launch()
    }
}

pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
}

impl CommandLauncher {
    pub fn from_command_line(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let Some(program) = parts.next() else {
            bail!("launch command must not be empty");
        };
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl AppLauncher for CommandLauncher {
    fn launch(&self) -> Result<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;
        let program = self.program.clone();
        thread::spawn(move || match child.wait() {
            Ok(status) if status.success() => debug!(%program, "launcher exited"),
            Ok(status) => warn!(%program, %status, "launcher exited with failure"),
            Err(err) => warn!(%program, "failed to wait for launcher: {err}"),
        });
        Ok(())
    }
}

pub struct DisabledLauncher;

impl AppLauncher for DisabledLauncher {
    fn launch(&self) -> Result<()> {
        debug!("application launch disabled");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Clock {
    System,
    Fixed(DateTime<Local>),
}

pub struct Indicator<D, L> {
    store: Arc<dyn SettingsStore>,
    sink: D,
    launcher: L,
    clock: Clock,
}

impl<D: DisplaySink, L: AppLauncher> Indicator<D, L> {
    pub fn new(store: Arc<dyn SettingsStore>, sink: D, launcher: L, clock: Clock) -> Self {
        Self {
            store,
            sink,
            launcher,
            clock,
        }
    }

    fn resolve(&self) -> Option<ResolvedAlarm> {
        let alarms = load_alarms(self.store.as_ref());
        match self.clock {
            Clock::System => resolve_next(&alarms),
            Clock::Fixed(now) => resolve_next_at(&alarms, &now, &Local),
        }
    }

    pub fn update_label(&mut self) -> Result<Option<ResolvedAlarm>> {
        let next = self.resolve();
        let state = panel_state(next.clone());
        self.sink.show(&state)?;
        Ok(next)
    }

    pub fn refresh(&mut self) -> Result<()> {
        let next = self.update_label()?;
        if let Some(next) = next.filter(ResolvedAlarm::is_imminent) {
            info!(
                name = %next.alarm.name,
                minutes = next.minutes_until_ring,
                "alarm is imminent, launching alarm application"
            );
            self.launch();
        }
        Ok(())
    }

    pub fn activate(&mut self) -> Result<()> {
        self.update_label()?;
        self.launch();
        Ok(())
    }

    fn launch(&self) {
        if let Err(err) = self.launcher.launch() {
            warn!("failed to launch alarm application: {err:#}");
        }
    }

    #[cfg(test)]
    fn into_parts(self) -> (D, L) {
        (self.sink, self.launcher)
    }
}
