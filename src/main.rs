mod alarm;
mod diagnostics;
mod indicator;
mod runtime;
mod settings;
mod variant;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{Local, NaiveDateTime, TimeZone};
use clap::{Parser, ValueEnum};
use tracing::{debug, info};

use crate::alarm::countdown::format_minutes_lenient;
use crate::indicator::{
    AppLauncher, Clock, CommandLauncher, DEFAULT_LAUNCH_COMMAND, DisabledLauncher, Indicator,
    StdoutSink,
};
use crate::runtime::{Event, IndicatorRuntime, RuntimeConfig};
use crate::settings::{DEFAULT_KEY, DEFAULT_SCHEMA, StoreKind, select_store};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliSource {
    Auto,
    File,
    Gsettings,
}

impl From<CliSource> for StoreKind {
    fn from(value: CliSource) -> Self {
        match value {
            CliSource::Auto => StoreKind::Auto,
            CliSource::File => StoreKind::File,
            CliSource::Gsettings => StoreKind::Gsettings,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "alarmbar",
    version,
    about = "Panel indicator showing the next GNOME Clocks alarm"
)]
struct Cli {
    #[arg(long, default_value = "alarms.json")]
    alarms: PathBuf,

    #[arg(long, value_enum, default_value_t = CliSource::Auto)]
    source: CliSource,

    #[arg(long, default_value = DEFAULT_SCHEMA)]
    schema: String,

    #[arg(long, default_value = DEFAULT_KEY)]
    key: String,

    #[arg(long, default_value_t = 60)]
    refresh_secs: u64,

    #[arg(long, default_value = DEFAULT_LAUNCH_COMMAND)]
    launch_command: String,

    #[arg(long)]
    no_launch: bool,

    #[arg(long)]
    once: bool,

    #[arg(long)]
    activate: bool,

    #[arg(long)]
    json: bool,

    #[arg(long)]
    diagnostics: bool,

    #[arg(long, value_name = "MINUTES", allow_hyphen_values = true)]
    countdown: Option<String>,

    #[arg(
        long,
        value_name = "YYYY-MM-DDTHH:MM[:SS]",
        value_parser = parse_local_time_arg
    )]
    now: Option<NaiveDateTime>,
}

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    if cli.refresh_secs == 0 {
        bail!("--refresh-secs must be greater than zero");
    }
    if cli.now.is_some() && !(cli.once || cli.activate || cli.diagnostics) {
        bail!("--now requires --once, --activate or --diagnostics");
    }

    if let Some(minutes) = cli.countdown.as_deref() {
        println!("{}", format_minutes_lenient(minutes));
        return Ok(());
    }

    let clock = match cli.now {
        Some(naive) => Clock::Fixed(
            Local
                .from_local_datetime(&naive)
                .earliest()
                .ok_or_else(|| anyhow!("--now {naive} does not exist in the local timezone"))?,
        ),
        None => Clock::System,
    };

    let selected = select_store(cli.source.into(), &cli.alarms, &cli.schema, &cli.key)?;
    info!(source = %selected.label, "settings source selected");
    if let Some(reason) = selected.fallback_reason.as_deref() {
        debug!("{reason}");
    }

    if cli.diagnostics {
        let now = match clock {
            Clock::Fixed(now) => now,
            Clock::System => Local::now(),
        };
        return diagnostics::run_diagnostics(&selected, now);
    }

    let launcher: Box<dyn AppLauncher> = if cli.no_launch {
        Box::new(DisabledLauncher)
    } else {
        Box::new(
            CommandLauncher::from_command_line(&cli.launch_command)
                .context("invalid --launch-command")?,
        )
    };
    let mut indicator = Indicator::new(
        selected.store.clone(),
        StdoutSink::stdout(cli.json),
        launcher,
        clock,
    );

    if cli.activate {
        return indicator.activate();
    }

    if cli.once {
        return indicator.refresh();
    }

    let mut runtime = IndicatorRuntime::start(
        selected.store,
        RuntimeConfig {
            refresh_interval: Duration::from_secs(cli.refresh_secs),
        },
    )?;
    indicator.refresh()?;
    while let Some(event) = runtime.recv() {
        match event {
            Event::Tick => indicator.refresh()?,
            Event::SettingsChanged => {
                indicator.update_label()?;
            }
            Event::Shutdown => break,
        }
    }
    runtime.teardown();
    Ok(())
}

fn parse_local_time_arg(raw: &str) -> Result<NaiveDateTime, String> {
    ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .ok_or_else(|| format!("invalid local time '{raw}', expected YYYY-MM-DDTHH:MM[:SS]"))
}
