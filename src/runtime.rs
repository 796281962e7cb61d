use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::settings::{ChangeCallback, SettingsStore, StoreWatch};

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Event {
    Tick,
    SettingsChanged,
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
pub struct RuntimeConfig {
    pub refresh_interval: Duration,
}

// The refresh timer, the settings subscription and the signal listener are
// released together by `teardown`, at most once.
pub struct IndicatorRuntime {
    events: Receiver<Event>,
    stop: Arc<AtomicBool>,
    timer_join: Option<JoinHandle<()>>,
    watch: Option<StoreWatch>,
    signals: Option<SignalListener>,
}

impl IndicatorRuntime {
    pub fn start(store: Arc<dyn SettingsStore>, config: RuntimeConfig) -> Result<Self> {
        let (sender, events) = mpsc::channel();
        let stop = Arc::new(AtomicBool::new(false));

        let timer_sender = sender.clone();
        let stop_for_timer = Arc::clone(&stop);
        let timer_join = thread::Builder::new()
            .name("alarmbar-timer".to_string())
            .spawn(move || run_timer_loop(config.refresh_interval, timer_sender, stop_for_timer))
            .context("failed to start refresh timer")?;

        let notifier = change_notifier(Arc::clone(&store), sender.clone());
        let watch = match store.watch(notifier) {
            Ok(watch) => Some(watch),
            Err(err) => {
                warn!("alarm changes will only show on the next refresh: {err:#}");
                None
            }
        };

        let signals = match SignalListener::spawn(sender) {
            Ok(listener) => Some(listener),
            Err(err) => {
                warn!("termination signals will not stop the indicator cleanly: {err:#}");
                None
            }
        };

        debug!(
            refresh_ms = config.refresh_interval.as_millis() as u64,
            watching = watch.is_some(),
            "indicator runtime started"
        );
        Ok(Self {
            events,
            stop,
            timer_join: Some(timer_join),
            watch,
            signals,
        })
    }

    // `None` once the runtime is torn down.
    pub fn recv(&self) -> Option<Event> {
        self.events.recv().ok()
    }

    #[cfg(test)]
    fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        self.events.recv_timeout(timeout).ok()
    }

    pub fn is_running(&self) -> bool {
        self.timer_join.is_some()
    }

    pub fn teardown(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }

        self.stop.store(true, Ordering::Relaxed);
        if let Some(join) = self.timer_join.take() {
            let _ = join.join();
        }
        if let Some(mut watch) = self.watch.take() {
            watch.stop();
        }
        if let Some(signals) = self.signals.take() {
            signals.stop();
        }
        debug!("indicator runtime stopped");
        true
    }
}

impl Drop for IndicatorRuntime {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn run_timer_loop(interval: Duration, sender: Sender<Event>, stop: Arc<AtomicBool>) {
    let mut next_tick = Instant::now() + interval;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= next_tick {
            if sender.send(Event::Tick).is_err() {
                break;
            }
            next_tick = now + interval;
            continue;
        }
        thread::sleep((next_tick - now).min(STOP_CHECK_INTERVAL));
    }
}

// The baseline is read before the subscription exists, so any later change
// differs from it. Repeated notifications for the same content are dropped.
fn change_notifier(store: Arc<dyn SettingsStore>, sender: Sender<Event>) -> ChangeCallback {
    let last_seen = Mutex::new(store.read_raw().ok());
    Box::new(move || {
        let current = store.read_raw().ok();
        let mut last_seen = last_seen.lock().unwrap_or_else(PoisonError::into_inner);
        if *last_seen == current {
            return;
        }
        *last_seen = current;
        debug!("alarm settings changed");
        let _ = sender.send(Event::SettingsChanged);
    })
}

struct SignalListener {
    cancel: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl SignalListener {
    fn spawn(sender: Sender<Event>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("failed to build signal runtime")?;
        let termination = {
            let _guard = runtime.enter();
            Termination::register()?
        };

        let (cancel, cancelled) = oneshot::channel();
        let join = thread::Builder::new()
            .name("alarmbar-signals".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    tokio::select! {
                        signal = termination.recv() => {
                            info!(signal, "termination requested");
                            let _ = sender.send(Event::Shutdown);
                        }
                        _ = cancelled => {}
                    }
                });
            })
            .context("failed to start signal listener")?;
        Ok(Self { cancel, join })
    }

    fn stop(self) {
        let _ = self.cancel.send(());
        let _ = self.join.join();
    }
}

#[cfg(unix)]
struct Termination {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Termination {
    fn register() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("failed to listen for SIGINT")?,
            terminate: signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?,
        })
    }

    async fn recv(mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

#[cfg(not(unix))]
struct Termination;

#[cfg(not(unix))]
impl Termination {
    fn register() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(self) -> &'static str {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
        "ctrl-c"
    }
}
