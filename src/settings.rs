use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use notify::{EventKind, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::alarm::model::{AlarmRecord, parse_alarm_list_text};

pub const DEFAULT_SCHEMA: &str = "org.gnome.clocks";
pub const DEFAULT_KEY: &str = "alarms";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StoreKind {
    Auto,
    File,
    Gsettings,
}

pub type ChangeCallback = Box<dyn Fn() + Send + 'static>;

pub trait SettingsStore: Send + Sync {
    fn read_raw(&self) -> Result<String>;

    // `on_change` may fire more than once per change, and from any thread.
    fn watch(&self, on_change: ChangeCallback) -> Result<StoreWatch>;
}

// Active change subscription; released by `stop` or on drop.
pub struct StoreWatch {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl StoreWatch {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }

    pub fn stop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for StoreWatch {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SettingsStore for FileStore {
    fn read_raw(&self) -> Result<String> {
        fs::read_to_string(&self.path)
            .with_context(|| format!("unable to read alarm file {}", self.path.display()))
    }

    // Watches the parent directory so the file may be created, replaced or
    // renamed into place.
    fn watch(&self, on_change: ChangeCallback) -> Result<StoreWatch> {
        let file_name = self
            .path
            .file_name()
            .map(ToOwned::to_owned)
            .with_context(|| format!("alarm file {} has no file name", self.path.display()))?;
        let watch_dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    let touches_file = event
                        .paths
                        .iter()
                        .any(|path| path.file_name() == Some(file_name.as_os_str()));
                    if touches_file && !matches!(event.kind, EventKind::Access(_)) {
                        on_change();
                    }
                }
                Err(err) => warn!("alarm file watch error: {err}"),
            }
        })
        .context("failed to create alarm file watcher")?;
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", watch_dir.display()))?;

        debug!(dir = %watch_dir.display(), "watching alarm file");
        Ok(StoreWatch::new(move || drop(watcher)))
    }
}

pub struct GsettingsStore {
    schema: String,
    key: String,
}

impl GsettingsStore {
    pub fn try_new(schema: &str, key: &str) -> Result<Self> {
        let store = Self {
            schema: schema.to_string(),
            key: key.to_string(),
        };
        store.read_raw()?;
        Ok(store)
    }
}

impl SettingsStore for GsettingsStore {
    fn read_raw(&self) -> Result<String> {
        let output = Command::new("gsettings")
            .args(["get", &self.schema, &self.key])
            .output()
            .context("failed to run gsettings")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "gsettings get {} {} failed: {}",
                self.schema,
                self.key,
                stderr.trim()
            );
        }
        String::from_utf8(output.stdout).context("gsettings printed invalid UTF-8")
    }

    // `gsettings monitor` prints one line per change until it is killed.
    fn watch(&self, on_change: ChangeCallback) -> Result<StoreWatch> {
        let mut child = Command::new("gsettings")
            .args(["monitor", &self.schema, &self.key])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to run gsettings monitor")?;
        let Some(stdout) = child.stdout.take() else {
            stop_child(&mut child);
            bail!("gsettings monitor has no stdout");
        };

        let reader = thread::Builder::new()
            .name("alarmbar-gsettings".to_string())
            .spawn(move || {
                for line in BufReader::new(stdout).lines() {
                    match line {
                        Ok(_) => on_change(),
                        Err(err) => {
                            warn!("failed to read gsettings monitor output: {err}");
                            break;
                        }
                    }
                }
                debug!("gsettings monitor closed");
            });
        let reader = match reader {
            Ok(reader) => reader,
            Err(err) => {
                stop_child(&mut child);
                return Err(err).context("failed to start gsettings monitor reader");
            }
        };

        debug!(schema = %self.schema, key = %self.key, "monitoring gsettings key");
        Ok(StoreWatch::new(move || {
            stop_child(&mut child);
            let _ = reader.join();
        }))
    }
}

fn stop_child(child: &mut std::process::Child) {
    let _ = child.kill();
    let _ = child.wait();
}

pub struct SelectedStore {
    pub store: Arc<dyn SettingsStore>,
    pub label: String,
    pub fallback_reason: Option<String>,
}

pub fn select_store(kind: StoreKind, path: &Path, schema: &str, key: &str) -> Result<SelectedStore> {
    let file_label = format!("file {}", path.display());
    let gsettings_label = format!("gsettings {schema} {key}");
    match kind {
        StoreKind::File => Ok(SelectedStore {
            store: Arc::new(FileStore::new(path)),
            label: file_label,
            fallback_reason: None,
        }),
        StoreKind::Gsettings => {
            let gsettings = GsettingsStore::try_new(schema, key)
                .map_err(|err| anyhow!("gsettings source unavailable: {err:#}"))?;
            Ok(SelectedStore {
                store: Arc::new(gsettings),
                label: gsettings_label,
                fallback_reason: None,
            })
        }
        StoreKind::Auto => match GsettingsStore::try_new(schema, key) {
            Ok(gsettings) => Ok(SelectedStore {
                store: Arc::new(gsettings),
                label: gsettings_label,
                fallback_reason: None,
            }),
            Err(err) => {
                debug!("gsettings unavailable, falling back to {file_label}: {err:#}");
                Ok(SelectedStore {
                    store: Arc::new(FileStore::new(path)),
                    label: file_label,
                    fallback_reason: Some(format!(
                        "gsettings not available, reading the alarm file instead: {err:#}"
                    )),
                })
            }
        },
    }
}

pub fn load_alarms_strict(store: &dyn SettingsStore) -> Result<Vec<AlarmRecord>> {
    let raw = store.read_raw()?;
    parse_alarm_list_text(&raw)
}

// An unreadable or undecodable store counts as an empty list.
pub fn load_alarms(store: &dyn SettingsStore) -> Vec<AlarmRecord> {
    match load_alarms_strict(store) {
        Ok(alarms) => alarms,
        Err(err) => {
            warn!("treating alarm list as empty: {err:#}");
            Vec::new()
        }
    }
}
