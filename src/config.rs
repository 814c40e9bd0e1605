use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::errors;
use crate::metrics::CONFIG_RELOADS;

/// Quiet window after a file event before the config file is re-read. Keeps
/// atomic rename/symlink-swap updates (ConfigMap mounts) from being read
/// mid-flight.
pub const RELOAD_DEBOUNCE: Duration = Duration::from_millis(200);

/* ============================= MODEL ============================= */

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchSet {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SecuritySpec {
    pub run_as_user: Option<i64>,
    pub run_as_group: Option<i64>,
    pub fs_group: Option<i64>,
    pub supplemental_groups: Vec<i64>,
    pub read_only: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct OverrideSpec {
    /// Storage-class glob. Ignored when `pvcMatch` is present.
    #[serde(rename = "match")]
    pub storage_class: String,
    /// PVC-name glob; takes priority over the storage-class match.
    #[serde(rename = "pvcMatch")]
    pub pvc_match: Option<String>,
    #[serde(flatten)]
    pub security: SecuritySpec,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchConfig {
    pub namespaces: WatchSet,
    pub pvcs: WatchSet,
    pub storage_classes: WatchSet,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum DataPlane {
    #[default]
    #[serde(rename = "agent-per-pvc")]
    AgentPerPvc,
    #[serde(rename = "agent-per-namespace")]
    AgentPerNamespace,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModeConfig {
    pub data_plane: DataPlane,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentsConfig {
    pub security_defaults: SecuritySpec,
    pub security_overrides: Vec<OverrideSpec>,
}

/// The full declarative configuration. Every field defaults, and the default
/// selectors reject everything, so an absent or empty file selects nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub watch: WatchConfig,
    pub mode: ModeConfig,
    #[serde(rename = "allowRWO")]
    pub allow_rwo: bool,
    pub agents: AgentsConfig,
}

pub fn load(path: &Path) -> errors::Result<Config> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| errors::Error::ConfigParse(format!("{}: {e}", path.display())))?;
    serde_yaml::from_str(&raw).map_err(|e| errors::Error::ConfigParse(e.to_string()))
}

/* ============================= STORE ============================= */

/// Process-wide config holder with atomic snapshot publication. Readers clone
/// an `Arc` out; writers swap the `Arc` in. No reader ever observes a torn
/// config.
#[derive(Clone, Default)]
pub struct ConfigStore {
    inner: Arc<RwLock<Arc<Config>>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Arc<Config> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn publish(&self, cfg: Config) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(cfg);
    }
}

/* ============================= WATCHER ============================= */

/// Watches the directory containing `path` (the file itself may be replaced
/// by rename) and republishes the config after each debounced edit. Parse
/// failures keep the previously published config in effect. Each successful
/// publish sends a unit on `changed`.
pub async fn watch_file(
    path: PathBuf,
    store: ConfigStore,
    changed: mpsc::Sender<()>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    match load(&path) {
        Ok(cfg) => {
            store.publish(cfg);
            let _ = changed.send(()).await;
        }
        Err(e) => warn!(path = %path.display(), error = %e, "initial_config_load_failed"),
    }

    let file_name = path
        .file_name()
        .context("config path has no file name")?
        .to_owned();

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<()>();
    let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        if let Ok(event) = res
            && event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(file_name.as_os_str()))
        {
            let _ = event_tx.send(());
        }
    })
    .context("failed to create config watcher")?;

    let dir = path.parent().unwrap_or(Path::new("."));
    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;

    info!(path = %path.display(), "config_watcher_started");

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                info!("config_watcher_stopped");
                return Ok(());
            }
            event = event_rx.recv() => {
                if event.is_none() {
                    return Ok(());
                }
                tokio::time::sleep(RELOAD_DEBOUNCE).await;
                // collapse the burst of events an atomic swap produces
                while event_rx.try_recv().is_ok() {}

                match load(&path) {
                    Ok(cfg) => {
                        store.publish(cfg);
                        CONFIG_RELOADS.inc();
                        info!(path = %path.display(), "config_reloaded");
                        let _ = changed.send(()).await;
                    }
                    Err(e) => warn!(path = %path.display(), error = %e, "config_reload_failed"),
                }
            }
        }
    }
}
