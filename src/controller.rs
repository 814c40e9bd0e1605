use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{info, warn};

use crate::cluster::ClusterClient;
use crate::config::{ConfigStore, DataPlane};
use crate::discovery;
use crate::errors::Result;
use crate::metrics::{RECONCILE_ERRORS, RECONCILE_TICKS, TARGETS_DESIRED};
use crate::reconciler::Reconciler;

/// Extra settle time after the watcher's own debounce before a config edit
/// triggers a reconcile.
const CHANGE_DEBOUNCE: Duration = Duration::from_millis(200);
pub const TICK_INTERVAL: Duration = Duration::from_secs(60);

struct TickState {
    last_mode: Option<DataPlane>,
}

/// Owns the control loop: a config-change listener and a periodic ticker,
/// both funnelled through one serialized reconcile pass. The controller is
/// the only component that writes to the cluster.
pub struct Controller {
    cluster: Arc<dyn ClusterClient>,
    reconciler: Reconciler,
    store: ConfigStore,
    ready: Arc<AtomicBool>,
    // tick serialization: holding the state for the duration of a pass means
    // no two reconciles run concurrently
    tick_state: Mutex<TickState>,
}

impl Controller {
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        store: ConfigStore,
        agent_image: String,
        ready: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reconciler: Reconciler::new(cluster.clone(), agent_image),
            cluster,
            store,
            ready,
            tick_state: Mutex::new(TickState { last_mode: None }),
        }
    }

    /// One full pass: discovery, mode reconcile, and cross-mode GC when the
    /// data-plane mode flipped since the previous pass. Ensure-then-GC: the
    /// new mode's agents exist before the old mode's are removed.
    pub async fn tick(&self) -> Result<()> {
        let mut state = self.tick_state.lock().await;
        let cfg = self.store.current();

        RECONCILE_TICKS.inc();

        let targets = discovery::build_targets(self.cluster.as_ref(), &cfg).await?;
        TARGETS_DESIRED.set(targets.len() as i64);
        info!(targets = targets.len(), mode = ?cfg.mode.data_plane, "reconcile_tick");

        self.reconciler.reconcile(&cfg, &targets).await?;

        let mode = cfg.mode.data_plane;
        if let Some(prev) = state.last_mode
            && prev != mode
        {
            info!(from = ?prev, to = ?mode, "data_plane_mode_switch");
            let gc = match mode {
                DataPlane::AgentPerNamespace => self.reconciler.gc_per_pvc_all().await,
                DataPlane::AgentPerPvc => {
                    self.reconciler.gc_namespace_agents(&HashSet::new()).await
                }
            };
            if let Err(e) = gc {
                warn!(error = %e, "cross_mode_gc_failed");
            }
        }
        state.last_mode = Some(mode);

        self.ready.store(true, Ordering::Relaxed);
        Ok(())
    }

    async fn tick_logged(&self, trigger: &str) {
        if let Err(e) = self.tick().await {
            RECONCILE_ERRORS.inc();
            warn!(trigger = %trigger, error = %e, "reconcile_failed");
        }
    }

    /// Long-lived loop: reacts to config publications (debounced) and to the
    /// periodic self-heal ticker, until shutdown.
    pub async fn run(
        self: Arc<Self>,
        mut changed: mpsc::Receiver<()>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("controller_stopped");
                    return;
                }
                event = changed.recv() => {
                    if event.is_none() {
                        info!("config_channel_closed");
                        return;
                    }
                    tokio::time::sleep(CHANGE_DEBOUNCE).await;
                    // collapse queued publications into one pass
                    while changed.try_recv().is_ok() {}
                    self.tick_logged("config_change").await;
                }
                _ = ticker.tick() => {
                    self.tick_logged("periodic").await;
                }
            }
        }
    }

    /// Best-effort removal of both agent label classes, e.g. before the
    /// process exits on uninstall.
    pub async fn shutdown_gc(&self) {
        if let Err(e) = self.reconciler.gc_per_pvc_all().await {
            warn!(error = %e, "shutdown_gc_per_pvc_failed");
        }
        if let Err(e) = self.reconciler.gc_namespace_agents(&HashSet::new()).await {
            warn!(error = %e, "shutdown_gc_ns_failed");
        }
    }
}
