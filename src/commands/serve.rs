use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{Context, Result};
use kube::Client;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use pvc_viewer::cluster::KubeCluster;
use pvc_viewer::config::{self, ConfigStore};
use pvc_viewer::controller::Controller;
use pvc_viewer::metrics;
use pvc_viewer::proxy::AgentProxy;
use pvc_viewer::server::{AppState, build_router};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn getenv(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

pub async fn run() -> Result<()> {
    println!("Starting PVC viewer control plane...\n");

    let client = Client::try_default()
        .await
        .context("Failed to load kubeconfig")?;

    // Verify actual cluster connectivity before starting the control loop
    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    let config_path = PathBuf::from(getenv("PVC_VIEWER_CONFIG", "/config/config.yaml"));
    let agent_image = getenv(
        "PVC_VIEWER_AGENT_IMAGE",
        "ghcr.io/example/pvc-viewer-agent:latest",
    );

    metrics::force_init();

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));

    println!("  Config file ................. {}", config_path.display());
    println!("  Agent image ................. {agent_image}");
    println!("  HTTP server ................. http://{addr}");
    println!();
    println!("  Available endpoints:");
    println!("    GET  /api/v1/healthz ...... Liveness probe (always 200 OK)");
    println!("    GET  /api/v1/readyz ....... Readiness probe (503 until first reconcile)");
    println!("    GET  /api/v1/namespaces ... Namespaces among current targets");
    println!("    GET  /api/v1/pvcs ......... PVCs of a namespace among current targets");
    println!("    GET  /api/v1/tree ......... Proxied directory listing");
    println!("    GET  /api/v1/download ..... Proxied file fetch");
    println!("    POST /api/v1/upload ....... Proxied multipart upload");
    println!("    DEL  /api/v1/file ......... Proxied delete");
    println!("    GET  /api/v1/pvc-status ... Agent readiness for a PVC");
    println!("    GET  /metrics ............. Prometheus metrics scrape endpoint");
    println!();
    println!("Control plane running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    info!(config = %config_path.display(), image = %agent_image, "control_plane_started");

    let store = ConfigStore::new();
    let ready = Arc::new(AtomicBool::new(false));
    let cluster = Arc::new(KubeCluster::new(client));

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let (changed_tx, changed_rx) = mpsc::channel::<()>(8);

    let watcher_store = store.clone();
    let watcher_shutdown = shutdown_tx.subscribe();
    let watcher_path = config_path.clone();
    let watcher_handle = tokio::spawn(async move {
        // a dead watcher leaves the last published config in effect
        if let Err(e) =
            config::watch_file(watcher_path, watcher_store, changed_tx, watcher_shutdown).await
        {
            warn!(error = %e, "config_watcher_failed");
        }
    });

    let controller = Arc::new(Controller::new(
        cluster.clone(),
        store.clone(),
        agent_image,
        ready.clone(),
    ));
    let controller_handle = tokio::spawn(
        controller
            .clone()
            .run(changed_rx, shutdown_tx.subscribe()),
    );

    let state = Arc::new(AppState {
        store,
        cluster,
        proxy: AgentProxy::new(),
        ready,
    });
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind HTTP server on :8080")?;

    let mut http_shutdown = shutdown_tx.subscribe();
    let http_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = http_shutdown.recv().await;
            })
            .await
    });

    shutdown_signal().await?;
    info!("shutdown_signal_received");
    println!("\n{}", "=".repeat(70));
    println!("Shutdown signal received. Stopping control plane...");
    println!("{}", "=".repeat(70));

    let _ = shutdown_tx.send(());

    // Best-effort cleanup of every agent (e.g. before a Helm uninstall
    // finishes), then drain in-flight HTTP requests.
    controller.shutdown_gc().await;

    match tokio::time::timeout(SHUTDOWN_GRACE, http_handle).await {
        Ok(res) => {
            let _ = res?;
        }
        Err(_) => warn!("http_drain_timeout"),
    }
    let _ = watcher_handle.await;
    let _ = controller_handle.await;

    info!("control_plane_stopped");
    println!("Control plane stopped.");
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut term = signal::unix::signal(signal::unix::SignalKind::terminate())
        .context("failed to install SIGTERM handler")?;
    tokio::select! {
        res = signal::ctrl_c() => res.context("failed to listen for Ctrl+C")?,
        _ = term.recv() => {}
    }
    Ok(())
}
