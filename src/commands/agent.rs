use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;

use pvc_viewer::agent::{AgentState, build_router};

pub async fn run() -> Result<()> {
    let data_root = PathBuf::from(getenv("PVC_VIEWER_DATA_ROOT", "/data"));
    let read_only = getenv("PVC_VIEWER_READ_ONLY", "false") == "true";

    let addr = SocketAddr::from(([0, 0, 0, 0], 8090));

    println!("Starting PVC viewer agent...\n");
    println!("  Data root ................... {}", data_root.display());
    println!("  Read only ................... {read_only}");
    println!("  HTTP server ................. http://{addr}");
    println!();
    println!("Agent running. Press Ctrl+C to stop.\n");

    info!(data_root = %data_root.display(), read_only, "agent_started");

    let app = build_router(AgentState {
        data_root,
        read_only,
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind HTTP server on :8090")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("agent_stopped");
    println!("Agent stopped.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = signal::ctrl_c();
    match signal::unix::signal(signal::unix::SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = term.recv() => {}
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
        }
    }
}

fn getenv(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}
