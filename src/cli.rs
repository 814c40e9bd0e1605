use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "pvc-viewer")]
#[command(about = "Browse Kubernetes PVC contents through reconciled agent pods")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity and permissions
    Check,

    /// Run the control plane: config watcher, reconciler, public API
    Serve,

    /// Run the agent file server (the process inside agent pods)
    Agent,
}
