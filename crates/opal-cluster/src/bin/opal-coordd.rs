//! Opal Cluster Coordinator Daemon
//!
//! The `opal-coordd` binary runs the cluster coordinator: it listens for
//! storage node joins and, once the configured number of nodes has
//! arrived, assigns tablets and broadcasts the key-space map.
//!
//! # Usage
//!
//! ```bash
//! # Wait for 4 nodes on the default port
//! opal-coordd --cluster-size 4
//!
//! # Custom bind address and tablet count
//! opal-coordd --host 0.0.0.0 --port 9680 --cluster-size 8 --tablet-count 32
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use opal_cluster::transport::TcpTransport;
use opal_cluster::{Coordinator, Transport, COORDINATOR_NODE_ID};
use opal_common::config::ClusterConfig;
use opal_common::constants::DEFAULT_COORD_PORT;

/// Opal Cluster Coordinator Daemon
#[derive(Parser, Debug)]
#[command(
    name = "opal-coordd",
    version,
    about = "Opal cluster coordinator",
    long_about = "Forms an Opal cluster: collects storage node joins, assigns \
                  tablets across the key-hash space, and broadcasts the map."
)]
struct Args {
    /// Host address to bind to
    #[arg(short = 'H', long, default_value = "0.0.0.0", env = "OPAL_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short = 'p', long, default_value_t = DEFAULT_COORD_PORT, env = "OPAL_PORT")]
    port: u16,

    /// Number of storage nodes to wait for
    #[arg(short = 'n', long, default_value_t = 4, env = "OPAL_CLUSTER_SIZE")]
    cluster_size: usize,

    /// Number of tablets to split the key space into
    #[arg(short = 't', long, default_value_t = 16, env = "OPAL_TABLET_COUNT")]
    tablet_count: usize,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", env = "OPAL_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = ClusterConfig {
        cluster_size: args.cluster_size,
        tablet_count: args.tablet_count,
    };

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .context("invalid listen address")?;

    info!("Opal coordinator v{}", env!("CARGO_PKG_VERSION"));
    info!("  Listen address: {}", addr);
    info!("  Cluster size:   {}", config.cluster_size);
    info!("  Tablet count:   {}", config.tablet_count);

    let transport = TcpTransport::bind(COORDINATOR_NODE_ID, addr)
        .await
        .context("failed to bind coordinator transport")?;

    let coordinator = Arc::new(
        Coordinator::new(transport.clone(), config).context("invalid cluster configuration")?,
    );

    info!("Press Ctrl+C to shutdown");
    let runner = Arc::clone(&coordinator);
    tokio::select! {
        () = runner.run() => {
            info!("coordinator stopped");
        }
        () = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    transport.close().await;
    if coordinator.is_ready() {
        info!(
            "cluster formed with {} nodes, {} bytes of storage",
            coordinator.joined_count(),
            coordinator.total_storage()
        );
    }
    info!("coordinator stopped. Goodbye!");
    Ok(())
}

fn init_logging(args: &Args) {
    let filter = EnvFilter::try_new(format!("opal_cluster={0},opal_coordd={0}", args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
