//! cluster-api server binary.

use anyhow::{Context, Result};
use clap::Parser;
use cluster_api::{server, shutdown::ShutdownHandle, ServerConfig};
use cluster_ca::CertificateEngine;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Cluster enrollment API
///
/// Issues mTLS client certificates to joining nodes and authenticates
/// enrolled nodes behind a TLS-terminating proxy.
#[derive(Parser, Debug)]
#[command(name = "cluster-api")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file (missing file means defaults)
    #[arg(short, long, env = "CLUSTER_API_CONFIG", default_value = "/etc/cluster-api.toml")]
    config: PathBuf,

    /// Listen address, overrides config and CLUSTER_API_LISTEN
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    let mut config = ServerConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.apply_env()?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config.validate()?;

    info!(
        config = %args.config.display(),
        listen = %config.listen,
        mysql = config.database_url.is_some(),
        "starting cluster API"
    );

    let shutdown = ShutdownHandle::new();
    spawn_signal_handler(shutdown.clone());

    server::run(config, CertificateEngine::new(), shutdown).await?;
    Ok(())
}

/// Begin draining on SIGINT, SIGTERM or SIGHUP.
fn spawn_signal_handler(shutdown: ShutdownHandle) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let (mut term, mut hup) =
                match (signal(SignalKind::terminate()), signal(SignalKind::hangup())) {
                    (Ok(term), Ok(hup)) => (term, hup),
                    (Err(e), _) | (_, Err(e)) => {
                        error!("failed to install signal handlers: {e}");
                        return;
                    }
                };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
                _ = term.recv() => info!("SIGTERM received"),
                _ = hup.recv() => info!("SIGHUP received"),
            }
        }
        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for ctrl-c: {e}");
                return;
            }
            info!("ctrl-c received");
        }
        shutdown.begin_drain();
    });
}
