//! Server assembly: bootstrap barrier, directory selection and the
//! listener loop.

use cluster_ca::{BootstrapReport, CaBootstrapper, CertificateEngine};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::auth::AuthenticationGuard;
use crate::config::ServerConfig;
use crate::directory::{MemoryDirectory, NodeDirectory};
use crate::enrollment::EnrollmentService;
use crate::http::{create_router, AppState};
use crate::shutdown::ShutdownHandle;
use crate::{Result, SrvError};

/// Run the CA bootstrap and build the handler state.
///
/// Returns only after all four artifacts exist on disk; any failure is
/// fatal and nothing has been bound yet.
pub async fn prepare(
    config: &ServerConfig,
    engine: CertificateEngine,
    directory: Arc<dyn NodeDirectory>,
    shutdown: ShutdownHandle,
) -> Result<(Arc<AppState>, BootstrapReport)> {
    let pki = config.pki.clone();
    let bootstrapped =
        tokio::task::spawn_blocking(move || CaBootstrapper::new(&pki, &engine).run())
            .await
            .map_err(|e| SrvError::Server(format!("bootstrap task failed: {e}")))??;

    let generated = bootstrapped.report.generated();
    info!(
        generated = generated.len(),
        ca_cert = %config.pki.ca_cert_path.display(),
        server_cert = %config.pki.server_cert_path.display(),
        "PKI ready"
    );

    let state = AppState {
        enrollment: EnrollmentService::new(
            engine,
            Arc::new(bootstrapped.ca),
            Arc::clone(&directory),
            config.pki.validity_days_leaf,
        ),
        guard: AuthenticationGuard::new(directory),
        headers: config.headers.clone(),
        shutdown,
    };
    Ok((Arc::new(state), bootstrapped.report))
}

/// Open the node directory selected by the configuration.
pub async fn open_directory(config: &ServerConfig) -> Result<Arc<dyn NodeDirectory>> {
    match config.database_url.as_deref() {
        None => {
            info!("using in-memory node directory; enrolled nodes are lost on restart");
            Ok(Arc::new(MemoryDirectory::new()))
        }
        #[cfg(feature = "mysql")]
        Some(url) => Ok(Arc::new(crate::directory::MySqlDirectory::connect(url).await?)),
        #[cfg(not(feature = "mysql"))]
        Some(_) => Err(SrvError::Config(
            "database_url is set but this build lacks the `mysql` feature".into(),
        )),
    }
}

/// Bootstrap, bind and serve until the drain hook fires.
pub async fn run(
    config: ServerConfig,
    engine: CertificateEngine,
    shutdown: ShutdownHandle,
) -> Result<()> {
    let directory = open_directory(&config).await?;
    let (state, _report) = prepare(&config, engine, directory, shutdown.clone()).await?;

    let listener = TcpListener::bind(config.listen)
        .await
        .map_err(|e| SrvError::Server(format!("bind {}: {e}", config.listen)))?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "cluster API listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.drained().await })
        .await
        .map_err(|e| SrvError::Server(e.to_string()))?;

    info!("cluster API stopped");
    Ok(())
}
