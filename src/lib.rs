pub mod api; // HTTP front: router, endpoints, server lifecycle
pub mod bridge; // Process invoker, staging, extractor, stream relay
pub mod config;

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use crate::api::ApiContext;
use crate::config::BridgeConfig;

/// How long open streams may keep the server alive after Ctrl-C.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub fn run() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(2);
        }
    };

    // Uploads staged by a run that crashed mid-request
    bridge::staging::sweep_orphans(&config.staging_dir);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(config)) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn serve(config: BridgeConfig) -> Result<(), String> {
    tracing::info!(
        interpreter = %config.interpreter.display(),
        scripts_dir = %config.scripts_dir.display(),
        staging_dir = %config.staging_dir.display(),
        max_concurrent_processes = config.max_concurrent_processes,
        script_timeout_secs = config.script_timeout.as_secs(),
        "Bridge configured"
    );

    let mut server = api::server::start_bridge_server(ApiContext::new(config)).await?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Cannot listen for Ctrl-C, serving until killed: {e}");
        server.stopped().await;
        return Ok(());
    }

    server.shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE, server.stopped())
        .await
        .is_err()
    {
        tracing::warn!("Open streams did not finish in time; stopping anyway");
    }
    Ok(())
}
