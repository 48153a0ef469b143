//! # Initialization
//!
//! Exporter initialization logic including rustls setup, tracing, metrics,
//! server startup, Kubernetes client setup and the reconcile context.

use crate::config::{ExporterConfig, SharedExporterConfig};
use crate::constants::{DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS};
use crate::controller::diagnostics::{DiagnosticsSink, KubeEventRecorder, NoopDiagnostics};
use crate::controller::reconciler::Reconciler;
use crate::controller::server::{start_server, ServerState};
use crate::observability;
use crate::sign::load_signer;
use crate::store::KubeStore;
use crate::transport::TokenSender;
use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::{api::Api, Client};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Initialization result containing all necessary components for the exporter
pub struct InitializationResult {
    /// Kubernetes client
    pub client: Client,
    /// Cluster-wide `PersistentVolume` API
    pub volumes: Api<PersistentVolume>,
    /// Reconciler context
    pub reconciler: Arc<Reconciler>,
    /// Server state for health checks
    pub server_state: Arc<ServerState>,
    pub config: SharedExporterConfig,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Initialize the exporter runtime
///
/// This function handles:
/// - rustls crypto provider setup
/// - Tracing subscriber setup
/// - Metrics registration
/// - HTTP server startup
/// - Kubernetes client creation and cache sync
/// - Signer, callback transport and diagnostics selection
pub async fn initialize() -> Result<InitializationResult> {
    // Must run before any rustls user; a second install is harmless
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = Arc::new(ExporterConfig::from_env());

    observability::logging::init_logging(&config.log_format)?;

    info!("Starting volume events exporter");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );

    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let server_state_clone = Arc::clone(&server_state);
    let server_port = config.metrics_port;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(server_port, server_state_clone).await {
            error!("HTTP server error: {}", e);
        }
    });
    wait_for_server_ready(&server_state, &server_handle).await?;

    // Startup is not ready until the caches are synced
    server_state.set_ready(false);

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    let volumes: Api<PersistentVolume> = Api::all(client.clone());

    let store = KubeStore::start(client.clone());
    store
        .wait_until_ready()
        .await
        .context("Failed to sync PersistentVolume/PersistentVolumeClaim caches")?;

    let signer = load_signer(config.signing_private_key_path.as_deref())
        .context("Failed to load signing private key")?;
    let sender = TokenSender::new(config.callback_url.clone(), config.callback_token.clone())
        .context("Failed to create callback client")?;
    info!(callback.url = sender.url(), data_type = %config.data_type, "Callback configured");

    let diagnostics: Arc<dyn DiagnosticsSink> = if config.generate_k8s_events {
        Arc::new(KubeEventRecorder::new(
            client.clone(),
            config.pod_name.clone(),
        ))
    } else {
        Arc::new(NoopDiagnostics)
    };

    let reconciler = Arc::new(Reconciler::new(
        Arc::new(store),
        signer,
        Arc::new(sender),
        diagnostics,
        Arc::clone(&config),
    ));

    server_state.set_ready(true);
    info!("Exporter initialized, starting watch loop...");

    Ok(InitializationResult {
        client,
        volumes,
        reconciler,
        server_state,
        config,
    })
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &Arc<ServerState>,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        // Check if server task crashed
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }

        // Set by start_server once bound
        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            break;
        }

        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }

        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}
