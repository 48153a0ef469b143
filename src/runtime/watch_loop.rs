//! # Watch Loop
//!
//! Controller watch loop that monitors `PersistentVolume` resources and triggers
//! reconciliation when changes are detected.

use crate::controller::reconciler::{reconcile, Reconciler};
use crate::controller::server::ServerState;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube::api::Api;
use kube_runtime::{controller, watcher, Controller};
use std::sync::Arc;
use tracing::{debug, info, Instrument};

/// Run the controller watch loop until SIGINT/SIGTERM
///
/// Each volume key is reconciled by at most one worker at a time; up to
/// `WORKERS` distinct volumes are reconciled concurrently. In-flight reconciles
/// finish before the loop returns.
pub async fn run_watch_loop(
    volumes: Api<PersistentVolume>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
) -> Result<(), anyhow::Error> {
    let workers = reconciler.config.workers;
    info!(workers = workers, "Starting controller watch loop...");

    let watch_span = tracing::span!(
        tracing::Level::INFO,
        "controller.watch",
        operation = "watch_loop"
    );

    Controller::new(volumes, watcher::Config::default().any_semantic())
        .with_config(controller::Config::default().concurrency(workers))
        .shutdown_on_signal()
        .run(reconcile, handle_reconciliation_error, reconciler)
        .for_each(|result| {
            match result {
                Ok((volume, _action)) => {
                    debug!(volume.name = volume.name.as_str(), "watch.event.success");
                }
                Err(e) => {
                    handle_watch_stream_error(&format!("{e:?}"));
                }
            }
            futures::future::ready(())
        })
        .instrument(watch_span)
        .await;

    server_state.set_ready(false);
    info!("Controller stopped gracefully");
    Ok(())
}
