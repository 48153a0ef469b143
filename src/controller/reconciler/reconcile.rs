//! # Reconciliation Logic
//!
//! One pass over a volume:
//!
//! 1. Resolve the key to the current volume (gone: nothing to do)
//! 2. Skip when export is not required, or the create event is delivered and the
//!    volume is not being deleted
//! 3. Resolve the collector for the volume's backend
//! 4. Create path: collect, sign, send, mark `volume-create: sent`
//! 5. Delete path (deleting volumes only): collect, sign, send, mark
//!    `volume-delete: sent`, then release the events finalizers
//!
//! Delivery and finalizer failures are also reported as warnings on the volume.
//!
//! Any failure aborts the pass and is retried by the error policy. Retrying is
//! safe because every step is guarded by the markers written after it.

use super::phase::DeliveryPhase;
use super::types::{Reconciler, ReconcilerError};
use crate::collector::{EventKind, EventPayload, VolumeEventCollector};
use crate::controller::diagnostics::{
    REASON_EVENT_INFORMATION, REASON_EXPORTED, REASON_UNSUPPORTED_VOLUME_TYPE,
};
use crate::observability::metrics;
use crate::sign::sign_json;
use k8s_openapi::api::core::v1::PersistentVolume;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn, Instrument};

/// `namespace/name` or `name`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ResourceKey {
    /// Split a queue key; `None` when it is malformed
    #[must_use]
    pub fn parse(key: &str) -> Option<Self> {
        let mut parts = key.split('/');
        let (first, second, rest) = (parts.next()?, parts.next(), parts.next());
        match (second, rest) {
            (None, _) if !first.is_empty() => Some(Self {
                namespace: None,
                name: first.to_string(),
            }),
            (Some(name), None) if !name.is_empty() => Some(Self {
                namespace: (!first.is_empty()).then(|| first.to_string()),
                name: name.to_string(),
            }),
            _ => None,
        }
    }
}

/// What a reconcile pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Malformed key, dropped without retry
    InvalidKey,
    /// The volume no longer exists
    Gone,
    /// Nothing owed in this phase
    Skipped(DeliveryPhase),
    Synced {
        create_sent: bool,
        delete_sent: bool,
        finalizers_removed: usize,
    },
}

/// Controller entry point: reconcile the volume and requeue after the resync interval
pub async fn reconcile(
    volume: Arc<PersistentVolume>,
    ctx: Arc<Reconciler>,
) -> Result<Action, ReconcilerError> {
    let name = volume.metadata.name.clone().unwrap_or_default();
    let outcome = reconcile_key(&ctx, &name).await?;
    debug!(volume.name = name.as_str(), outcome = ?outcome, "reconcile.completed");

    ctx.reset_backoff(&name);
    Ok(Action::requeue(ctx.config.resync_interval()))
}

/// Reconcile the volume named by `key`
pub async fn reconcile_key(
    ctx: &Reconciler,
    key: &str,
) -> Result<ReconcileOutcome, ReconcilerError> {
    let Some(key) = ResourceKey::parse(key) else {
        error!(key = key, "reconcile.invalid_key");
        return Ok(ReconcileOutcome::InvalidKey);
    };

    let span = tracing::info_span!("exporter.reconcile", volume.name = key.name.as_str());
    async move {
        let start = Instant::now();
        metrics::increment_reconciliations();

        let volume = match ctx.store.get_volume(&key.name).await {
            Ok(volume) => volume,
            Err(e) if e.is_not_found() => {
                info!(volume.name = key.name.as_str(), "PV has been deleted");
                return Ok(ReconcileOutcome::Gone);
            }
            Err(e) => return Err(e.into()),
        };

        let result = sync(ctx, volume).await;
        metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());
        result
    }
    .instrument(span)
    .await
}

async fn sync(
    ctx: &Reconciler,
    volume: PersistentVolume,
) -> Result<ReconcileOutcome, ReconcilerError> {
    let name = volume.metadata.name.clone().unwrap_or_default();
    let keys = ctx.registry.keys();

    let phase = DeliveryPhase::observe(&volume, keys);
    if phase.can_skip() {
        debug!(volume.name = name.as_str(), phase = %phase, "reconcile.skipped");
        return Ok(ReconcileOutcome::Skipped(phase));
    }
    info!(volume.name = name.as_str(), phase = %phase, "Got PV to send volume events");

    let backend = match ctx.registry.resolve(&volume) {
        Ok(backend) => backend,
        Err(e) => {
            warn!(volume.name = name.as_str(), error = %e, "reconcile.backend_unresolved");
            ctx.diagnostics
                .warning(&volume, REASON_UNSUPPORTED_VOLUME_TYPE, &e.to_string())
                .await;
            return Err(e);
        }
    };

    let create_sent = keys.any_marked(&volume.metadata, EventKind::Create);
    let delete_sent = keys.any_marked(&volume.metadata, EventKind::Delete);
    let deleting = volume.metadata.deletion_timestamp.is_some();

    let mut collector =
        ctx.registry
            .build(backend, Arc::clone(&ctx.store), volume.clone(), Arc::clone(&ctx.config))?;

    let mut outcome = (false, false, 0);

    if !create_sent {
        deliver_or_warn(ctx, collector.as_mut(), EventKind::Create).await?;
        outcome.0 = true;
    }

    if deleting {
        if !delete_sent {
            deliver_or_warn(ctx, collector.as_mut(), EventKind::Delete).await?;
            outcome.1 = true;
        }

        let removed = match collector.remove_event_finalizer().await {
            Ok(removed) => removed,
            Err(source) => {
                let e = ReconcilerError::RemoveFinalizer {
                    volume: name.clone(),
                    source,
                };
                ctx.diagnostics
                    .warning(&volume, REASON_EVENT_INFORMATION, &e.to_string())
                    .await;
                return Err(e);
            }
        };
        metrics::add_finalizers_removed(removed);
        outcome.2 = removed;
    }

    Ok(ReconcileOutcome::Synced {
        create_sent: outcome.0,
        delete_sent: outcome.1,
        finalizers_removed: outcome.2,
    })
}

/// Deliver one event; a failure is also surfaced as a warning on the volume
async fn deliver_or_warn(
    ctx: &Reconciler,
    collector: &mut dyn VolumeEventCollector,
    kind: EventKind,
) -> Result<(), ReconcilerError> {
    if let Err(e) = deliver(ctx, collector, kind).await {
        let volume = collector.volume().clone();
        ctx.diagnostics
            .warning(&volume, REASON_EVENT_INFORMATION, &e.to_string())
            .await;
        return Err(e);
    }
    Ok(())
}

async fn deliver(
    ctx: &Reconciler,
    collector: &mut dyn VolumeEventCollector,
    kind: EventKind,
) -> Result<(), ReconcilerError> {
    let volume = collector.volume().clone();
    let name = volume.metadata.name.clone().unwrap_or_default();

    let collected = match kind {
        EventKind::Create => collector.collect_create_event_data().await,
        EventKind::Delete => collector.collect_delete_event_data().await,
    };
    let data = collected.map_err(|source| ReconcilerError::Collect {
        kind,
        volume: name.clone(),
        source,
    })?;

    let signature =
        sign_json(ctx.signer.as_ref(), &data).map_err(|source| ReconcilerError::Sign {
            kind,
            volume: name.clone(),
            source,
        })?;
    let body = EventPayload::new(kind, data, signature)
        .encode(ctx.config.data_type)
        .map_err(|source| ReconcilerError::Encode {
            kind,
            volume: name.clone(),
            source,
        })?;

    if let Err(source) = ctx.sender.send(body, ctx.config.data_type).await {
        metrics::increment_event_send_failures(kind.as_str());
        return Err(ReconcilerError::Send {
            kind,
            volume: name,
            source,
        });
    }
    metrics::increment_events_sent(kind.as_str());

    let annotated = match kind {
        EventKind::Create => collector.annotate_create_complete(&volume).await,
        EventKind::Delete => collector.annotate_delete_complete(&volume).await,
    };
    annotated.map_err(|source| ReconcilerError::Annotate {
        kind,
        volume: name.clone(),
        source,
    })?;

    info!(
        volume.name = name.as_str(),
        event.kind = %kind,
        "Successfully sent volume event to server"
    );
    ctx.diagnostics
        .normal(
            &volume,
            REASON_EXPORTED,
            &format!("Exported volume {kind} information"),
        )
        .await;
    Ok(())
}
