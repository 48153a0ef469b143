//! Shared fixtures for the integration tests: an NFS volume graph in a
//! `MemoryStore`, recording fakes for the sender and the diagnostics sink, and an
//! in-process HTTP collector.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use k8s_openapi::api::core::v1::{
    ObjectReference, PersistentVolume, PersistentVolumeClaim, PersistentVolumeClaimSpec,
    PersistentVolumeSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use volume_events_exporter::collector::DataType;
use volume_events_exporter::config::ExporterConfig;
use volume_events_exporter::controller::diagnostics::DiagnosticsSink;
use volume_events_exporter::controller::reconciler::Reconciler;
use volume_events_exporter::sign::{NoopSigner, Signer};
use volume_events_exporter::store::MemoryStore;
use volume_events_exporter::transport::{EventSender, SendError};

pub const NFS_NAMESPACE: &str = "openebs";
pub const CLAIM_NAMESPACE: &str = "default";
pub const REQUIRED: &str = "events.openebs.io/required";
pub const CREATE_MARKER: &str = "nfs.event.openebs.io/volume-create";
pub const DELETE_MARKER: &str = "nfs.event.openebs.io/volume-delete";
pub const FINALIZER: &str = "nfs.events.openebs.io/finalizer";
pub const PV_PROTECTION: &str = "kubernetes.io/pv-protection";

/// Names of the four objects making up one exported NFS volume
#[derive(Debug, Clone)]
pub struct NfsGraph {
    pub volume: String,
    pub claim: String,
    pub backing_claim: String,
    pub backing_volume: String,
}

impl NfsGraph {
    pub fn new(volume: &str) -> Self {
        Self {
            volume: volume.to_string(),
            claim: format!("claim-{volume}"),
            backing_claim: format!("nfs-{volume}"),
            backing_volume: format!("backing-{volume}"),
        }
    }
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn finalizers(names: &[&str]) -> Vec<String> {
    names.iter().map(|f| (*f).to_string()).collect()
}

/// NFS primary volume bound to `claim`
pub fn nfs_volume(name: &str, claim: &str, annotations: &[(&str, &str)]) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(string_map(&[("nfs.openebs.io/volume", "true")])),
            annotations: Some(string_map(annotations)),
            finalizers: Some(finalizers(&[PV_PROTECTION, FINALIZER])),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeSpec {
            claim_ref: Some(ObjectReference {
                kind: Some("PersistentVolumeClaim".to_string()),
                namespace: Some(CLAIM_NAMESPACE.to_string()),
                name: Some(claim.to_string()),
                ..ObjectReference::default()
            }),
            ..PersistentVolumeSpec::default()
        }),
        ..PersistentVolume::default()
    }
}

pub fn claim(
    namespace: &str,
    name: &str,
    volume_name: &str,
    with_finalizer: bool,
) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            finalizers: with_finalizer.then(|| finalizers(&[FINALIZER])),
            ..ObjectMeta::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            volume_name: Some(volume_name.to_string()),
            ..PersistentVolumeClaimSpec::default()
        }),
        ..PersistentVolumeClaim::default()
    }
}

pub fn backing_volume(name: &str) -> PersistentVolume {
    PersistentVolume {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            finalizers: Some(finalizers(&[PV_PROTECTION, FINALIZER])),
            ..ObjectMeta::default()
        },
        ..PersistentVolume::default()
    }
}

/// Seed the full graph of an NFS volume requiring export
pub fn seed_nfs_graph(store: &MemoryStore, name: &str, annotations: &[(&str, &str)]) -> NfsGraph {
    let graph = NfsGraph::new(name);
    let mut all = vec![(REQUIRED, "true")];
    all.extend_from_slice(annotations);

    store.insert_volume(nfs_volume(&graph.volume, &graph.claim, &all));
    store.insert_claim(claim(CLAIM_NAMESPACE, &graph.claim, &graph.volume, false));
    store.insert_claim(claim(NFS_NAMESPACE, &graph.backing_claim, &graph.backing_volume, true));
    store.insert_volume(backing_volume(&graph.backing_volume));
    graph
}

pub fn has_annotation(volume: &PersistentVolume, key: &str, value: &str) -> bool {
    volume
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .is_some_and(|current| current == value)
}

pub fn has_finalizer(finalizers: Option<&Vec<String>>, name: &str) -> bool {
    finalizers.is_some_and(|all| all.iter().any(|f| f == name))
}

/// Sender that records every payload and fails while `fail` is set
#[derive(Debug, Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<(Vec<u8>, DataType)>>,
    pub fail: Mutex<bool>,
}

impl RecordingSender {
    pub fn failing() -> Self {
        Self {
            fail: Mutex::new(true),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(body, _)| serde_json::from_slice(body).unwrap())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl EventSender for RecordingSender {
    async fn send(&self, body: Vec<u8>, data_type: DataType) -> Result<(), SendError> {
        if *self.fail.lock().unwrap() {
            return Err(SendError::Rejected {
                url: "http://collector.test/events".to_string(),
                status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                body: "collector unavailable".to_string(),
            });
        }
        self.sent.lock().unwrap().push((body, data_type));
        Ok(())
    }
}

/// One published diagnostic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub warning: bool,
    pub volume: String,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    pub events: Mutex<Vec<Diagnostic>>,
}

impl RecordingDiagnostics {
    pub fn warnings(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.warning)
            .cloned()
            .collect()
    }

    pub fn normals(&self) -> Vec<Diagnostic> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| !event.warning)
            .cloned()
            .collect()
    }

    fn push(&self, warning: bool, volume: &PersistentVolume, reason: &str, message: &str) {
        self.events.lock().unwrap().push(Diagnostic {
            warning,
            volume: volume.metadata.name.clone().unwrap_or_default(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

#[async_trait]
impl DiagnosticsSink for RecordingDiagnostics {
    async fn normal(&self, volume: &PersistentVolume, reason: &str, message: &str) {
        self.push(false, volume, reason, message);
    }

    async fn warning(&self, volume: &PersistentVolume, reason: &str, message: &str) {
        self.push(true, volume, reason, message);
    }
}

/// Reconciler wired to in-memory fakes
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub sender: Arc<RecordingSender>,
    pub diagnostics: Arc<RecordingDiagnostics>,
    pub reconciler: Reconciler,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(Arc::new(RecordingSender::default()), Arc::new(NoopSigner))
    }

    pub fn with(sender: Arc<RecordingSender>, signer: Arc<dyn Signer>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let diagnostics = Arc::new(RecordingDiagnostics::default());
        let config = Arc::new(ExporterConfig {
            callback_url: "http://collector.test/events".to_string(),
            ..ExporterConfig::default()
        });
        let reconciler = Reconciler::new(
            store.clone(),
            signer,
            sender.clone(),
            diagnostics.clone(),
            config,
        );
        Self {
            store,
            sender,
            diagnostics,
            reconciler,
        }
    }
}

/// Request captured by the in-process collector
#[derive(Debug, Clone)]
pub struct CapturedRequest {
    pub token: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Clone)]
struct CollectorState {
    status: StatusCode,
    reply: &'static str,
    requests: Arc<Mutex<Vec<CapturedRequest>>>,
}

async fn collect(
    State(state): State<CollectorState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };
    state.requests.lock().unwrap().push(CapturedRequest {
        token: header("token"),
        content_type: header("content-type"),
        body: body.to_vec(),
    });
    (state.status, state.reply)
}

/// Start a collector answering every POST on `/events` with `status`; returns the
/// endpoint URL and the captured requests
pub async fn spawn_collector(
    status: StatusCode,
    reply: &'static str,
) -> (String, Arc<Mutex<Vec<CapturedRequest>>>) {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/events", post(collect))
        .with_state(CollectorState {
            status,
            reply,
            requests: requests.clone(),
        });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/events"), requests)
}
