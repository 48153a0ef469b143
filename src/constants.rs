//! # Constants
//!
//! Shared constants used throughout the exporter.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable.

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default resync interval (seconds). Every tracked volume is reconciled again
/// after this long even without a watch event.
pub const DEFAULT_RESYNC_INTERVAL_SECS: u64 = 30;

/// Default number of concurrent reconcile workers
pub const DEFAULT_WORKERS: u16 = 1;

/// Per-key retry backoff base (milliseconds)
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 5;

/// Per-key retry backoff ceiling (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 1000;

/// Default NFS server namespace when neither env var is set
pub const DEFAULT_NFS_SERVER_NAMESPACE: &str = "openebs";

/// Field manager / event reporter name
pub const CONTROLLER_NAME: &str = "volume-events-exporter";

/// Annotation gating whether volume events must be exported at all
pub const EVENT_REQUIRED_ANNOTATION: &str = "events.openebs.io/required";

/// Value of [`EVENT_REQUIRED_ANNOTATION`] that enables export
pub const EVENT_REQUIRED_VALUE: &str = "true";

/// Suffix of the per-backend create marker annotation (`<backend>.` is prepended)
pub const VOLUME_CREATE_ANNOTATION_SUFFIX: &str = "event.openebs.io/volume-create";

/// Suffix of the per-backend delete marker annotation (`<backend>.` is prepended)
pub const VOLUME_DELETE_ANNOTATION_SUFFIX: &str = "event.openebs.io/volume-delete";

/// Suffix of the per-backend deletion-hold finalizer (`<backend>.` is prepended)
pub const VOLUME_EVENTS_FINALIZER_SUFFIX: &str = "events.openebs.io/finalizer";

/// Marker value written once an event has been delivered
pub const EVENT_SENT_VALUE: &str = "sent";

/// Label identifying NFS provisioned volumes
pub const NFS_VOLUME_LABEL: &str = "nfs.openebs.io/volume";

/// Generic OpenEBS storage engine label (also a CSI volume attribute)
pub const CAS_TYPE_LABEL: &str = "openebs.io/cas-type";

/// Prefix of the backing PVC name (`nfs-<pv-name>`)
pub const NFS_BACKING_CLAIM_PREFIX: &str = "nfs-";

/// HTTP header carrying the callback bearer token
pub const TOKEN_HEADER: &str = "Token";
