//! # Exporter Configuration
//!
//! Process-level settings loaded once from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use crate::collector::DataType;

/// Exporter configuration
///
/// Built once at process start and shared read-only (`Arc<ExporterConfig>`) with the
/// reconciler, the collectors and the transport. Environment variables are populated
/// from the deployment manifest.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Resync interval (seconds)
    /// Successfully reconciled volumes are requeued after this long
    pub resync_interval_secs: u64,
    /// Callback endpoint receiving volume events
    pub callback_url: String,
    /// Token sent in the `Token` header of every callback request
    pub callback_token: String,
    /// Encoding of the callback request body
    pub data_type: DataType,
    /// PKCS#1 PEM private key used to sign payloads (sender side)
    pub signing_private_key_path: Option<PathBuf>,
    /// PKCS#1 PEM public key used to verify payloads (receiver side)
    pub signing_public_key_path: Option<PathBuf>,
    /// Namespace holding the NFS server's backing PVCs
    pub nfs_server_namespace: String,
    /// Emit Kubernetes Events on the volumes
    pub generate_k8s_events: bool,
    /// Maximum concurrent reconciliations
    pub workers: u16,
    /// Per-key retry backoff base (milliseconds)
    pub backoff_base_ms: u64,
    /// Per-key retry backoff ceiling (seconds)
    pub backoff_max_secs: u64,
    /// Metrics / probes port
    pub metrics_port: u16,
    /// Log format (json, text)
    pub log_format: String,
    /// Pod name reported as the instance of published Kubernetes Events
    pub pod_name: Option<String>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            callback_url: String::new(),
            callback_token: String::new(),
            data_type: DataType::Json,
            signing_private_key_path: None,
            signing_public_key_path: None,
            nfs_server_namespace: DEFAULT_NFS_SERVER_NAMESPACE.to_string(),
            generate_k8s_events: true,
            workers: DEFAULT_WORKERS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            metrics_port: DEFAULT_METRICS_PORT,
            log_format: "text".to_string(),
            pod_name: None,
        }
    }
}

impl ExporterConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `from_env` is a thin wrapper; tests pass a map instead of mutating the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        use crate::constants::*;

        // 0 and garbage both fall back to the default, matching the informer resync rule
        let resync_interval_secs = match parse_or(&lookup, "RESYNC_INTERVAL", 0u64) {
            0 => DEFAULT_RESYNC_INTERVAL_SECS,
            secs => secs,
        };

        let nfs_server_namespace = non_empty(&lookup, "OPENEBS_IO_NFS_SERVER_NS")
            .or_else(|| non_empty(&lookup, "OPENEBS_NAMESPACE"))
            .unwrap_or_else(|| DEFAULT_NFS_SERVER_NAMESPACE.to_string());

        let data_type = lookup("CALLBACK_DATA_TYPE")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DataType::Json);

        Self {
            resync_interval_secs,
            callback_url: non_empty(&lookup, "CALLBACK_URL").unwrap_or_default(),
            callback_token: non_empty(&lookup, "CALLBACK_TOKEN").unwrap_or_default(),
            data_type,
            signing_private_key_path: non_empty(&lookup, "SIGNING_PRIVATE_KEY_PATH")
                .map(PathBuf::from),
            signing_public_key_path: non_empty(&lookup, "SIGNING_PUBLIC_KEY_PATH")
                .map(PathBuf::from),
            nfs_server_namespace,
            generate_k8s_events: parse_bool_or(&lookup, "GENERATE_K8S_EVENTS", true),
            workers: parse_or(&lookup, "WORKERS", DEFAULT_WORKERS).max(1),
            backoff_base_ms: parse_or(&lookup, "BACKOFF_BASE_MS", DEFAULT_BACKOFF_BASE_MS),
            backoff_max_secs: parse_or(&lookup, "BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            metrics_port: parse_or(&lookup, "METRICS_PORT", DEFAULT_METRICS_PORT),
            log_format: non_empty(&lookup, "LOG_FORMAT").unwrap_or_else(|| "text".to_string()),
            pod_name: non_empty(&lookup, "POD_NAME"),
        }
    }

    /// Get resync duration
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    /// Get backoff base duration
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Get backoff ceiling duration
    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }
}

/// Read a trimmed, non-empty value
fn non_empty<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read and parse a value or return default value
fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a value as boolean or return default
fn parse_bool_or<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| {
            let v_lower = v.trim().to_lowercase();
            v_lower == "true" || v_lower == "1" || v_lower == "yes" || v_lower == "on"
        })
        .unwrap_or(default)
}
