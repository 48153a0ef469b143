//! # Memory Store
//!
//! In-memory [`ResourceStore`] that behaves like a small API server:
//!
//! - every write bumps `resourceVersion`
//! - `update_*` with a stale `resourceVersion` fails with [`StoreError::Conflict`]
//! - `deletionTimestamp` can only be set through `mark_*_for_deletion`
//! - an object that is being deleted disappears once its finalizer list is empty
//!
//! Every trait call is appended to a call log so tests can assert on ordering, and
//! a single failure can be injected per operation with [`MemoryStore::fail_next`].

use super::{display_name, ResourceStore, StoreError, CLAIM_KIND, VOLUME_KIND};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{PersistentVolume, PersistentVolumeClaim};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A recorded store call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    GetVolume(String),
    CachedVolume(String),
    CachedClaim(String),
    UpdateVolume(String),
    UpdateClaim(String),
    PatchVolume(String),
}

impl StoreCall {
    /// True for calls that write to the store
    #[must_use]
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            StoreCall::UpdateVolume(_) | StoreCall::UpdateClaim(_) | StoreCall::PatchVolume(_)
        )
    }
}

/// Operation selector for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    GetVolume,
    CachedVolume,
    CachedClaim,
    UpdateVolume,
    UpdateClaim,
    PatchVolume,
}

#[derive(Debug, Default)]
struct Inner {
    volumes: BTreeMap<String, PersistentVolume>,
    claims: BTreeMap<(String, String), PersistentVolumeClaim>,
    calls: Vec<StoreCall>,
    pending_failures: Vec<StoreOp>,
    version: u64,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    /// Record the call and consume an injected failure for `op`, if any
    fn enter(&mut self, call: StoreCall, op: StoreOp) -> Result<(), String> {
        self.calls.push(call);
        match self.pending_failures.iter().position(|pending| *pending == op) {
            Some(index) => {
                self.pending_failures.remove(index);
                Err(format!("injected {op:?} failure"))
            }
            None => Ok(()),
        }
    }
}

/// In-memory resource store
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or overwrite a volume, assigning a fresh `resourceVersion`
    pub fn insert_volume(&self, mut volume: PersistentVolume) {
        let mut inner = self.lock();
        volume.metadata.resource_version = Some(inner.next_version());
        let name = volume.metadata.name.clone().unwrap_or_default();
        inner.volumes.insert(name, volume);
    }

    /// Create or overwrite a claim, assigning a fresh `resourceVersion`
    pub fn insert_claim(&self, mut claim: PersistentVolumeClaim) {
        let mut inner = self.lock();
        claim.metadata.resource_version = Some(inner.next_version());
        let key = claim_key(&claim.metadata);
        inner.claims.insert(key, claim);
    }

    /// Delete a volume the way the API server does: set `deletionTimestamp`, or remove it
    /// straight away when no finalizer holds it
    pub fn mark_volume_for_deletion(&self, name: &str) {
        let mut inner = self.lock();
        let version = inner.next_version();
        let Some(volume) = inner.volumes.get_mut(name) else {
            return;
        };
        if begin_deletion(&mut volume.metadata, version) {
            inner.volumes.remove(name);
        }
    }

    /// Claim counterpart of [`MemoryStore::mark_volume_for_deletion`]
    pub fn mark_claim_for_deletion(&self, namespace: &str, name: &str) {
        let mut inner = self.lock();
        let version = inner.next_version();
        let key = (namespace.to_string(), name.to_string());
        let Some(claim) = inner.claims.get_mut(&key) else {
            return;
        };
        if begin_deletion(&mut claim.metadata, version) {
            inner.claims.remove(&key);
        }
    }

    /// Remove a claim immediately, bypassing finalizers
    pub fn remove_claim(&self, namespace: &str, name: &str) {
        self.lock()
            .claims
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// Snapshot of a stored volume
    #[must_use]
    pub fn volume(&self, name: &str) -> Option<PersistentVolume> {
        self.lock().volumes.get(name).cloned()
    }

    /// Snapshot of a stored claim
    #[must_use]
    pub fn claim(&self, namespace: &str, name: &str) -> Option<PersistentVolumeClaim> {
        self.lock()
            .claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Calls recorded so far
    #[must_use]
    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    /// Write calls recorded so far
    #[must_use]
    pub fn writes(&self) -> Vec<StoreCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.is_write())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Make the next call of `op` fail with [`StoreError::Unavailable`]
    pub fn fail_next(&self, op: StoreOp) {
        self.lock().pending_failures.push(op);
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn get_volume(&self, name: &str) -> Result<PersistentVolume, StoreError> {
        let mut inner = self.lock();
        inner
            .enter(StoreCall::GetVolume(name.to_string()), StoreOp::GetVolume)
            .map_err(|message| unavailable(VOLUME_KIND, name, message))?;
        inner
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(VOLUME_KIND, name))
    }

    async fn cached_volume(&self, name: &str) -> Result<PersistentVolume, StoreError> {
        let mut inner = self.lock();
        inner
            .enter(StoreCall::CachedVolume(name.to_string()), StoreOp::CachedVolume)
            .map_err(|message| unavailable(VOLUME_KIND, name, message))?;
        inner
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(VOLUME_KIND, name))
    }

    async fn cached_claim(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        let display = display_name(Some(namespace), name);
        let mut inner = self.lock();
        inner
            .enter(StoreCall::CachedClaim(display.clone()), StoreOp::CachedClaim)
            .map_err(|message| unavailable(CLAIM_KIND, &display, message))?;
        inner
            .claims
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(CLAIM_KIND, &display))
    }

    async fn update_volume(
        &self,
        volume: &PersistentVolume,
    ) -> Result<PersistentVolume, StoreError> {
        let name = volume.metadata.name.clone().unwrap_or_default();
        let mut inner = self.lock();
        inner
            .enter(StoreCall::UpdateVolume(name.clone()), StoreOp::UpdateVolume)
            .map_err(|message| unavailable(VOLUME_KIND, &name, message))?;

        let stored = inner
            .volumes
            .get(&name)
            .ok_or_else(|| not_found(VOLUME_KIND, &name))?;
        check_version(VOLUME_KIND, &name, &stored.metadata, &volume.metadata)?;
        let deletion_timestamp = stored.metadata.deletion_timestamp.clone();

        let mut updated = volume.clone();
        updated.metadata.deletion_timestamp = deletion_timestamp;
        updated.metadata.resource_version = Some(inner.next_version());
        if is_released(&updated.metadata) {
            inner.volumes.remove(&name);
        } else {
            inner.volumes.insert(name, updated.clone());
        }
        Ok(updated)
    }

    async fn update_claim(
        &self,
        claim: &PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, StoreError> {
        let key = claim_key(&claim.metadata);
        let display = display_name(Some(&key.0), &key.1);
        let mut inner = self.lock();
        inner
            .enter(StoreCall::UpdateClaim(display.clone()), StoreOp::UpdateClaim)
            .map_err(|message| unavailable(CLAIM_KIND, &display, message))?;

        let stored = inner
            .claims
            .get(&key)
            .ok_or_else(|| not_found(CLAIM_KIND, &display))?;
        check_version(CLAIM_KIND, &display, &stored.metadata, &claim.metadata)?;
        let deletion_timestamp = stored.metadata.deletion_timestamp.clone();

        let mut updated = claim.clone();
        updated.metadata.deletion_timestamp = deletion_timestamp;
        updated.metadata.resource_version = Some(inner.next_version());
        if is_released(&updated.metadata) {
            inner.claims.remove(&key);
        } else {
            inner.claims.insert(key, updated.clone());
        }
        Ok(updated)
    }

    async fn patch_volume(
        &self,
        name: &str,
        patch: &Value,
    ) -> Result<PersistentVolume, StoreError> {
        let mut inner = self.lock();
        inner
            .enter(StoreCall::PatchVolume(name.to_string()), StoreOp::PatchVolume)
            .map_err(|message| unavailable(VOLUME_KIND, name, message))?;

        let stored = inner
            .volumes
            .get(name)
            .ok_or_else(|| not_found(VOLUME_KIND, name))?;
        let serialization = |source| StoreError::Serialization {
            kind: VOLUME_KIND,
            name: name.to_string(),
            source,
        };
        let mut document = serde_json::to_value(stored).map_err(serialization)?;
        merge_patch(&mut document, patch);
        let mut patched: PersistentVolume =
            serde_json::from_value(document).map_err(serialization)?;

        patched.metadata.name = Some(name.to_string());
        patched.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        patched.metadata.resource_version = Some(inner.next_version());
        if is_released(&patched.metadata) {
            inner.volumes.remove(name);
        } else {
            inner.volumes.insert(name.to_string(), patched.clone());
        }
        Ok(patched)
    }
}

/// Apply an RFC 7386 JSON merge patch to `target`
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_fields) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_fields) = target {
        for (key, value) in patch_fields {
            if value.is_null() {
                target_fields.remove(key);
            } else {
                merge_patch(target_fields.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Current time as a Kubernetes `Time`
///
/// Goes through the RFC 3339 wire form so this does not depend on the time
/// library `k8s-openapi` was built with.
#[must_use]
pub fn now() -> Option<Time> {
    let stamp = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    serde_json::from_value(Value::String(stamp)).ok()
}

fn claim_key(meta: &ObjectMeta) -> (String, String) {
    (
        meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
        meta.name.clone().unwrap_or_default(),
    )
}

/// Set `deletionTimestamp`; true when nothing holds the object back
fn begin_deletion(meta: &mut ObjectMeta, version: String) -> bool {
    if meta.deletion_timestamp.is_none() {
        meta.deletion_timestamp = now();
    }
    meta.resource_version = Some(version);
    meta.finalizers.as_ref().is_none_or(Vec::is_empty)
}

fn is_released(meta: &ObjectMeta) -> bool {
    meta.deletion_timestamp.is_some() && meta.finalizers.as_ref().is_none_or(Vec::is_empty)
}

fn check_version(
    kind: &'static str,
    name: &str,
    stored: &ObjectMeta,
    incoming: &ObjectMeta,
) -> Result<(), StoreError> {
    match (&incoming.resource_version, &stored.resource_version) {
        (Some(incoming), Some(stored)) if incoming != stored => Err(StoreError::Conflict {
            kind,
            name: name.to_string(),
            message: format!(
                "the object has been modified; resourceVersion {incoming} is stale (current {stored})"
            ),
        }),
        _ => Ok(()),
    }
}

fn not_found(kind: &'static str, name: &str) -> StoreError {
    StoreError::NotFound {
        kind,
        name: name.to_string(),
    }
}

fn unavailable(kind: &'static str, name: &str, message: String) -> StoreError {
    StoreError::Unavailable {
        kind,
        name: name.to_string(),
        message,
    }
}
