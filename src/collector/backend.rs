//! # Backend Types and Keys
//!
//! Every backend type owns a token (`nfs`) that namespaces its marker annotations
//! and its finalizer. The full `(backend, event kind) -> annotation key` table is
//! built once at startup by [`AnnotationKeys::new`].

use super::meta::{annotation_is, has_finalizer};
use super::EventKind;
use crate::constants::{
    CAS_TYPE_LABEL, EVENT_SENT_VALUE, NFS_VOLUME_LABEL, VOLUME_CREATE_ANNOTATION_SUFFIX,
    VOLUME_DELETE_ANNOTATION_SUFFIX, VOLUME_EVENTS_FINALIZER_SUFFIX,
};
use k8s_openapi::api::core::v1::PersistentVolume;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;
use std::fmt;

/// Volume backends with a collector implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendType {
    Nfs,
}

impl BackendType {
    pub const ALL: [BackendType; 1] = [BackendType::Nfs];

    /// Token prefixed to this backend's annotation keys and finalizer
    #[must_use]
    pub fn token(self) -> &'static str {
        match self {
            BackendType::Nfs => "nfs",
        }
    }

    /// Label `(key, value)` the provisioner puts on volumes of this backend
    #[must_use]
    pub fn selector_label(self) -> (&'static str, &'static str) {
        match self {
            BackendType::Nfs => (NFS_VOLUME_LABEL, "true"),
        }
    }

    /// True when the volume belongs to this backend
    ///
    /// Either the backend's selector label is set, or the generic CAS type (label, or
    /// CSI volume attribute for CSI provisioned volumes) names this backend's token.
    #[must_use]
    pub fn matches(self, volume: &PersistentVolume) -> bool {
        let (key, value) = self.selector_label();
        let labelled = volume
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .is_some_and(|current| current == value);
        labelled || cas_type(volume) == Some(self.token())
    }

    /// Backend the volume belongs to, if any is known
    #[must_use]
    pub fn detect(volume: &PersistentVolume) -> Option<BackendType> {
        Self::ALL.into_iter().find(|backend| backend.matches(volume))
    }
}

/// Generic CAS type of a volume: the `openebs.io/cas-type` label, falling back to the
/// CSI volume attribute of the same name
#[must_use]
pub fn cas_type(volume: &PersistentVolume) -> Option<&str> {
    let from_label = volume
        .metadata
        .labels
        .as_ref()
        .and_then(|labels| labels.get(CAS_TYPE_LABEL));
    let from_csi = || {
        volume
            .spec
            .as_ref()
            .and_then(|spec| spec.csi.as_ref())
            .and_then(|csi| csi.volume_attributes.as_ref())
            .and_then(|attributes| attributes.get(CAS_TYPE_LABEL))
    };
    from_label
        .or_else(from_csi)
        .map(String::as_str)
        .filter(|cas| !cas.is_empty())
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Token of an events finalizer (`<token>.events.openebs.io/finalizer`), if `finalizer` is one
#[must_use]
pub fn finalizer_token(finalizer: &str) -> Option<&str> {
    finalizer
        .strip_suffix(VOLUME_EVENTS_FINALIZER_SUFFIX)
        .and_then(|prefix| prefix.strip_suffix('.'))
        .filter(|token| !token.is_empty())
}

/// Annotation and finalizer keys of one backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendKeys {
    pub create_marker: String,
    pub delete_marker: String,
    pub finalizer: String,
}

impl BackendKeys {
    #[must_use]
    pub fn for_backend(backend: BackendType) -> Self {
        let token = backend.token();
        Self {
            create_marker: format!("{token}.{VOLUME_CREATE_ANNOTATION_SUFFIX}"),
            delete_marker: format!("{token}.{VOLUME_DELETE_ANNOTATION_SUFFIX}"),
            finalizer: format!("{token}.{VOLUME_EVENTS_FINALIZER_SUFFIX}"),
        }
    }

    /// Marker annotation key for `kind`
    #[must_use]
    pub fn marker(&self, kind: EventKind) -> &str {
        match kind {
            EventKind::Create => &self.create_marker,
            EventKind::Delete => &self.delete_marker,
        }
    }

    /// True when the `kind` marker is set to `"sent"`
    #[must_use]
    pub fn is_marked(&self, meta: &ObjectMeta, kind: EventKind) -> bool {
        annotation_is(meta, self.marker(kind), EVENT_SENT_VALUE)
    }
}

/// Key table of every known backend
#[derive(Debug, Clone)]
pub struct AnnotationKeys {
    by_backend: BTreeMap<BackendType, BackendKeys>,
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self::new()
    }
}

impl AnnotationKeys {
    #[must_use]
    pub fn new() -> Self {
        let by_backend = BackendType::ALL
            .into_iter()
            .map(|backend| (backend, BackendKeys::for_backend(backend)))
            .collect();
        Self { by_backend }
    }

    #[must_use]
    pub fn get(&self, backend: BackendType) -> Option<&BackendKeys> {
        self.by_backend.get(&backend)
    }

    /// True when any backend's `kind` marker is set
    #[must_use]
    pub fn any_marked(&self, meta: &ObjectMeta, kind: EventKind) -> bool {
        self.by_backend.values().any(|keys| keys.is_marked(meta, kind))
    }

    /// True when any backend's events finalizer is still on the object
    #[must_use]
    pub fn any_finalizer(&self, meta: &ObjectMeta) -> bool {
        self.by_backend
            .values()
            .any(|keys| has_finalizer(meta, &keys.finalizer))
    }
}
