//! # Object Metadata Helpers
//!
//! Annotation and finalizer handling shared by collectors and the reconciler.
//! All helpers work on an owned `ObjectMeta`; none of them writes to the cluster.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// True when `key` is present with exactly `value`
#[must_use]
pub fn annotation_is(meta: &ObjectMeta, key: &str, value: &str) -> bool {
    meta.annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .is_some_and(|current| current == value)
}

/// Set an annotation, overwriting any previous value
pub fn set_annotation(meta: &mut ObjectMeta, key: &str, value: &str) {
    meta.annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}

#[must_use]
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .is_some_and(|finalizers| finalizers.iter().any(|f| f == finalizer))
}

/// Remove every occurrence of `finalizer`; true when the list changed
///
/// Removal is by value, not by position.
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}

/// Drop deletion metadata so the object reads as live
pub fn scrub_deletion_fields(meta: &mut ObjectMeta) {
    meta.deletion_timestamp = None;
    meta.deletion_grace_period_seconds = None;
}
