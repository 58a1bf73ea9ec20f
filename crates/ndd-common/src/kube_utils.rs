//! Shared Kubernetes helpers using kube-rs

use kube::api::{Api, Patch, PatchParams};
use kube::Resource;
use serde::de::DeserializeOwned;

/// True if the error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// True if a create failed because the object is already there
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists")
}

/// True if a write lost an optimistic-concurrency race
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409 && ae.reason == "Conflict")
}

/// Whether `finalizer` is present on the object
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|x| x == finalizer))
}

/// Finalizer list with `finalizer` appended (no duplicates)
pub fn finalizers_with<K: Resource>(obj: &K, finalizer: &str) -> Vec<String> {
    let mut finalizers = obj.meta().finalizers.clone().unwrap_or_default();
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());
    }
    finalizers
}

/// Finalizer list with `finalizer` removed
pub fn finalizers_without<K: Resource>(obj: &K, finalizer: &str) -> Vec<String> {
    obj.meta()
        .finalizers
        .as_ref()
        .map(|f| f.iter().filter(|x| *x != finalizer).cloned().collect())
        .unwrap_or_default()
}

/// Merge-patch the status sub-resource, guarded by `resource_version`.
///
/// A stale `resource_version` makes the API server reject the write with a
/// Conflict, so concurrent writers never silently overwrite each other.
pub async fn patch_status_guarded<K>(
    api: &Api<K>,
    name: &str,
    resource_version: Option<&str>,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> Result<K, kube::Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    let patch = serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await
}

/// Merge-patch the finalizer list, guarded by `resource_version`.
pub async fn patch_finalizers<K>(
    api: &Api<K>,
    name: &str,
    resource_version: Option<&str>,
    finalizers: Vec<String>,
) -> Result<K, kube::Error>
where
    K: Resource + Clone + DeserializeOwned + std::fmt::Debug,
{
    let patch = serde_json::json!({
        "metadata": {
            "resourceVersion": resource_version,
            "finalizers": finalizers,
        }
    });
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
}
