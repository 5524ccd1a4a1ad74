//! Access to the cluster state store
//!
//! The reconciler only needs four primitives from the API server: read an
//! object, create it, merge-patch it and write the status subresource. They are
//! expressed as the [`ClusterStore`] trait so the control loop can be driven
//! against the real cluster ([`KubeStore`]) or an in-memory store in tests.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use kube::api::{Patch, PatchParams, PostParams};
use kube::core::{ApiResource, DynamicObject, GroupVersionKind};
use kube::discovery::{self, ApiCapabilities, Scope};
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use crate::resources::FIELD_MANAGER;

/// Namespaced name of the object a reconcile cycle is triggered for
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedName {
    pub name: String,
    /// `None` for cluster-scoped objects
    pub namespace: Option<String>,
}

impl NamespacedName {
    pub fn new(name: impl Into<String>, namespace: Option<&str>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.map(str::to_string),
        }
    }

    pub fn from_object(obj: &DynamicObject) -> Self {
        Self {
            name: obj.name_any(),
            namespace: obj.namespace(),
        }
    }
}

impl fmt::Display for NamespacedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// Full identity of an object in the store
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    pub gvk: GroupVersionKind,
    pub name: String,
    pub namespace: Option<String>,
}

impl ObjectKey {
    pub fn new(gvk: GroupVersionKind, name: &NamespacedName) -> Self {
        Self {
            gvk,
            name: name.name.clone(),
            namespace: name.namespace.clone(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({})",
            self.namespace.as_deref().unwrap_or_default(),
            self.name,
            crate::resources::format_gvk(&self.gvk)
        )
    }
}

/// Minimal CRUD surface of the cluster state store.
///
/// Implementations must not retry internally: a failed call is reported to
/// the reconcile loop, which decides how the cycle ends. A caller that drops
/// the returned future (e.g. on a deadline) cancels the call.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Fetch an object. `Ok(None)` means the object does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, kube::Error>;

    /// Create the object as given.
    async fn create(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<(), kube::Error>;

    /// Apply a JSON merge patch (RFC 7386) to an existing object.
    async fn merge_patch(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<(), kube::Error>;

    /// Write the `status` of the object to its status subresource.
    ///
    /// The write carries the `resourceVersion` the object was read at and
    /// fails with a conflict if the object changed since.
    async fn update_status(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<(), kube::Error>;
}

/// [`ClusterStore`] backed by the Kubernetes API server.
///
/// Kinds are resolved to API resources through discovery on first use and
/// remembered for the lifetime of the store.
pub struct KubeStore {
    client: Client,
    resources: RwLock<HashMap<GroupVersionKind, (ApiResource, ApiCapabilities)>>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            resources: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve a GVK to its API resource and scope
    pub async fn resolve(
        &self,
        gvk: &GroupVersionKind,
    ) -> Result<(ApiResource, ApiCapabilities), kube::Error> {
        if let Some(found) = self
            .resources
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(gvk)
        {
            return Ok(found.clone());
        }

        let resolved = discovery::pinned_kind(&self.client, gvk).await?;
        debug!(
            kind = %gvk.kind,
            plural = %resolved.0.plural,
            "Resolved API resource"
        );
        self.resources
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(gvk.clone(), resolved.clone());
        Ok(resolved)
    }

    async fn api_for(&self, key: &ObjectKey) -> Result<Api<DynamicObject>, kube::Error> {
        let (ar, caps) = self.resolve(&key.gvk).await?;
        let client = self.client.clone();
        Ok(match (&caps.scope, key.namespace.as_deref()) {
            (Scope::Cluster, _) => Api::all_with(client, &ar),
            (Scope::Namespaced, Some(ns)) => Api::namespaced_with(client, ns, &ar),
            (Scope::Namespaced, None) => Api::default_namespaced_with(client, &ar),
        })
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<DynamicObject>, kube::Error> {
        let api = self.api_for(key).await?;
        api.get_opt(&key.name).await
    }

    async fn create(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<(), kube::Error> {
        let api = self.api_for(key).await?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.create(&params, obj).await?;
        Ok(())
    }

    async fn merge_patch(
        &self,
        key: &ObjectKey,
        patch: &serde_json::Value,
    ) -> Result<(), kube::Error> {
        let api = self.api_for(key).await?;
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.patch(&key.name, &params, &Patch::Merge(patch)).await?;
        Ok(())
    }

    async fn update_status(&self, key: &ObjectKey, obj: &DynamicObject) -> Result<(), kube::Error> {
        let api = self.api_for(key).await?;
        let patch = status_patch(obj);
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        api.patch_status(&key.name, &params, &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Merge patch writing the status of `obj`, guarded by its resource version
fn status_patch(obj: &DynamicObject) -> serde_json::Value {
    let mut patch = serde_json::json!({
        "status": obj.data.get("status").cloned().unwrap_or_default()
    });
    if let Some(version) = &obj.metadata.resource_version {
        patch["metadata"] = serde_json::json!({ "resourceVersion": version });
    }
    patch
}
