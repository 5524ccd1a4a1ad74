//! Idempotent upsert of a single child resource

use kube::core::DynamicObject;
use tracing::debug;

use crate::controller::error::ApplyError;
use crate::resources::gvk_of;
use crate::store::{ClusterStore, ObjectKey};

/// Create the child if it does not exist, merge-patch it if it does.
///
/// Fields set on `child` overwrite the live object; fields it leaves out are
/// untouched. Applying the same child twice ends in an empty patch. Children
/// that are no longer rendered are never deleted here, they go away with
/// their owner.
pub async fn apply(store: &dyn ClusterStore, child: &DynamicObject) -> Result<(), ApplyError> {
    let key = child_key(child)?;

    if store.get(&key).await.map_err(ApplyError::Get)?.is_none() {
        store.create(&key, child).await.map_err(ApplyError::Create)?;
        debug!(child = %key, "Created child resource");
        return Ok(());
    }

    let patch = serde_json::to_value(child)?;
    store
        .merge_patch(&key, &patch)
        .await
        .map_err(ApplyError::Patch)?;
    debug!(child = %key, "Patched child resource");

    Ok(())
}

fn child_key(child: &DynamicObject) -> Result<ObjectKey, ApplyError> {
    let gvk = gvk_of(child).ok_or(ApplyError::MissingObjectKey(".apiVersion or .kind"))?;
    let name = child
        .metadata
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or(ApplyError::MissingObjectKey(".metadata.name"))?;

    Ok(ObjectKey {
        gvk,
        name,
        namespace: child.metadata.namespace.clone(),
    })
}
