//! Common utilities for parent and child resources
//!
//! Label keys, owner references and type-meta helpers shared by the patchers,
//! the apply protocol and the store.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use kube::core::{DynamicObject, GroupVersionKind};

/// Operator field manager name for writes to the API server
pub const FIELD_MANAGER: &str = "templating-operator";

/// Domain prefixing every label and annotation the operator owns
macro_rules! owned_key {
    ($name:literal) => {
        concat!("templating.example.com/", $name)
    };
}

/// Annotation a templating engine may leave on children to mark defaulted
/// fields. It is stripped before the children are applied.
pub const DEFAULTING_ANNOTATION: &str = owned_key!("defaulting");

pub const PARENT_GROUP_LABEL: &str = owned_key!("parent-group");
pub const PARENT_VERSION_LABEL: &str = owned_key!("parent-version");
pub const PARENT_KIND_LABEL: &str = owned_key!("parent-kind");
pub const PARENT_NAME_LABEL: &str = owned_key!("parent-name");
pub const PARENT_NAMESPACE_LABEL: &str = owned_key!("parent-namespace");

/// Read the group/version/kind from an object's type meta
///
/// Returns `None` when `apiVersion` or `kind` is missing or empty.
pub fn gvk_of(obj: &DynamicObject) -> Option<GroupVersionKind> {
    let types = obj.types.as_ref()?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", types.api_version.as_str()),
    };
    if version.is_empty() || types.kind.is_empty() {
        return None;
    }
    Some(GroupVersionKind::gvk(group, version, &types.kind))
}

/// Render a GVK as `group/version, Kind=Kind`
pub fn format_gvk(gvk: &GroupVersionKind) -> String {
    format!("{}, Kind={}", gvk.api_version(), gvk.kind)
}

/// Generate a controller owner reference pointing at the parent
///
/// Children carrying this reference are garbage collected by the API server
/// when the parent is deleted. Returns `None` if the parent lacks type meta,
/// a name or a UID.
pub fn owner_reference(parent: &DynamicObject) -> Option<OwnerReference> {
    let types = parent.types.as_ref()?;
    Some(OwnerReference {
        api_version: types.api_version.clone(),
        kind: types.kind.clone(),
        name: parent.metadata.name.clone()?,
        uid: parent.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

/// Labels identifying the parent a child was rendered from
pub fn parent_labels(parent: &DynamicObject, gvk: &GroupVersionKind) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (PARENT_GROUP_LABEL.to_string(), gvk.group.clone()),
        (PARENT_VERSION_LABEL.to_string(), gvk.version.clone()),
        (PARENT_KIND_LABEL.to_string(), gvk.kind.clone()),
        (PARENT_NAME_LABEL.to_string(), parent.name_any()),
    ]);
    if let Some(ns) = parent.namespace() {
        labels.insert(PARENT_NAMESPACE_LABEL.to_string(), ns);
    }
    labels
}
