//! Child resource patchers
//!
//! A patcher is one pure step `(parent, children) -> children`. Steps are
//! composed into a [`ChildResourcePatcherChain`], which runs them strictly in
//! order and stops at the first failure. Order is part of the contract: the
//! standard chain corrects namespaces before labels are propagated.

use kube::ResourceExt;
use kube::core::DynamicObject;
use thiserror::Error;

use super::common::{DEFAULTING_ANNOTATION, gvk_of, owner_reference, parent_labels};

#[derive(Error, Debug)]
pub enum PatchError {
    #[error("parent resource is missing {0}")]
    MissingParentField(&'static str),

    #[error("{0}")]
    Other(String),
}

/// One step of the child resource patch pipeline
pub trait ChildResourcePatcher: Send + Sync {
    fn patch(
        &self,
        parent: &DynamicObject,
        children: Vec<DynamicObject>,
    ) -> Result<Vec<DynamicObject>, PatchError>;
}

impl<F> ChildResourcePatcher for F
where
    F: Fn(&DynamicObject, Vec<DynamicObject>) -> Result<Vec<DynamicObject>, PatchError>
        + Send
        + Sync,
{
    fn patch(
        &self,
        parent: &DynamicObject,
        children: Vec<DynamicObject>,
    ) -> Result<Vec<DynamicObject>, PatchError> {
        self(parent, children)
    }
}

/// Ordered list of patchers applied one after another
pub struct ChildResourcePatcherChain {
    steps: Vec<Box<dyn ChildResourcePatcher>>,
}

impl ChildResourcePatcherChain {
    pub fn new(steps: Vec<Box<dyn ChildResourcePatcher>>) -> Self {
        Self { steps }
    }

    /// Chain that leaves children untouched
    pub fn empty() -> Self {
        Self { steps: Vec::new() }
    }

    /// The chain used unless configured otherwise
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(OwnerReferenceAdder),
            Box::new(DefaultingAnnotationRemover),
            Box::new(NamespacePatcher),
            Box::new(LabelPropagator),
            Box::new(ParentLabelSetAdder),
        ])
    }

    /// Append a step at the end of the chain
    pub fn with(mut self, step: impl ChildResourcePatcher + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl ChildResourcePatcher for ChildResourcePatcherChain {
    fn patch(
        &self,
        parent: &DynamicObject,
        children: Vec<DynamicObject>,
    ) -> Result<Vec<DynamicObject>, PatchError> {
        self.steps
            .iter()
            .try_fold(children, |children, step| step.patch(parent, children))
    }
}

impl std::fmt::Debug for ChildResourcePatcherChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildResourcePatcherChain")
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// Makes the parent the controlling owner of every child, so children are
/// garbage collected with it. A reference with the same UID is replaced.
#[derive(Clone, Copy, Debug, Default)]
pub struct OwnerReferenceAdder;

impl ChildResourcePatcher for OwnerReferenceAdder {
    fn patch(
        &self,
        parent: &DynamicObject,
        mut children: Vec<DynamicObject>,
    ) -> Result<Vec<DynamicObject>, PatchError> {
        let owner = owner_reference(parent).ok_or(PatchError::MissingParentField(
            ".apiVersion, .kind, .metadata.name or .metadata.uid",
        ))?;

        for child in &mut children {
            let refs = child.metadata.owner_references.get_or_insert_with(Vec::new);
            match refs.iter().position(|r| r.uid == owner.uid) {
                Some(pos) => refs[pos] = owner.clone(),
                None => refs.push(owner.clone()),
            }
        }
        Ok(children)
    }
}

/// Strips the defaulting annotation left by templating engines
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultingAnnotationRemover;

impl ChildResourcePatcher for DefaultingAnnotationRemover {
    fn patch(
        &self,
        _parent: &DynamicObject,
        mut children: Vec<DynamicObject>,
    ) -> Result<Vec<DynamicObject>, PatchError> {
        for child in &mut children {
            if let Some(annotations) = child.metadata.annotations.as_mut() {
                annotations.remove(DEFAULTING_ANNOTATION);
                if annotations.is_empty() {
                    child.metadata.annotations = None;
                }
            }
        }
        Ok(children)
    }
}

/// Places children without a namespace into the parent's namespace.
/// Children of a cluster-scoped parent are left alone.
#[derive(Clone, Copy, Debug, Default)]
pub struct NamespacePatcher;

impl ChildResourcePatcher for NamespacePatcher {
    fn patch(
        &self,
        parent: &DynamicObject,
        mut children: Vec<DynamicObject>,
    ) -> Result<Vec<DynamicObject>, PatchError> {
        let Some(ns) = parent.namespace() else {
            return Ok(children);
        };
        for child in &mut children {
            if child.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
                child.metadata.namespace = Some(ns.clone());
            }
        }
        Ok(children)
    }
}

/// Copies every parent label onto the children, overwriting same-key labels
#[derive(Clone, Copy, Debug, Default)]
pub struct LabelPropagator;

impl ChildResourcePatcher for LabelPropagator {
    fn patch(
        &self,
        parent: &DynamicObject,
        mut children: Vec<DynamicObject>,
    ) -> Result<Vec<DynamicObject>, PatchError> {
        let labels = parent.labels();
        if labels.is_empty() {
            return Ok(children);
        }
        for child in &mut children {
            child
                .labels_mut()
                .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        Ok(children)
    }
}

/// Labels every child with the group, version, kind, name and namespace of
/// its parent
#[derive(Clone, Copy, Debug, Default)]
pub struct ParentLabelSetAdder;

impl ChildResourcePatcher for ParentLabelSetAdder {
    fn patch(
        &self,
        parent: &DynamicObject,
        mut children: Vec<DynamicObject>,
    ) -> Result<Vec<DynamicObject>, PatchError> {
        let gvk = gvk_of(parent).ok_or(PatchError::MissingParentField(".apiVersion or .kind"))?;
        let labels = parent_labels(parent, &gvk);
        for child in &mut children {
            child.labels_mut().extend(labels.clone());
        }
        Ok(children)
    }
}
