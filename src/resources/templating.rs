//! Templating engines turn a parent resource into child resource definitions

use kube::core::DynamicObject;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TemplatingError {
    #[error("parent resource is missing {0}")]
    MissingField(&'static str),

    #[error("invalid child resource definition at index {index}: {source}")]
    InvalidChild {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Render(String),
}

/// Renders one parent into zero or more children.
///
/// Engines must be pure: the same parent yields the same children, and
/// nothing is remembered between calls.
pub trait TemplatingEngine: Send + Sync {
    fn run(&self, parent: &DynamicObject) -> Result<Vec<DynamicObject>, TemplatingError>;
}

impl<F> TemplatingEngine for F
where
    F: Fn(&DynamicObject) -> Result<Vec<DynamicObject>, TemplatingError> + Send + Sync,
{
    fn run(&self, parent: &DynamicObject) -> Result<Vec<DynamicObject>, TemplatingError> {
        self(parent)
    }
}

/// Engine that renders nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NopTemplatingEngine;

impl TemplatingEngine for NopTemplatingEngine {
    fn run(&self, _parent: &DynamicObject) -> Result<Vec<DynamicObject>, TemplatingError> {
        Ok(Vec::new())
    }
}

/// Engine that takes complete child manifests from `spec.resources` of the
/// parent, without any substitution.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineResourcesEngine;

impl TemplatingEngine for InlineResourcesEngine {
    fn run(&self, parent: &DynamicObject) -> Result<Vec<DynamicObject>, TemplatingError> {
        let Some(resources) = parent.data.get("spec").and_then(|s| s.get("resources")) else {
            return Ok(Vec::new());
        };
        let items = resources
            .as_array()
            .ok_or(TemplatingError::MissingField(".spec.resources[]"))?;

        items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value(item.clone())
                    .map_err(|source| TemplatingError::InvalidChild { index, source })
            })
            .collect()
    }
}
