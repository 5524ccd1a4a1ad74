//! Status and conditions management for parent resources
//!
//! Parents are untyped, so the conditions list is read from and written back
//! to `status.conditions` of the dynamic object. Every other status field is
//! carried through untouched.

use chrono::Utc;
use kube::core::DynamicObject;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// The children of the parent are in sync with its desired state
    pub const SYNCED: &str = "Synced";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Condition reasons written by the reconcile loop
pub mod condition_reasons {
    pub const RECONCILE_SUCCESS: &str = "ReconcileSuccess";
    pub const RECONCILE_ERROR: &str = "ReconcileError";
}

/// A status condition on a parent resource
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub last_transition_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    pub fn new(type_: &str, status: &str, reason: &str, message: &str) -> Self {
        Self {
            type_: type_.to_string(),
            status: status.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: Utc::now().to_rfc3339(),
            observed_generation: None,
        }
    }

    /// Every child was applied
    pub fn reconcile_success() -> Self {
        Self::new(
            condition_types::SYNCED,
            condition_status::TRUE,
            condition_reasons::RECONCILE_SUCCESS,
            "",
        )
    }

    /// A phase of the cycle failed; the message carries the cause
    pub fn reconcile_error(err: &dyn std::error::Error) -> Self {
        Self::new(
            condition_types::SYNCED,
            condition_status::FALSE,
            condition_reasons::RECONCILE_ERROR,
            &err.to_string(),
        )
    }

    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// The `status` of a parent resource
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ConditionedStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Status fields owned by someone else
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl ConditionedStatus {
    /// Read the status of a dynamic object.
    ///
    /// A conditions list that does not parse is dropped rather than failing
    /// the cycle; it is rewritten on the next status update.
    pub fn from_object(obj: &DynamicObject) -> Self {
        let mut other = obj
            .data
            .get("status")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let conditions = match other.remove("conditions") {
            Some(raw) => serde_json::from_value(raw).unwrap_or_else(|e| {
                tracing::warn!("Discarding unreadable status conditions: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        Self { conditions, other }
    }

    /// Write this status into the dynamic object
    pub fn write_to(&self, obj: &mut DynamicObject) -> Result<(), serde_json::Error> {
        let status = serde_json::to_value(self)?;
        match obj.data.as_object_mut() {
            Some(data) => {
                data.insert("status".to_string(), status);
            }
            None => obj.data = serde_json::json!({ "status": status }),
        }
        Ok(())
    }

    /// Get a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Set a condition, replacing any existing condition of the same type.
    ///
    /// The previous transition time is kept when the status did not change.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time.clone();
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }

    /// Set several conditions in order
    pub fn set_conditions(&mut self, conditions: impl IntoIterator<Item = Condition>) {
        for condition in conditions {
            self.set_condition(condition);
        }
    }
}
