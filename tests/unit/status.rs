//! Unit tests for status condition management

use serde_json::json;
use templating_operator::controller::{
    Condition, ConditionedStatus, condition_reasons, condition_status, condition_types,
};
use templating_operator::resources::TemplatingError;

use crate::common::*;

fn synced_condition(status: &str, time: &str) -> Condition {
    Condition {
        type_: condition_types::SYNCED.to_string(),
        status: status.to_string(),
        reason: String::new(),
        message: String::new(),
        last_transition_time: time.to_string(),
        observed_generation: None,
    }
}

mod condition_tests {
    use super::*;

    #[test]
    fn test_reconcile_success_condition() {
        let condition = Condition::reconcile_success();
        assert_eq!(condition.type_, condition_types::SYNCED);
        assert_eq!(condition.status, condition_status::TRUE);
        assert_eq!(condition.reason, condition_reasons::RECONCILE_SUCCESS);
        assert!(condition.message.is_empty());
        assert!(!condition.last_transition_time.is_empty());
    }

    #[test]
    fn test_reconcile_error_condition_carries_message() {
        let err = TemplatingError::Render("missing value for .spec.image".into());
        let condition = Condition::reconcile_error(&err);
        assert_eq!(condition.status, condition_status::FALSE);
        assert_eq!(condition.reason, condition_reasons::RECONCILE_ERROR);
        assert!(condition.message.contains("missing value for .spec.image"));
    }

    #[test]
    fn test_serializes_with_kubernetes_field_names() {
        let condition = Condition::reconcile_success().with_observed_generation(Some(4));
        let value = serde_json::to_value(&condition).unwrap();
        assert_eq!(value["type"], "Synced");
        assert_eq!(value["observedGeneration"], 4);
        assert!(value.get("lastTransitionTime").is_some());
        assert!(value.get("message").is_none());
    }
}

mod conditioned_status_tests {
    use super::*;

    #[test]
    fn test_set_condition_adds_new() {
        let mut status = ConditionedStatus::default();
        status.set_condition(Condition::reconcile_success());
        assert_eq!(status.conditions.len(), 1);
        assert!(status.condition(condition_types::SYNCED).is_some());
    }

    #[test]
    fn test_set_condition_replaces_same_type() {
        let mut status = ConditionedStatus::default();
        status.set_condition(Condition::reconcile_success());
        status.set_condition(Condition::reconcile_error(&TemplatingError::Render(
            "boom".into(),
        )));

        assert_eq!(status.conditions.len(), 1);
        let synced = status.condition(condition_types::SYNCED).unwrap();
        assert_eq!(synced.status, condition_status::FALSE);
    }

    #[test]
    fn test_transition_time_kept_when_status_unchanged() {
        let mut status = ConditionedStatus::default();
        status.set_condition(synced_condition("True", "2024-01-01T00:00:00Z"));
        status.set_condition(synced_condition("True", "2024-06-01T00:00:00Z"));

        assert_eq!(
            status.conditions[0].last_transition_time,
            "2024-01-01T00:00:00Z"
        );
    }

    #[test]
    fn test_transition_time_updated_when_status_changes() {
        let mut status = ConditionedStatus::default();
        status.set_condition(synced_condition("False", "2024-01-01T00:00:00Z"));
        status.set_condition(synced_condition("True", "2024-06-01T00:00:00Z"));

        assert_eq!(
            status.conditions[0].last_transition_time,
            "2024-06-01T00:00:00Z"
        );
    }

    #[test]
    fn test_set_conditions_keeps_other_types() {
        let mut status = ConditionedStatus::default();
        status.set_conditions([
            Condition::new("Ready", "True", "Available", ""),
            Condition::reconcile_success(),
        ]);
        assert_eq!(status.conditions.len(), 2);
        assert_eq!(status.conditions[0].type_, "Ready");
    }

    #[test]
    fn test_status_of_parent_round_trips() {
        let mut parent = ParentBuilder::new("shop", "team-a")
            .with_status(json!({
                "url": "https://shop.example.org",
                "conditions": [{
                    "type": "Synced",
                    "status": "False",
                    "reason": "ReconcileError",
                    "message": "templating operation failed: boom",
                    "lastTransitionTime": "2024-01-01T00:00:00Z"
                }]
            }))
            .build();

        let mut status = ConditionedStatus::from_object(&parent);
        assert_eq!(status.conditions.len(), 1);
        status.set_condition(Condition::reconcile_success());
        status.write_to(&mut parent).unwrap();

        assert_eq!(parent.data["status"]["url"], "https://shop.example.org");
        let conditions = parent.data["status"]["conditions"].as_array().unwrap();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0]["status"], "True");
        assert_ne!(conditions[0]["lastTransitionTime"], "2024-01-01T00:00:00Z");
        assert_eq!(parent.data["spec"], json!({}));
    }
}
