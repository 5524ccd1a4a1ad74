//! Unit tests for the reconcile cycle

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use serde_json::json;
use templating_operator::controller::{
    Condition, ConditionedStatus, Context, DEFAULT_LONG_WAIT, DEFAULT_SHORT_WAIT, Error,
    RECONCILE_TIMEOUT, TemplatingReconciler, condition_reasons, condition_status,
    condition_types, error_policy, reconcile,
};
use templating_operator::resources::common::PARENT_NAME_LABEL;
use templating_operator::resources::{ChildResourcePatcherChain, InlineResourcesEngine};

use crate::common::*;

const SHORT_WAIT: Duration = Duration::from_secs(7);
const LONG_WAIT: Duration = Duration::from_secs(90);

fn reconciler_with(
    store: &Arc<FakeStore>,
    children: Vec<kube::core::DynamicObject>,
) -> TemplatingReconciler {
    TemplatingReconciler::builder(store.clone(), parent_gvk())
        .short_wait(SHORT_WAIT)
        .long_wait(LONG_WAIT)
        .templating_engine(Box::new(rendering(children)))
        .build()
}

fn synced(store: &FakeStore) -> Condition {
    let parent = store
        .object(&parent_key("shop", "team-a"))
        .expect("parent is stored");
    let status = ConditionedStatus::from_object(&parent);
    let synced: Vec<_> = status
        .conditions
        .iter()
        .filter(|c| c.type_ == condition_types::SYNCED)
        .collect();
    assert_eq!(synced.len(), 1, "exactly one Synced condition");
    synced[0].clone()
}

fn created(store: &FakeStore) -> Vec<String> {
    store
        .writes()
        .iter()
        .filter(|c| matches!(c, StoreCall::Create(_)))
        .map(|c| c.key().name.clone())
        .collect()
}

mod parent_lifecycle_tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_parent_awaits_change() {
        let store = FakeStore::new().into_arc();
        let reconciler = reconciler_with(&store, vec![config_map("a", &[])]);

        let action = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(
            store.calls(),
            vec![StoreCall::Get(parent_key("shop", "team-a"))]
        );
    }

    #[tokio::test]
    async fn test_deleting_parent_is_left_alone() {
        let store = FakeStore::new()
            .with_object(ParentBuilder::new("shop", "team-a").deleting().build())
            .into_arc();
        let reconciler = reconciler_with(&store, vec![config_map("a", &[])]);

        let action = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        assert_eq!(action, Action::await_change());
        assert_eq!(store.calls().len(), 1);
        assert_eq!(store.status_updates(), 0);
    }

    #[tokio::test]
    async fn test_parent_read_failure_is_returned() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .fail_get("shop")
            .into_arc();
        let reconciler = reconciler_with(&store, vec![config_map("a", &[])]);

        let err = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::GetParentError(_)));
        assert!(store.writes().is_empty());
        assert_eq!(store.status_updates(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_store_times_out() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .hang_on_get()
            .into_arc();
        let reconciler = reconciler_with(&store, vec![config_map("a", &[])]);

        let err = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TimeoutError(d) if d == RECONCILE_TIMEOUT));
        assert!(err.is_retryable());
    }
}

mod failure_recording_tests {
    use super::*;

    #[tokio::test]
    async fn test_templating_failure_is_recorded() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .into_arc();
        let reconciler = TemplatingReconciler::builder(store.clone(), parent_gvk())
            .short_wait(SHORT_WAIT)
            .templating_engine(Box::new(failing_engine("no template for kind AppStack")))
            .build();

        let action = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(SHORT_WAIT));
        assert!(store.writes().is_empty());
        assert_eq!(store.status_updates(), 1);

        let condition = synced(&store);
        assert_eq!(condition.status, condition_status::FALSE);
        assert_eq!(condition.reason, condition_reasons::RECONCILE_ERROR);
        assert!(condition.message.contains("templating operation failed"));
        assert!(condition.message.contains("no template for kind AppStack"));
    }

    #[tokio::test]
    async fn test_patcher_failure_prevents_any_write() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .into_arc();
        let reconciler = TemplatingReconciler::builder(store.clone(), parent_gvk())
            .short_wait(SHORT_WAIT)
            .templating_engine(Box::new(rendering(vec![config_map("a", &[])])))
            .child_resource_patchers(
                ChildResourcePatcherChain::empty()
                    .with(identity_patcher)
                    .with(failing_patcher),
            )
            .build();

        let action = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(SHORT_WAIT));
        assert!(store.writes().is_empty());
        assert_eq!(store.status_updates(), 1);

        let condition = synced(&store);
        assert_eq!(condition.status, condition_status::FALSE);
        assert!(condition.message.contains("child resource patchers failed"));
    }

    #[tokio::test]
    async fn test_apply_stops_at_first_failing_child() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .fail_create("c")
            .into_arc();
        let children = ["a", "b", "c", "d"]
            .iter()
            .map(|name| config_map(name, &[]))
            .collect();
        let reconciler = reconciler_with(&store, children);

        let action = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(SHORT_WAIT));
        assert_eq!(created(&store), vec!["a", "b", "c"]);
        assert!(store.calls().iter().all(|c| c.key().name != "d"));
        assert!(store.object(&key_of(&in_namespace(config_map("a", &[]), "team-a"))).is_some());
        assert!(store.object(&key_of(&in_namespace(config_map("c", &[]), "team-a"))).is_none());

        let condition = synced(&store);
        assert!(
            condition
                .message
                .starts_with("apply failed: c/team-a of type v1, Kind=ConfigMap: could not create child resource")
        );
    }

    #[tokio::test]
    async fn test_status_write_failure_is_returned() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .fail_status_update()
            .into_arc();
        let reconciler = reconciler_with(&store, vec![config_map("a", &[])]);

        let err = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UpdateStatusError(_)));
        assert_eq!(created(&store), vec!["a"]);
    }

    #[tokio::test]
    async fn test_status_write_failure_after_templating_failure() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .fail_status_update()
            .into_arc();
        let reconciler = TemplatingReconciler::builder(store.clone(), parent_gvk())
            .templating_engine(Box::new(failing_engine("missing value for .spec.image")))
            .build();

        let err = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UpdateStatusError(_)));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_status_write_failure_after_patcher_failure() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .fail_status_update()
            .into_arc();
        let reconciler = TemplatingReconciler::builder(store.clone(), parent_gvk())
            .templating_engine(Box::new(rendering(vec![config_map("a", &[])])))
            .child_resource_patchers(ChildResourcePatcherChain::empty().with(failing_patcher))
            .build();

        let err = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UpdateStatusError(_)));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn test_status_write_failure_after_apply_failure() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .fail_create("b")
            .fail_status_update()
            .into_arc();
        let reconciler = reconciler_with(&store, vec![config_map("a", &[]), config_map("b", &[])]);

        let err = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UpdateStatusError(_)));
        assert_eq!(created(&store), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stale_status_write_is_rejected() {
        let foreign = json!({ "url": "https://other-writer.example.org" });
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .write_status_after_read("shop", foreign.clone())
            .into_arc();
        let reconciler = reconciler_with(&store, vec![config_map("a", &[])]);

        let err = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UpdateStatusError(_)));
        assert!(err.is_retryable());
        let stored = store.object(&parent_key("shop", "team-a")).unwrap();
        assert_eq!(stored.data["status"], foreign);
        assert_eq!(stored.metadata.resource_version.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_status_write_at_current_version_bumps_it() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .into_arc();
        let reconciler = reconciler_with(&store, vec![config_map("a", &[])]);

        for _ in 0..2 {
            reconciler
                .reconcile(&parent_request("shop", "team-a"))
                .await
                .unwrap();
        }

        let stored = store.object(&parent_key("shop", "team-a")).unwrap();
        assert_eq!(stored.metadata.resource_version.as_deref(), Some("3"));
        assert_eq!(synced(&store).status, condition_status::TRUE);
    }
}

mod sync_tests {
    use super::*;

    #[tokio::test]
    async fn test_children_are_created_in_order() {
        let store = FakeStore::new()
            .with_object(
                ParentBuilder::new("shop", "team-a")
                    .with_label("app", "shop")
                    .with_generation(3)
                    .build(),
            )
            .into_arc();
        let reconciler = reconciler_with(
            &store,
            vec![config_map("a", &[("k", "v")]), child("v1", "Service", "b")],
        );

        let action = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(LONG_WAIT));
        assert_eq!(created(&store), vec!["a", "b"]);

        let condition = synced(&store);
        assert_eq!(condition.status, condition_status::TRUE);
        assert_eq!(condition.reason, condition_reasons::RECONCILE_SUCCESS);
        assert_eq!(condition.observed_generation, Some(3));

        let a = store
            .object(&key_of(&in_namespace(config_map("a", &[]), "team-a")))
            .unwrap();
        assert_eq!(a.data["data"]["k"], "v");
        assert_eq!(a.labels().get("app"), Some(&"shop".to_string()));
        assert_eq!(a.labels().get(PARENT_NAME_LABEL), Some(&"shop".to_string()));
        assert_eq!(a.owner_references()[0].uid, PARENT_UID);
    }

    #[tokio::test]
    async fn test_existing_child_is_patched() {
        let mut live = in_namespace(child("apps/v1", "Deployment", "a"), "team-a");
        live.data = json!({"spec": {"replicas": 1}});
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .with_object(live.clone())
            .into_arc();

        let mut desired = child("apps/v1", "Deployment", "a");
        desired.data = json!({"spec": {"replicas": 3}});
        let reconciler = reconciler_with(&store, vec![desired, config_map("b", &[])]);

        reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        let writes = store.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[0],
            StoreCall::MergePatch {
                key: key_of(&live),
                changed: true
            }
        );
        assert!(matches!(&writes[1], StoreCall::Create(key) if key.name == "b"));
        assert_eq!(store.object(&key_of(&live)).unwrap().data["spec"]["replicas"], 3);
    }

    #[tokio::test]
    async fn test_second_cycle_changes_nothing() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .into_arc();
        let reconciler = reconciler_with(&store, vec![config_map("a", &[]), config_map("b", &[])]);
        let req = parent_request("shop", "team-a");

        reconciler.reconcile(&req).await.unwrap();
        let first_time = synced(&store).last_transition_time;
        let first_writes = store.writes().len();
        reconciler.reconcile(&req).await.unwrap();

        let second_writes = &store.writes()[first_writes..];
        assert_eq!(second_writes.len(), 2);
        assert!(
            second_writes
                .iter()
                .all(|c| matches!(c, StoreCall::MergePatch { changed: false, .. }))
        );
        assert_eq!(synced(&store).last_transition_time, first_time);
    }

    #[tokio::test]
    async fn test_recovery_flips_condition() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .into_arc();
        let req = parent_request("shop", "team-a");

        TemplatingReconciler::builder(store.clone(), parent_gvk())
            .templating_engine(Box::new(failing_engine("boom")))
            .build()
            .reconcile(&req)
            .await
            .unwrap();
        assert_eq!(synced(&store).status, condition_status::FALSE);

        reconciler_with(&store, vec![config_map("a", &[])])
            .reconcile(&req)
            .await
            .unwrap();

        let condition = synced(&store);
        assert_eq!(condition.status, condition_status::TRUE);
        assert!(condition.message.is_empty());
    }

    #[tokio::test]
    async fn test_existing_status_fields_are_kept() {
        let store = FakeStore::new()
            .with_object(
                ParentBuilder::new("shop", "team-a")
                    .with_status(json!({"url": "https://shop.example.org"}))
                    .build(),
            )
            .into_arc();

        reconciler_with(&store, vec![])
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        let parent = store.object(&parent_key("shop", "team-a")).unwrap();
        assert_eq!(parent.data["status"]["url"], "https://shop.example.org");
        assert_eq!(synced(&store).status, condition_status::TRUE);
    }

    #[tokio::test]
    async fn test_inline_engine_renders_from_parent_spec() {
        let store = FakeStore::new()
            .with_object(
                ParentBuilder::new("shop", "team-a")
                    .with_spec(json!({
                        "resources": [
                            {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "a"}, "data": {"k": "v"}}
                        ]
                    }))
                    .build(),
            )
            .into_arc();
        let reconciler = TemplatingReconciler::builder(store.clone(), parent_gvk())
            .templating_engine(Box::new(InlineResourcesEngine))
            .build();

        reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        assert_eq!(created(&store), vec!["a"]);
    }

    #[tokio::test]
    async fn test_custom_logger_receives_cycle() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .into_arc();
        let logs = LogBuffer::default();
        let reconciler = TemplatingReconciler::builder(store.clone(), parent_gvk())
            .logger(logs.dispatch())
            .templating_engine(Box::new(rendering(vec![config_map("a", &[])])))
            .build();

        let action = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_LONG_WAIT));
        let output = logs.contents();
        assert!(output.contains("Reconciling parent resource"), "{output}");
        assert!(output.contains("name=shop"), "{output}");
        assert!(output.contains("namespace=team-a"), "{output}");
        assert!(output.contains("Condition status changed"), "{output}");
        assert!(output.contains("to=True"), "{output}");
    }

    #[tokio::test]
    async fn test_silenced_logger() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .into_arc();
        let reconciler = TemplatingReconciler::builder(store.clone(), parent_gvk())
            .logger(tracing::Dispatch::none())
            .build();

        let action = reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(DEFAULT_LONG_WAIT));
        assert!(store.writes().is_empty());
    }
}

mod builder_tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let store = FakeStore::new().into_arc();
        let reconciler = TemplatingReconciler::builder(store, parent_gvk()).build();

        assert_eq!(reconciler.short_wait(), DEFAULT_SHORT_WAIT);
        assert_eq!(reconciler.long_wait(), DEFAULT_LONG_WAIT);
        assert_eq!(reconciler.short_wait(), Duration::from_secs(30));
        assert_eq!(reconciler.long_wait(), Duration::from_secs(60));
        assert_eq!(reconciler.child_resource_patchers().len(), 5);
        assert_eq!(reconciler.parent_gvk(), &parent_gvk());
    }

    #[tokio::test]
    async fn test_default_engine_renders_nothing() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .into_arc();
        let reconciler = TemplatingReconciler::builder(store.clone(), parent_gvk()).build();

        reconciler
            .reconcile(&parent_request("shop", "team-a"))
            .await
            .unwrap();

        assert!(store.writes().is_empty());
        assert_eq!(synced(&store).status, condition_status::TRUE);
    }
}

mod controller_entry_tests {
    use super::*;

    fn context(store: &Arc<FakeStore>) -> Arc<Context> {
        let mut ctx = Context::new(reconciler_with(store, vec![config_map("a", &[])]), None);
        ctx.backoff.jitter = 0.0;
        Arc::new(ctx)
    }

    #[tokio::test]
    async fn test_entry_point_reconciles_parent() {
        let store = FakeStore::new()
            .with_object(parent("shop", "team-a"))
            .into_arc();
        let ctx = context(&store);

        let action = reconcile(Arc::new(parent("shop", "team-a")), ctx)
            .await
            .unwrap();

        assert_eq!(action, Action::requeue(LONG_WAIT));
        assert_eq!(created(&store), vec!["a"]);
    }

    #[test]
    fn test_error_policy_keeps_no_state_per_parent() {
        let store = FakeStore::new().into_arc();
        let ctx = context(&store);
        let err = Error::TimeoutError(RECONCILE_TIMEOUT);
        let initial = ctx.backoff.initial_delay;

        for i in 0..1000 {
            let parent = Arc::new(parent(&format!("shop-{i}"), "team-a"));
            assert_eq!(
                error_policy(parent, &err, ctx.clone()),
                Action::requeue(initial)
            );
        }

        // Repeated failures of one parent do not accumulate
        let last = Arc::new(parent("shop-999", "team-a"));
        for _ in 0..3 {
            assert_eq!(
                error_policy(last.clone(), &err, ctx.clone()),
                Action::requeue(initial)
            );
        }
    }

    #[test]
    fn test_error_policy_non_retryable_waits_max_delay() {
        let store = FakeStore::new().into_arc();
        let ctx = context(&store);
        let forbidden = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: "forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });

        let action = error_policy(
            Arc::new(parent("shop", "team-a")),
            &Error::UpdateStatusError(forbidden),
            ctx.clone(),
        );

        assert_eq!(action, Action::requeue(ctx.backoff.max_delay));
    }
}
