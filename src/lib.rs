pub mod config;
pub mod controller;
pub mod health;
pub mod resources;
pub mod store;

pub use config::{ConfigError, EngineKind, OperatorConfig};
pub use controller::{
    ApplyError, BackoffConfig, Condition, ConditionedStatus, Context, Error, ReconcileFailure,
    Result, TemplatingReconciler, apply, error_policy, reconcile,
};
pub use health::{HealthState, Metrics};
pub use store::{ClusterStore, KubeStore, NamespacedName, ObjectKey};

use std::sync::Arc;

use futures::StreamExt;
use kube::core::DynamicObject;
use kube::discovery::{self, Scope};
use kube::runtime::Controller;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client};

/// Run the controller for the parent kind configured on the reconciler.
///
/// When `namespace` is `Some(ns)`, only watches parents in that namespace.
/// When `namespace` is `None`, watches parents cluster-wide. Returns an error
/// only if the parent kind cannot be resolved through discovery.
pub async fn run_controller(
    client: Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
) -> std::result::Result<(), kube::Error> {
    let gvk = ctx.reconciler.parent_gvk().clone();
    let (ar, caps) = discovery::pinned_kind(&client, &gvk).await?;

    let scope_msg = namespace.unwrap_or("cluster-wide");
    tracing::info!(
        "Starting controller for {} resources (scope: {})",
        resources::format_gvk(&gvk),
        scope_msg
    );

    let parents: Api<DynamicObject> = match (&caps.scope, namespace) {
        (Scope::Namespaced, Some(ns)) => Api::namespaced_with(client, ns, &ar),
        _ => Api::all_with(client, &ar),
    };

    // Mark as ready once we start the controller
    if let Some(ref state) = ctx.health_state {
        state.set_ready(true).await;
    }

    let watcher_config = WatcherConfig::default().any_semantic();

    // Children are not watched; the long requeue picks up drift
    Controller::new_with(parents, watcher_config, ar)
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => {
                    tracing::debug!("Reconciled: {}", obj.name);
                }
                Err(e) => {
                    tracing::error!("Reconciliation error: {:?}", e);
                }
            }
        })
        .await;

    // This should never complete in normal operation
    tracing::error!("Controller stream ended unexpectedly");
    Ok(())
}
