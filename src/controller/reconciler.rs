//! Reconciliation logic for templated parent resources
//!
//! One cycle loads the parent, renders its children, runs them through the
//! patcher chain, applies them one by one and records the outcome as a
//! `Synced` condition on the parent. Nothing is kept between cycles: every
//! cycle re-derives the children from the parent as it is in the store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::core::{DynamicObject, GroupVersionKind, TypeMeta};
use kube::runtime::controller::Action;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, Instrument, debug, error, info, info_span, warn};

use crate::controller::apply::apply;
use crate::controller::context::Context;
use crate::controller::error::{Error, ReconcileFailure, Result};
use crate::controller::status::{Condition, ConditionedStatus};
use crate::health::Metrics;
use crate::resources::{
    ChildResourcePatcher, ChildResourcePatcherChain, NopTemplatingEngine, TemplatingEngine,
    format_gvk, gvk_of,
};
use crate::store::{ClusterStore, NamespacedName, ObjectKey};

/// Upper bound for a whole reconcile cycle
pub const RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);

/// Requeue delay after a failed cycle
pub const DEFAULT_SHORT_WAIT: Duration = Duration::from_secs(30);

/// Requeue delay after a successful cycle, to pick up drift
pub const DEFAULT_LONG_WAIT: Duration = Duration::from_secs(60);

/// Reconciles parents of one kind into their templated children
pub struct TemplatingReconciler {
    store: Arc<dyn ClusterStore>,
    parent_gvk: GroupVersionKind,
    short_wait: Duration,
    long_wait: Duration,
    logger: Option<Dispatch>,
    metrics: Option<Arc<Metrics>>,
    templating_engine: Box<dyn TemplatingEngine>,
    child_resource_patcher: ChildResourcePatcherChain,
}

/// Builder for [`TemplatingReconciler`]; every option has a default
pub struct TemplatingReconcilerBuilder {
    store: Arc<dyn ClusterStore>,
    parent_gvk: GroupVersionKind,
    short_wait: Duration,
    long_wait: Duration,
    logger: Option<Dispatch>,
    metrics: Option<Arc<Metrics>>,
    templating_engine: Box<dyn TemplatingEngine>,
    child_resource_patcher: ChildResourcePatcherChain,
}

impl TemplatingReconcilerBuilder {
    pub fn short_wait(mut self, wait: Duration) -> Self {
        self.short_wait = wait;
        self
    }

    pub fn long_wait(mut self, wait: Duration) -> Self {
        self.long_wait = wait;
        self
    }

    /// Send this reconciler's logs to `dispatch` instead of the global subscriber
    pub fn logger(mut self, dispatch: Dispatch) -> Self {
        self.logger = Some(dispatch);
        self
    }

    pub fn metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn templating_engine(mut self, engine: Box<dyn TemplatingEngine>) -> Self {
        self.templating_engine = engine;
        self
    }

    pub fn child_resource_patchers(mut self, chain: ChildResourcePatcherChain) -> Self {
        self.child_resource_patcher = chain;
        self
    }

    pub fn build(self) -> TemplatingReconciler {
        TemplatingReconciler {
            store: self.store,
            parent_gvk: self.parent_gvk,
            short_wait: self.short_wait,
            long_wait: self.long_wait,
            logger: self.logger,
            metrics: self.metrics,
            templating_engine: self.templating_engine,
            child_resource_patcher: self.child_resource_patcher,
        }
    }
}

impl TemplatingReconciler {
    /// Start configuring a reconciler for parents of kind `parent_gvk`.
    ///
    /// Defaults: 30s short wait, 60s long wait, no templating, the standard
    /// patcher chain, logs to the global subscriber.
    pub fn builder(
        store: Arc<dyn ClusterStore>,
        parent_gvk: GroupVersionKind,
    ) -> TemplatingReconcilerBuilder {
        TemplatingReconcilerBuilder {
            store,
            parent_gvk,
            short_wait: DEFAULT_SHORT_WAIT,
            long_wait: DEFAULT_LONG_WAIT,
            logger: None,
            metrics: None,
            templating_engine: Box::new(NopTemplatingEngine),
            child_resource_patcher: ChildResourcePatcherChain::standard(),
        }
    }

    pub fn parent_gvk(&self) -> &GroupVersionKind {
        &self.parent_gvk
    }

    pub fn short_wait(&self) -> Duration {
        self.short_wait
    }

    pub fn long_wait(&self) -> Duration {
        self.long_wait
    }

    pub fn child_resource_patchers(&self) -> &ChildResourcePatcherChain {
        &self.child_resource_patcher
    }

    /// Run one reconcile cycle for the parent `req`.
    ///
    /// `Ok(Action::await_change())` means nothing to do (parent gone or being
    /// deleted). `Ok(Action::requeue(..))` carries the short wait after a
    /// recorded failure and the long wait after success. `Err` is returned
    /// when the parent could not be read, its status could not be written,
    /// or the cycle ran out of time.
    pub async fn reconcile(&self, req: &NamespacedName) -> Result<Action> {
        let cycle = async {
            let span = info_span!(
                "reconcile",
                kind = %self.parent_gvk.kind,
                name = %req.name,
                namespace = req.namespace.as_deref().unwrap_or_default(),
            );
            match tokio::time::timeout(RECONCILE_TIMEOUT, self.reconcile_cycle(req))
                .instrument(span.clone())
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    span.in_scope(|| error!("Reconcile timed out after {:?}", RECONCILE_TIMEOUT));
                    Err(Error::TimeoutError(RECONCILE_TIMEOUT))
                }
            }
        };

        match &self.logger {
            Some(dispatch) => cycle.with_subscriber(dispatch.clone()).await,
            None => cycle.await,
        }
    }

    async fn reconcile_cycle(&self, req: &NamespacedName) -> Result<Action> {
        let key = ObjectKey::new(self.parent_gvk.clone(), req);

        let Some(mut parent) = self
            .store
            .get(&key)
            .await
            .map_err(Error::GetParentError)?
        else {
            debug!("Parent resource no longer exists");
            return Ok(Action::await_change());
        };

        if parent.metadata.deletion_timestamp.is_some() {
            // Children carry owner references and are garbage collected
            debug!("Parent resource is being deleted");
            return Ok(Action::await_change());
        }

        if gvk_of(&parent).is_none() {
            parent.types = Some(TypeMeta {
                api_version: self.parent_gvk.api_version(),
                kind: self.parent_gvk.kind.clone(),
            });
        }

        info!("Reconciling parent resource");
        let generation = parent.metadata.generation;

        match self.sync_children(&parent).await {
            Ok(applied) => {
                info!(children = applied, "Child resources are in sync");
                if let Some(metrics) = &self.metrics {
                    metrics.record_children_applied(req, applied);
                }
                let condition = Condition::reconcile_success().with_observed_generation(generation);
                self.update_status(&key, &mut parent, condition).await?;
                Ok(Action::requeue(self.long_wait))
            }
            Err(failure) => {
                warn!(phase = failure.phase(), "{}", failure);
                if let Some(metrics) = &self.metrics {
                    metrics.record_failure(failure.phase());
                }
                let condition =
                    Condition::reconcile_error(&failure).with_observed_generation(generation);
                self.update_status(&key, &mut parent, condition).await?;
                Ok(Action::requeue(self.short_wait))
            }
        }
    }

    /// Render, patch and apply the children of `parent`, stopping at the
    /// first child that fails. Returns the number of children applied.
    async fn sync_children(&self, parent: &DynamicObject) -> Result<usize, ReconcileFailure> {
        let children = self
            .templating_engine
            .run(parent)
            .map_err(ReconcileFailure::Templating)?;
        debug!(children = children.len(), "Rendered child resources");

        let children = self
            .child_resource_patcher
            .patch(parent, children)
            .map_err(ReconcileFailure::Patchers)?;

        for child in &children {
            apply(self.store.as_ref(), child)
                .await
                .map_err(|source| ReconcileFailure::Apply {
                    name: child.metadata.name.clone().unwrap_or_default(),
                    namespace: child.metadata.namespace.clone().unwrap_or_default(),
                    gvk: gvk_of(child).map(|gvk| format_gvk(&gvk)).unwrap_or_default(),
                    source,
                })?;
        }

        Ok(children.len())
    }

    async fn update_status(
        &self,
        key: &ObjectKey,
        parent: &mut DynamicObject,
        condition: Condition,
    ) -> Result<()> {
        let mut status = ConditionedStatus::from_object(parent);
        let previous = status.condition(&condition.type_).map(|c| c.status.clone());
        if previous.as_deref() != Some(condition.status.as_str()) {
            info!(
                condition = %condition.type_,
                from = previous.as_deref().unwrap_or("None"),
                to = %condition.status,
                "Condition status changed"
            );
        }
        status.set_condition(condition);
        status.write_to(parent)?;

        if let Err(e) = self.store.update_status(key, parent).await {
            error!("Failed to update parent status: {}", e);
            return Err(Error::UpdateStatusError(e));
        }
        Ok(())
    }
}

/// Reconcile entry point for the kube-runtime controller
pub async fn reconcile(parent: Arc<DynamicObject>, ctx: Arc<Context>) -> Result<Action> {
    let req = NamespacedName::from_object(&parent);
    let start = Instant::now();

    let result = ctx.reconciler.reconcile(&req).await;

    if let Some(state) = &ctx.health_state {
        state
            .metrics
            .record_reconcile(&req, start.elapsed().as_secs_f64());
        if result.is_err() {
            state.metrics.record_error(&req);
        }
    }

    result
}

/// Error policy for the controller
///
/// Retryable errors requeue after the initial backoff delay with jitter,
/// non-retryable ones after the maximum delay. No per-parent state is kept.
pub fn error_policy(parent: Arc<DynamicObject>, error: &Error, ctx: Arc<Context>) -> Action {
    let req = NamespacedName::from_object(&parent);
    let delay = ctx.backoff.delay_for_error(error, 0);

    if error.is_retryable() {
        warn!(
            "Retryable error for {}: {}, requeuing in {:?}",
            req, error, delay
        );
    } else {
        error!(
            "Non-retryable error for {}: {}, requeuing in {:?} for manual intervention",
            req, error, delay
        );
    }

    Action::requeue(delay)
}
