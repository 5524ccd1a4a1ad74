use std::sync::Arc;

use crate::controller::error::BackoffConfig;
use crate::controller::reconciler::TemplatingReconciler;
use crate::health::HealthState;

/// Shared context for the controller
pub struct Context {
    /// The reconcile loop for the watched parent kind
    pub reconciler: TemplatingReconciler,
    /// Health state for metrics (optional)
    pub health_state: Option<Arc<HealthState>>,
    /// Delays applied when a cycle returns an error
    pub backoff: BackoffConfig,
}

impl Context {
    pub fn new(reconciler: TemplatingReconciler, health_state: Option<Arc<HealthState>>) -> Self {
        Self {
            reconciler,
            health_state,
            backoff: BackoffConfig::default(),
        }
    }
}
