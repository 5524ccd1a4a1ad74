pub mod apply;
pub mod context;
pub mod error;
pub mod reconciler;
pub mod status;

pub use apply::apply;
pub use context::Context;
pub use error::{ApplyError, BackoffConfig, Error, ReconcileFailure, Result};
pub use reconciler::{
    DEFAULT_LONG_WAIT, DEFAULT_SHORT_WAIT, RECONCILE_TIMEOUT, TemplatingReconciler,
    TemplatingReconcilerBuilder, error_policy, reconcile,
};
pub use status::{
    Condition, ConditionedStatus, condition_reasons, condition_status, condition_types,
};
