//! Error types for the templating controller

use std::time::Duration;

use thiserror::Error;

use crate::resources::{PatchError, TemplatingError};

/// Errors that end a reconcile cycle and are returned to the controller.
///
/// Error variants are named with the `Error` suffix for clarity (e.g., `KubeError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("could not get the parent resource: {0}")]
    GetParentError(#[source] kube::Error),

    #[error("could not update status of the parent resource: {0}")]
    UpdateStatusError(#[source] kube::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("reconcile did not finish within {0:?}")]
    TimeoutError(Duration),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::GetParentError(e) | Error::UpdateStatusError(e) => match e {
                kube::Error::Api(api_err) => {
                    // 4xx errors (except 409 Conflict, 429 TooManyRequests) are usually not retryable
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    // 5xx errors are retryable
                    true
                }
                // Network and other errors are retryable
                _ => true,
            },
            Error::SerializationError(_) => false,
            Error::TimeoutError(_) => true,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures of a single child apply
#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("child resource is missing {0}")]
    MissingObjectKey(&'static str),

    #[error("could not get child resource: {0}")]
    Get(#[source] kube::Error),

    #[error("could not create child resource: {0}")]
    Create(#[source] kube::Error),

    #[error("could not patch child resource: {0}")]
    Patch(#[source] kube::Error),

    #[error("could not serialize child resource: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failures recorded on the parent's status instead of being returned.
///
/// The cycle answers these with a short requeue.
#[derive(Error, Debug)]
pub enum ReconcileFailure {
    #[error("templating operation failed: {0}")]
    Templating(#[source] TemplatingError),

    #[error("child resource patchers failed: {0}")]
    Patchers(#[source] PatchError),

    #[error("apply failed: {name}/{namespace} of type {gvk}: {source}")]
    Apply {
        name: String,
        namespace: String,
        gvk: String,
        #[source]
        source: ApplyError,
    },
}

impl ReconcileFailure {
    /// Short name of the phase that failed, used as a metric label
    pub fn phase(&self) -> &'static str {
        match self {
            ReconcileFailure::Templating(_) => "templating",
            ReconcileFailure::Patchers(_) => "patchers",
            ReconcileFailure::Apply { .. } => "apply",
        }
    }
}

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300), // 5 minutes
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt.min(30) as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Get the delay for an error, with different handling for retryable vs non-retryable
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            // Non-retryable errors wait for manual intervention or eventual resolution
            self.max_delay
        }
    }
}
