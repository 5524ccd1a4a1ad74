//! Operator configuration from command-line flags and environment variables

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use kube::core::GroupVersionKind;
use thiserror::Error;

use crate::resources::{InlineResourcesEngine, NopTemplatingEngine, TemplatingEngine};

/// Upper bound for either requeue wait
pub const MAX_WAIT_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("parent {0} must not be empty")]
    Empty(&'static str),

    #[error("{0} must be greater than zero")]
    ZeroWait(&'static str),

    #[error("{0} must not exceed {MAX_WAIT_SECS} seconds")]
    WaitTooLong(&'static str),
}

/// Templating engines available to the binary
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum EngineKind {
    /// Render no children
    #[default]
    Nop,
    /// Take child manifests verbatim from `spec.resources`
    Inline,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "templating-operator",
    version,
    about = "Renders parent resources into child resources and keeps them applied"
)]
pub struct OperatorConfig {
    /// API group of the parent kind (empty for the core group)
    #[arg(long, env = "PARENT_GROUP", default_value = "")]
    pub parent_group: String,

    /// API version of the parent kind
    #[arg(long, env = "PARENT_VERSION")]
    pub parent_version: String,

    /// Kind of the parent resource
    #[arg(long, env = "PARENT_KIND")]
    pub parent_kind: String,

    /// Only watch parents in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub namespace: Option<String>,

    /// Seconds to wait before retrying a failed reconcile
    #[arg(long, env = "SHORT_WAIT_SECS", default_value_t = 30)]
    pub short_wait_secs: u64,

    /// Seconds to wait before re-checking a synced parent
    #[arg(long, env = "LONG_WAIT_SECS", default_value_t = 60)]
    pub long_wait_secs: u64,

    #[arg(long, env = "TEMPLATING_ENGINE", value_enum, default_value_t = EngineKind::Nop)]
    pub templating_engine: EngineKind,

    /// Listen address for health probes and metrics
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8080")]
    pub health_addr: SocketAddr,

    #[arg(long, env = "LEASE_NAME", default_value = "templating-operator-leader")]
    pub lease_name: String,
}

impl OperatorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.parent_version.is_empty() {
            return Err(ConfigError::Empty("version"));
        }
        if self.parent_kind.is_empty() {
            return Err(ConfigError::Empty("kind"));
        }
        for (name, secs) in [
            ("short wait", self.short_wait_secs),
            ("long wait", self.long_wait_secs),
        ] {
            if secs == 0 {
                return Err(ConfigError::ZeroWait(name));
            }
            if secs > MAX_WAIT_SECS {
                return Err(ConfigError::WaitTooLong(name));
            }
        }
        Ok(())
    }

    pub fn parent_gvk(&self) -> GroupVersionKind {
        GroupVersionKind::gvk(&self.parent_group, &self.parent_version, &self.parent_kind)
    }

    pub fn short_wait(&self) -> Duration {
        Duration::from_secs(self.short_wait_secs)
    }

    pub fn long_wait(&self) -> Duration {
        Duration::from_secs(self.long_wait_secs)
    }

    pub fn templating_engine(&self) -> Box<dyn TemplatingEngine> {
        match self.templating_engine {
            EngineKind::Nop => Box::new(NopTemplatingEngine),
            EngineKind::Inline => Box::new(InlineResourcesEngine),
        }
    }
}
