//! Error taxonomy for a reconciliation run.
//!
//! Every failure is fatal: configuration problems surface before any action
//! runs, protocol and runtime problems surface at the invocation boundary,
//! and graph/policy/convergence problems surface from the plan.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad manifest, template, variable file or CLI input.
    #[error("configuration error: {0}")]
    Config(String),

    /// A resource's declaration is rejected by its own plugin's init contract.
    #[error("resource '{resource}': {message}")]
    ResourceConfig { resource: String, message: String },

    /// A plugin answered outside the protocol.
    #[error("protocol error in resource '{resource}': {message}")]
    Protocol { resource: String, message: String },

    /// Resolution stopped making progress.
    #[error("circular dependency detected among: {}", .0.join(", "))]
    Cycle(Vec<String>),

    /// A read-only resource needs changes.
    #[error("resource '{resource}' is read-only but its state is {status}")]
    ReadOnly { resource: String, status: String },

    /// The plugin reports the resource exists but cannot be repaired.
    #[error("resource '{resource}' is INVALID: {reason}")]
    Invalid { resource: String, reason: String },

    /// Actions ran but the resource is still not VALID.
    #[error("resource '{resource}' did not converge (status after actions: {status})")]
    NotConverged { resource: String, status: String },

    /// Container engine unreachable, image pull failure, spawn failure.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A corrective action exited non-zero.
    #[error("action '{action}' of resource '{resource}' failed with exit code {exit_code}: {stderr}")]
    ActionFailed {
        resource: String,
        action: String,
        exit_code: i32,
        stderr: String,
    },

    /// The user declined the confirmation prompt.
    #[error("cancelled by user")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn resource_config(resource: &str, message: impl Into<String>) -> Self {
        Self::ResourceConfig {
            resource: resource.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn protocol(resource: &str, message: impl Into<String>) -> Self {
        Self::Protocol {
            resource: resource.to_string(),
            message: message.into(),
        }
    }
}

/// Walk the full error chain and join all causes into one string.
pub fn format_err_chain(err: &dyn std::error::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}
