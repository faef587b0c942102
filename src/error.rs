//! Error types for hades.
//!
//! Per-role failures inside a fan-out action are collected into a single
//! [`Error::RemoteExecution`]; everything else surfaces as soon as it
//! happens.

use std::fmt;
use thiserror::Error;

use crate::connection::ConnectionError;

/// Result type alias for hades operations.
pub type Result<T> = std::result::Result<T, Error>;

/// One failed role inside an aggregate failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleFailure {
    /// Role name
    pub role: String,
    /// Captured stderr or error message
    pub detail: String,
}

impl RoleFailure {
    pub fn new(role: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for RoleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let detail = self.detail.trim();
        if detail.is_empty() {
            write!(f, "{}: failed without output", self.role)
        } else {
            write!(f, "{}: {}", self.role, detail)
        }
    }
}

fn format_failures(action: &str, failures: &[RoleFailure]) -> String {
    let mut out = format!("{} failed on {} role(s):", action, failures.len());
    for failure in failures {
        out.push_str("\n  - ");
        out.push_str(&failure.to_string());
    }
    out
}

/// The main error type for hades.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Selection and validation
    // ========================================================================
    /// A non-empty selector matched nothing.
    #[error("Selector '{expression}' did not match any role")]
    SelectorResolution {
        /// The expression as given by the user
        expression: String,
    },

    /// Arguments rejected before anything was contacted.
    #[error("Validation failed: {0}")]
    Validation(String),

    // ========================================================================
    // Execution
    // ========================================================================
    /// One or more roles failed during a fan-out action.
    #[error("{}", format_failures(.action, .failures))]
    RemoteExecution {
        /// Action name, e.g. "restart"
        action: String,
        /// Every failed role, in execution order
        failures: Vec<RoleFailure>,
    },

    /// Taking or restoring a config snapshot failed.
    #[error("Backup of '{file}' on role '{role}' failed: {message}")]
    Backup {
        role: String,
        file: String,
        message: String,
    },

    // ========================================================================
    // Modules
    // ========================================================================
    /// The module dependency graph contains a cycle.
    #[error("Module dependency cycle: {}", .cycle.join(" -> "))]
    DependencyCycle {
        /// Modules on the cycle, first module repeated at the end
        cycle: Vec<String>,
    },

    /// A module build failed; compile/deploy stops here.
    #[error("Compiling module '{module}' failed: {message}")]
    Compile { module: String, message: String },

    // ========================================================================
    // Environment
    // ========================================================================
    /// No usable config file; the user has to run `init` first.
    #[error("{0}")]
    ConfigSetup(String),

    /// The config file exists but is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Querying the cluster topology failed.
    #[error("Topology error: {0}")]
    Topology(String),

    /// A script step failed.
    #[error("Script '{script}' failed at step {step}: {message}")]
    Script {
        script: String,
        /// 1-based step number
        step: usize,
        message: String,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    pub fn topology(message: impl Into<String>) -> Self {
        Error::Topology(message.into())
    }

    pub fn backup(
        role: impl Into<String>,
        file: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Error::Backup {
            role: role.into(),
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn compile(module: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Compile {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Failed roles carried by an aggregate failure, empty otherwise.
    pub fn failures(&self) -> &[RoleFailure] {
        match self {
            Error::RemoteExecution { failures, .. } => failures,
            _ => &[],
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::SelectorResolution { .. } | Error::Validation(_) => 2,
            Error::RemoteExecution { .. } => 3,
            Error::Backup { .. } => 4,
            Error::DependencyCycle { .. } | Error::Compile { .. } => 5,
            Error::ConfigSetup(_) | Error::Config(_) => 6,
            Error::Connection(_) | Error::Topology(_) | Error::Http(_) => 7,
            _ => 1,
        }
    }
}
