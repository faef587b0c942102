//! Execution of work on cluster roles.
//!
//! An [`ExecutionUnit`] is one step on one role. The [`RemoteExecutor`]
//! runs a single unit over a pooled connection; the
//! [`ExecutionCoordinator`] fans work out over many roles with bounded
//! parallelism and hands back one [`RoleOutcome`] per role.

pub mod coordinator;
pub mod remote;

pub use coordinator::{run_sequence, ExecutionCoordinator};
pub use remote::RemoteExecutor;

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::RoleFailure;
use crate::hadoop::PropertyPatch;
use crate::topology::{Host, Role};

/// What a unit does on its role's host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOperation {
    /// Run a shell command
    Command(String),
    /// Copy a local file into a remote directory, keeping its name
    Upload { local: PathBuf, remote_dir: PathBuf },
    /// Read a remote file
    Fetch { path: PathBuf },
    /// Replace a remote file's content
    Write { path: PathBuf, content: Vec<u8> },
    /// Set properties in a remote Hadoop XML file. With `source`, the
    /// patches apply to that document instead of the current remote one.
    Patch {
        path: PathBuf,
        patches: Vec<PropertyPatch>,
        source: Option<String>,
    },
    /// Stop the role's process
    Stop,
    /// Start the role's process
    Start,
    /// Report the role's process state
    Status,
}

impl UnitOperation {
    /// Short description used as the default unit label.
    pub fn describe(&self) -> String {
        match self {
            UnitOperation::Command(cmd) => format!("command: {}", cmd),
            UnitOperation::Upload { local, remote_dir } => {
                format!("upload {} to {}", local.display(), remote_dir.display())
            }
            UnitOperation::Fetch { path } => format!("fetch {}", path.display()),
            UnitOperation::Write { path, .. } => format!("write {}", path.display()),
            UnitOperation::Patch { path, patches, .. } => {
                format!("patch {} ({} properties)", path.display(), patches.len())
            }
            UnitOperation::Stop => "stop".to_string(),
            UnitOperation::Start => "start".to_string(),
            UnitOperation::Status => "status".to_string(),
        }
    }
}

/// One step of work bound to a role and its host.
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    pub role: Role,
    pub host: Host,
    pub label: String,
    pub operation: UnitOperation,
    /// Upper bound for the whole unit, retries included
    pub timeout: Duration,
}

impl ExecutionUnit {
    pub fn new(role: &Role, host: &Host, operation: UnitOperation, timeout: Duration) -> Self {
        Self {
            role: role.clone(),
            host: host.clone(),
            label: operation.describe(),
            operation,
            timeout,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// Outcome class of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Succeeded,
    /// Nothing to do, e.g. stopping a role that was not running
    AlreadyInState,
    Failed,
}

impl UnitStatus {
    /// Whether the next unit of the same role may run.
    pub fn permits_next(&self) -> bool {
        !matches!(self, UnitStatus::Failed)
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Succeeded => f.write_str("ok"),
            UnitStatus::AlreadyInState => f.write_str("unchanged"),
            UnitStatus::Failed => f.write_str("failed"),
        }
    }
}

/// Result of one unit.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub role: String,
    pub label: String,
    pub status: UnitStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// File content returned by a fetch, or raw command stdout
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn succeeded(role: impl Into<String>, label: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            label: label.into(),
            status: UnitStatus::Succeeded,
            exit_code: None,
            stdout: stdout.into(),
            stderr: String::new(),
            data: None,
            duration: Duration::ZERO,
        }
    }

    pub fn failed(role: impl Into<String>, label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            label: label.into(),
            status: UnitStatus::Failed,
            exit_code: None,
            stdout: String::new(),
            stderr: message.into(),
            data: None,
            duration: Duration::ZERO,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn is_success(&self) -> bool {
        self.status.permits_next()
    }

    /// The most useful text explaining a failure.
    pub fn failure_detail(&self) -> String {
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim()
        } else {
            self.stderr.trim()
        };
        match self.exit_code {
            Some(code) if detail.is_empty() => format!("{}: exited with {}", self.label, code),
            _ if detail.is_empty() => self.label.clone(),
            _ => format!("{}: {}", self.label, detail),
        }
    }
}

/// Everything that ran on one role during an action.
#[derive(Debug, Clone, Serialize)]
pub struct RoleOutcome {
    pub role: String,
    pub results: Vec<ExecutionResult>,
}

impl RoleOutcome {
    pub fn new(role: impl Into<String>, results: Vec<ExecutionResult>) -> Self {
        Self {
            role: role.into(),
            results,
        }
    }

    /// True when no unit failed.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(ExecutionResult::is_success)
    }

    /// Failure summary for aggregate errors, `None` on success.
    pub fn failure(&self) -> Option<RoleFailure> {
        let failed = self.results.iter().find(|r| !r.is_success())?;
        Some(RoleFailure::new(self.role.clone(), failed.failure_detail()))
    }

    pub fn duration(&self) -> Duration {
        self.results.iter().map(|r| r.duration).sum()
    }
}

/// Failures across outcomes, in order.
pub fn collect_failures(outcomes: &[RoleOutcome]) -> Vec<RoleFailure> {
    outcomes.iter().filter_map(RoleOutcome::failure).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_reports_first_failure() {
        let outcome = RoleOutcome::new(
            "datanode-1",
            vec![
                ExecutionResult::succeeded("datanode-1", "stop", ""),
                ExecutionResult::failed("datanode-1", "start", "port 9866 in use\n"),
            ],
        );

        assert!(!outcome.is_success());
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.role, "datanode-1");
        assert_eq!(failure.detail, "start: port 9866 in use");
    }

    #[test]
    fn test_already_in_state_is_not_a_failure() {
        let mut stop = ExecutionResult::succeeded("nn", "stop", "");
        stop.status = UnitStatus::AlreadyInState;
        let outcome = RoleOutcome::new("nn", vec![stop]);
        assert!(outcome.is_success());
        assert!(outcome.failure().is_none());
    }

    #[test]
    fn test_failure_detail_falls_back_to_exit_code() {
        let mut result = ExecutionResult::failed("nn", "command: false", "");
        result.exit_code = Some(1);
        assert_eq!(result.failure_detail(), "command: false: exited with 1");
    }
}
