//! Transports used to reach cluster hosts.
//!
//! Every host in a topology is reached through one of three transports:
//!
//! - **Local**: commands run on the control node (`sh -c`), used for the
//!   module build and for single-node development clusters.
//! - **Docker**: `docker exec` / `docker cp` into a container of a hadock
//!   compose project.
//! - **SSH** (`ssh` feature, pure Rust `russh` + SFTP): hosts managed by
//!   Cloudera Manager.
//!
//! All of them implement [`Connection`]. Callers never construct them
//! directly; a [`Connector`] turns a [`ConnectionType`] into a live
//! connection so that tests can substitute an in-memory implementation.

pub mod docker;
pub mod local;
pub mod retry;

#[cfg(feature = "ssh")]
pub mod ssh;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::config::SshSettings;

pub use docker::DockerConnection;
pub use local::LocalConnection;
pub use retry::{retry, BackoffStrategy, RetryPolicy, RetryResult, RetryStats};
#[cfg(feature = "ssh")]
pub use ssh::SshConnection;

/// Errors raised by a transport.
///
/// These describe the transport itself failing. A command that runs and
/// exits non-zero is not an error at this level; it is a [`CommandResult`]
/// with `success == false`.
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Failed to establish the connection to the host.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The host rejected our credentials.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The command could not be started or its output could not be collected.
    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    /// File upload or download failed.
    #[error("File transfer failed: {0}")]
    TransferFailed(String),

    /// Connecting or executing took longer than allowed.
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Transport configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Error reported by the SSH implementation.
    #[error("SSH error: {0}")]
    SshError(String),

    /// I/O error while talking to the transport.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The connection was closed underneath us.
    #[error("Connection closed")]
    ConnectionClosed,

    /// `docker` reported an error.
    #[error("Docker error: {0}")]
    DockerError(String),

    /// The transport cannot perform this operation.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),
}

/// Result type for connection operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Outcome of running a command through a [`Connection`].
///
/// ```rust
/// use hades::connection::CommandResult;
///
/// let ok = CommandResult::success("started".into(), String::new());
/// assert!(ok.success);
///
/// let failed = CommandResult::failure(1, String::new(), "no namenode to stop".into());
/// assert_eq!(failed.exit_code, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Exit code of the command (0 is success).
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// `true` if `exit_code == 0`.
    pub success: bool,
    /// Stdout exactly as received, when the transport kept it.
    pub raw_stdout: Option<Vec<u8>>,
}

impl CommandResult {
    /// A successful result.
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            exit_code: 0,
            stdout,
            stderr,
            success: true,
            raw_stdout: None,
        }
    }

    /// A failed result with the given exit code.
    pub fn failure(exit_code: i32, stdout: String, stderr: String) -> Self {
        Self {
            exit_code,
            stdout,
            stderr,
            success: false,
            raw_stdout: None,
        }
    }

    /// Build a result from captured process output. `stdout` is decoded
    /// lossily, the undecoded bytes stay in `raw_stdout`.
    pub fn from_output(exit_code: i32, stdout: Vec<u8>, stderr: &[u8]) -> Self {
        let text = String::from_utf8_lossy(&stdout).into_owned();
        let stderr = String::from_utf8_lossy(stderr).into_owned();
        let result = if exit_code == 0 {
            Self::success(text, stderr)
        } else {
            Self::failure(exit_code, text, stderr)
        };
        Self {
            raw_stdout: Some(stdout),
            ..result
        }
    }

    /// Stdout and stderr joined by a newline, skipping empty parts.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Options for command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Working directory for the command.
    pub cwd: Option<String>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
    /// Timeout in seconds.
    pub timeout: Option<u64>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: u64) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options for file transfer.
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Permissions to set on the written file.
    pub mode: Option<u32>,
    /// Create missing parent directories.
    pub create_dirs: bool,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    pub fn with_create_dirs(mut self) -> Self {
        self.create_dirs = true;
        self
    }
}

/// A live connection to one host.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Connection identifier (hostname or container name).
    fn identifier(&self) -> &str;

    /// Whether the connection can still be used.
    async fn is_alive(&self) -> bool;

    /// Run a shell command.
    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult>;

    /// Copy a local file to `remote_path`, replacing any existing file.
    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()>;

    /// Write `content` to `remote_path`, replacing any existing file.
    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()>;

    /// Read a remote file.
    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>>;

    /// Check whether a remote path exists.
    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool>;

    /// Close the connection. Closing twice is not an error.
    async fn close(&self) -> ConnectionResult<()>;
}

/// How a host is reached, together with the identity used for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "transport", rename_all = "snake_case")]
pub enum ConnectionType {
    /// The control node itself.
    Local,
    /// A container on the local docker daemon.
    Docker { container: String },
    /// A remote host reached over SSH.
    Ssh { host: String, port: u16, user: String },
}

impl ConnectionType {
    /// Key identifying the underlying transport endpoint.
    pub fn pool_key(&self) -> String {
        match self {
            ConnectionType::Local => "local".to_string(),
            ConnectionType::Docker { container } => format!("docker://{}", container),
            ConnectionType::Ssh { host, port, user } => {
                format!("ssh://{}@{}:{}", user, host, port)
            }
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pool_key())
    }
}

/// Opens connections for a [`ConnectionType`].
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &ConnectionType) -> ConnectionResult<Arc<dyn Connection>>;
}

/// Connector backed by the real transports.
#[derive(Debug, Clone, Default)]
pub struct TransportConnector {
    ssh: SshSettings,
}

impl TransportConnector {
    pub fn new(ssh: SshSettings) -> Self {
        Self { ssh }
    }
}

#[async_trait]
impl Connector for TransportConnector {
    async fn connect(&self, target: &ConnectionType) -> ConnectionResult<Arc<dyn Connection>> {
        match target {
            ConnectionType::Local => Ok(Arc::new(LocalConnection::new())),
            ConnectionType::Docker { container } => {
                let conn = DockerConnection::new(container.clone());
                if !conn.is_alive().await {
                    return Err(ConnectionError::ConnectionFailed(format!(
                        "container '{}' is not running",
                        container
                    )));
                }
                Ok(Arc::new(conn))
            }
            #[cfg(feature = "ssh")]
            ConnectionType::Ssh { host, port, user } => {
                let conn = SshConnection::connect(host, *port, user, &self.ssh).await?;
                Ok(Arc::new(conn))
            }
            #[cfg(not(feature = "ssh"))]
            ConnectionType::Ssh { host, .. } => Err(ConnectionError::UnsupportedOperation(
                format!("SSH support is not compiled in (host {})", host),
            )),
        }
    }
}

/// Quote a string for inclusion in a POSIX shell command.
pub fn shell_quote(s: &str) -> String {
    shell_words::quote(s).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_keys_are_distinct_per_transport() {
        let local = ConnectionType::Local;
        let docker = ConnectionType::Docker {
            container: "namenode".into(),
        };
        let ssh = ConnectionType::Ssh {
            host: "worker-1".into(),
            port: 22,
            user: "hdfs".into(),
        };

        assert_eq!(local.pool_key(), "local");
        assert_eq!(docker.pool_key(), "docker://namenode");
        assert_eq!(ssh.pool_key(), "ssh://hdfs@worker-1:22");
    }

    #[test]
    fn test_combined_output_skips_empty_streams() {
        let only_out = CommandResult::success("out".into(), String::new());
        assert_eq!(only_out.combined_output(), "out");

        let both = CommandResult::failure(2, "out".into(), "err".into());
        assert_eq!(both.combined_output(), "out\nerr");
    }

    #[test]
    fn test_connection_type_deserializes_from_tagged_json() {
        let parsed: ConnectionType =
            serde_json::from_str(r#"{"transport":"docker","container":"datanode-1"}"#).unwrap();
        assert_eq!(
            parsed,
            ConnectionType::Docker {
                container: "datanode-1".into()
            }
        );
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("plain"), "plain");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
    }
}
