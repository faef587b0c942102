//! Commands and file operations on the control node itself.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions, TransferOptions,
};

/// Connection that runs everything on the local machine.
#[derive(Debug, Clone)]
pub struct LocalConnection {
    identifier: String,
}

impl LocalConnection {
    pub fn new() -> Self {
        Self::with_identifier("localhost")
    }

    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    fn build_command(&self, command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);

        if let Some(cwd) = &options.cwd {
            cmd.current_dir(cwd);
        }
        for (key, value) in &options.env {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn ensure_parent(path: &Path, options: &TransferOptions) -> ConnectionResult<()> {
        if !options.create_dirs {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ConnectionError::TransferFailed(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    async fn set_mode(path: &Path, mode: u32) -> ConnectionResult<()> {
        use std::os::unix::fs::PermissionsExt;

        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| {
                ConnectionError::TransferFailed(format!(
                    "Failed to set permissions on {}: {}",
                    path.display(),
                    e
                ))
            })
    }
}

impl Default for LocalConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connection for LocalConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(command = %command, "Executing local command");

        let child = self.build_command(command, &options).spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to spawn process: {}", e))
        })?;

        let wait = child.wait_with_output();
        let output = match options.timeout {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), wait)
                .await
                .map_err(|_| ConnectionError::Timeout(secs))?,
            None => wait.await,
        }
        .map_err(|e| ConnectionError::ExecutionFailed(format!("Failed to wait for process: {}", e)))?;

        let exit_code = output.status.code().unwrap_or(-1);
        trace!(exit_code, stdout_len = output.stdout.len(), stderr_len = output.stderr.len(), "Command completed");
        Ok(CommandResult::from_output(exit_code, output.stdout, &output.stderr))
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(src = %local_path.display(), dst = %remote_path.display(), "Copying file locally");

        Self::ensure_parent(remote_path, &options).await?;
        tokio::fs::copy(local_path, remote_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to copy {} to {}: {}",
                local_path.display(),
                remote_path.display(),
                e
            ))
        })?;

        if let Some(mode) = options.mode {
            Self::set_mode(remote_path, mode).await?;
        }
        Ok(())
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(dst = %remote_path.display(), size = content.len(), "Writing content locally");

        Self::ensure_parent(remote_path, &options).await?;
        tokio::fs::write(remote_path, content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to write to {}: {}",
                remote_path.display(),
                e
            ))
        })?;

        if let Some(mode) = options.mode {
            Self::set_mode(remote_path, mode).await?;
        }
        Ok(())
    }

    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        tokio::fs::read(remote_path).await.map_err(|e| {
            ConnectionError::TransferFailed(format!(
                "Failed to read {}: {}",
                remote_path.display(),
                e
            ))
        })
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(tokio::fs::try_exists(path).await.unwrap_or(false))
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_execute() {
        let conn = LocalConnection::new();
        let result = conn.execute("echo 'hello world'", None).await.unwrap();

        assert!(result.success);
        assert!(result.stdout.contains("hello world"));
    }

    #[tokio::test]
    async fn test_local_execute_with_env_and_cwd() {
        let conn = LocalConnection::new();
        let options = ExecuteOptions::new()
            .with_env("HADOOP_CONF_DIR", "/etc/hadoop/conf")
            .with_cwd("/tmp");
        let result = conn
            .execute("echo $HADOOP_CONF_DIR; pwd", Some(options))
            .await
            .unwrap();

        assert!(result.stdout.contains("/etc/hadoop/conf"));
        assert!(result.stdout.contains("/tmp"));
    }

    #[tokio::test]
    async fn test_local_execute_failure_keeps_exit_code() {
        let conn = LocalConnection::new();
        let result = conn.execute("echo oops >&2; exit 42", None).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.exit_code, 42);
        assert_eq!(result.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_local_timeout() {
        let conn = LocalConnection::new();
        let options = ExecuteOptions::new().with_timeout(1);
        let result = conn.execute("sleep 10", Some(options)).await;

        assert!(matches!(result, Err(ConnectionError::Timeout(1))));
    }

    #[tokio::test]
    async fn test_local_upload_overwrites_and_creates_dirs() {
        let conn = LocalConnection::new();
        let temp_dir = tempfile::tempdir().unwrap();
        let src = temp_dir.path().join("hadoop-common.jar");
        let dst = temp_dir.path().join("lib").join("hadoop-common.jar");

        tokio::fs::write(&src, b"v1").await.unwrap();
        let opts = TransferOptions::new().with_create_dirs();
        conn.upload(&src, &dst, Some(opts.clone())).await.unwrap();

        tokio::fs::write(&src, b"v2").await.unwrap();
        conn.upload(&src, &dst, Some(opts)).await.unwrap();

        assert_eq!(conn.download_content(&dst).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn test_local_path_exists() {
        let conn = LocalConnection::new();
        let temp_dir = tempfile::tempdir().unwrap();

        assert!(conn.path_exists(temp_dir.path()).await.unwrap());
        assert!(!conn
            .path_exists(&temp_dir.path().join("missing.xml"))
            .await
            .unwrap());
    }
}
