//! Containers of a hadock compose project, reached through the docker CLI.
//!
//! Commands run with `docker exec`, files are copied in with `docker cp`
//! and read back with `docker exec cat`.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{
    shell_quote, CommandResult, Connection, ConnectionError, ConnectionResult, ExecuteOptions,
    TransferOptions,
};

/// Connection into one running container.
#[derive(Debug, Clone)]
pub struct DockerConnection {
    container: String,
    docker_path: String,
}

impl DockerConnection {
    pub fn new(container: impl Into<String>) -> Self {
        Self::with_docker_path(container, "docker")
    }

    pub fn with_docker_path(container: impl Into<String>, docker_path: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            docker_path: docker_path.into(),
        }
    }

    fn build_exec_command(&self, command: &str, options: &ExecuteOptions) -> Command {
        let mut cmd = Command::new(&self.docker_path);
        cmd.arg("exec").arg("-i");

        if let Some(cwd) = &options.cwd {
            cmd.arg("-w").arg(cwd);
        }
        for (key, value) in &options.env {
            cmd.arg("-e").arg(format!("{}={}", key, value));
        }

        cmd.arg(&self.container).arg("sh").arg("-c").arg(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// `docker inspect` the container's running flag.
    pub async fn is_container_running(&self) -> ConnectionResult<bool> {
        let output = Command::new(&self.docker_path)
            .arg("inspect")
            .arg("-f")
            .arg("{{.State.Running}}")
            .arg(&self.container)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ConnectionError::DockerError(format!("Failed to inspect container: {}", e))
            })?;

        Ok(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    async fn run_checked(&self, command: &str) -> ConnectionResult<()> {
        let result = self.execute(command, None).await?;
        if result.success {
            Ok(())
        } else {
            Err(ConnectionError::TransferFailed(format!(
                "'{}' failed in {}: {}",
                command,
                self.container,
                result.stderr.trim()
            )))
        }
    }
}

#[async_trait]
impl Connection for DockerConnection {
    fn identifier(&self) -> &str {
        &self.container
    }

    async fn is_alive(&self) -> bool {
        self.is_container_running().await.unwrap_or(false)
    }

    async fn execute(
        &self,
        command: &str,
        options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let options = options.unwrap_or_default();
        debug!(container = %self.container, command = %command, "Executing command in container");

        let child = self.build_exec_command(command, &options).spawn().map_err(|e| {
            ConnectionError::ExecutionFailed(format!("Failed to execute docker exec: {}", e))
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
        trace!(exit_code, container = %self.container, "docker exec completed");
        let result = CommandResult::from_output(exit_code, output.stdout, &output.stderr);

        // docker itself reports a vanished container with exit code 1 and this message
        if !result.success && result.stderr.contains("is not running") {
            return Err(ConnectionError::ConnectionClosed);
        }
        Ok(result)
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let options = options.unwrap_or_default();
        debug!(
            local = %local_path.display(),
            remote = %remote_path.display(),
            container = %self.container,
            "Copying file into container"
        );

        if options.create_dirs {
            if let Some(parent) = remote_path.parent() {
                let parent = parent.to_string_lossy();
                self.run_checked(&format!("mkdir -p {}", shell_quote(&parent)))
                    .await?;
            }
        }

        let output = Command::new(&self.docker_path)
            .arg("cp")
            .arg(local_path)
            .arg(format!("{}:{}", self.container, remote_path.display()))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ConnectionError::TransferFailed(format!("Failed to execute docker cp: {}", e))
            })?;

        if !output.status.success() {
            return Err(ConnectionError::TransferFailed(format!(
                "docker cp failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if let Some(mode) = options.mode {
            let target = remote_path.to_string_lossy();
            self.run_checked(&format!("chmod {:o} {}", mode, shell_quote(&target)))
                .await?;
        }
        Ok(())
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let staged = tempfile::NamedTempFile::new().map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to create temp file: {}", e))
        })?;
        tokio::fs::write(staged.path(), content).await.map_err(|e| {
            ConnectionError::TransferFailed(format!("Failed to write temp file: {}", e))
        })?;

        self.upload(staged.path(), remote_path, options).await
    }

    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        let output = Command::new(&self.docker_path)
            .arg("exec")
            .arg(&self.container)
            .arg("cat")
            .arg(remote_path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                ConnectionError::TransferFailed(format!("Failed to execute docker exec: {}", e))
            })?;

        if !output.status.success() {
            return Err(ConnectionError::TransferFailed(format!(
                "Failed to read {}:{}: {}",
                self.container,
                remote_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        let path = path.to_string_lossy();
        let result = self
            .execute(&format!("test -e {}", shell_quote(&path)), None)
            .await?;
        Ok(result.success)
    }

    async fn close(&self) -> ConnectionResult<()> {
        Ok(())
    }
}
