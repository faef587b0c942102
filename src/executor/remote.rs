//! Runs single execution units over pooled connections.

use dashmap::DashMap;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use super::{ExecutionResult, ExecutionUnit, UnitOperation, UnitStatus};
use crate::connection::{
    retry, CommandResult, Connection, ConnectionError, ConnectionResult, ConnectionType,
    Connector, ExecuteOptions, RetryPolicy, TransferOptions,
};
use crate::hadoop::apply_properties;
use crate::topology::{ControlOutcome, Host, ProcessControl, RoleController, RoleState};

type Slot = Arc<Mutex<Option<Arc<dyn Connection>>>>;

/// What an attempt produced before it is turned into an [`ExecutionResult`].
#[derive(Debug, Default)]
struct UnitOutput {
    status: Option<UnitStatus>,
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
    data: Option<Vec<u8>>,
}

impl UnitOutput {
    fn from_command(result: CommandResult) -> Self {
        Self {
            status: Some(if result.success {
                UnitStatus::Succeeded
            } else {
                UnitStatus::Failed
            }),
            exit_code: Some(result.exit_code),
            stdout: result.stdout,
            stderr: result.stderr,
            data: result.raw_stdout,
        }
    }

    fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(UnitStatus::Succeeded),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    fn unchanged(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(UnitStatus::AlreadyInState),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    fn failed(stderr: impl Into<String>) -> Self {
        Self {
            status: Some(UnitStatus::Failed),
            stderr: stderr.into(),
            ..Default::default()
        }
    }
}

/// Executes units on roles, keeping one connection per transport endpoint.
///
/// Transient transport failures are retried according to the retry policy,
/// after evicting the broken connection from the pool. The unit timeout
/// bounds all attempts together.
pub struct RemoteExecutor {
    connector: Arc<dyn Connector>,
    pool: DashMap<String, Slot>,
    policy: RetryPolicy,
    connect_timeout: Duration,
    controller: Option<Arc<dyn RoleController>>,
}

impl RemoteExecutor {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            pool: DashMap::new(),
            policy: Default::default(),
            connect_timeout: Duration::from_secs(30),
            controller: None,
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_controller(mut self, controller: Option<Arc<dyn RoleController>>) -> Self {
        self.controller = controller;
        self
    }

    /// Number of pooled connections.
    pub fn pooled(&self) -> usize {
        self.pool.len()
    }

    /// Run one unit. Never fails: errors become a `Failed` result.
    #[instrument(skip(self, unit), fields(role = %unit.role.name, unit = %unit.label))]
    pub async fn execute(&self, unit: &ExecutionUnit) -> ExecutionResult {
        let started = Instant::now();
        let attempts = retry(
            &self.policy,
            || self.attempt(unit),
            |_| self.evict(&unit.host.connection),
        );

        let output = match tokio::time::timeout(unit.timeout, attempts).await {
            Err(_) => {
                warn!(timeout = ?unit.timeout, "Unit timed out");
                UnitOutput::failed(format!("timed out after {}s", unit.timeout.as_secs()))
            }
            Ok(attempted) => match attempted.into_result() {
                Ok(output) => output,
                Err(e) => UnitOutput::failed(e.to_string()),
            },
        };

        let status = output.status.unwrap_or(UnitStatus::Failed);
        debug!(status = %status, elapsed = ?started.elapsed(), "Unit finished");

        ExecutionResult {
            role: unit.role.name.clone(),
            label: unit.label.clone(),
            status,
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
            data: output.data,
            duration: started.elapsed(),
        }
    }

    async fn attempt(&self, unit: &ExecutionUnit) -> ConnectionResult<UnitOutput> {
        let managed = matches!(unit.role.control, ProcessControl::Managed { .. });
        match &unit.operation {
            UnitOperation::Stop | UnitOperation::Start | UnitOperation::Status if managed => {
                return Ok(self.managed(unit).await);
            }
            _ => {}
        }

        let conn = self.connection(&unit.host).await?;
        match &unit.operation {
            UnitOperation::Command(command) => {
                let result = conn.execute(command, Some(ExecuteOptions::new())).await?;
                Ok(UnitOutput::from_command(result))
            }
            UnitOperation::Upload { local, remote_dir } => {
                let Some(name) = local.file_name() else {
                    return Ok(UnitOutput::failed(format!(
                        "{} has no file name",
                        local.display()
                    )));
                };
                let target = remote_dir.join(name);
                conn.upload(local, &target, Some(TransferOptions::new().with_create_dirs()))
                    .await?;
                Ok(UnitOutput::ok(target.display().to_string()))
            }
            UnitOperation::Fetch { path } => {
                if !conn.path_exists(path).await? {
                    return Ok(UnitOutput::failed(format!("{} does not exist", path.display())));
                }
                let content = conn.download_content(path).await?;
                Ok(UnitOutput {
                    data: Some(content),
                    ..UnitOutput::ok(path.display().to_string())
                })
            }
            UnitOperation::Write { path, content } => {
                conn.upload_content(content, path, Some(TransferOptions::new().with_create_dirs()))
                    .await?;
                Ok(UnitOutput::ok(format!("{} bytes", content.len())))
            }
            UnitOperation::Patch {
                path,
                patches,
                source,
            } => self.patch(conn.as_ref(), path, patches, source.as_deref()).await,
            UnitOperation::Stop | UnitOperation::Start | UnitOperation::Status => {
                self.daemon(conn.as_ref(), unit).await
            }
        }
    }

    async fn patch(
        &self,
        conn: &dyn Connection,
        path: &Path,
        patches: &[crate::hadoop::PropertyPatch],
        source: Option<&str>,
    ) -> ConnectionResult<UnitOutput> {
        let current;
        let base = match source {
            Some(doc) => doc,
            None => {
                if !conn.path_exists(path).await? {
                    return Ok(UnitOutput::failed(format!(
                        "{} does not exist",
                        path.display()
                    )));
                }
                current = String::from_utf8_lossy(&conn.download_content(path).await?).into_owned();
                current.as_str()
            }
        };

        let patched = match apply_properties(base, patches) {
            Ok(doc) => doc,
            Err(e) => return Ok(UnitOutput::failed(format!("{}: {}", path.display(), e))),
        };
        conn.upload_content(patched.as_bytes(), path, None).await?;
        Ok(UnitOutput::ok(format!(
            "set {} properties in {}",
            patches.len(),
            path.display()
        )))
    }

    async fn daemon(
        &self,
        conn: &dyn Connection,
        unit: &ExecutionUnit,
    ) -> ConnectionResult<UnitOutput> {
        let ProcessControl::Daemon {
            start,
            stop,
            status,
        } = &unit.role.control
        else {
            return Ok(UnitOutput::failed(format!(
                "role '{}' has no process to control",
                unit.role.name
            )));
        };

        match unit.operation {
            UnitOperation::Status => {
                let result = conn.execute(status, None).await?;
                let state = if result.success {
                    RoleState::Running
                } else {
                    RoleState::Stopped
                };
                Ok(UnitOutput {
                    exit_code: Some(result.exit_code),
                    ..UnitOutput::ok(state.as_str())
                })
            }
            UnitOperation::Stop => {
                let result = conn.execute(stop, None).await?;
                if result.success {
                    return Ok(UnitOutput::from_command(result));
                }
                // A failed stop of a daemon that is not running is a no-op.
                if !conn.execute(status, None).await?.success {
                    return Ok(UnitOutput::unchanged("not running"));
                }
                Ok(UnitOutput::from_command(result))
            }
            UnitOperation::Start => {
                let result = conn.execute(start, None).await?;
                if result.success {
                    return Ok(UnitOutput::from_command(result));
                }
                if conn.execute(status, None).await?.success {
                    return Ok(UnitOutput::unchanged("already running"));
                }
                Ok(UnitOutput::from_command(result))
            }
            _ => Ok(UnitOutput::failed("not a process control operation")),
        }
    }

    async fn managed(&self, unit: &ExecutionUnit) -> UnitOutput {
        let Some(controller) = &self.controller else {
            return UnitOutput::failed(format!(
                "role '{}' is managed but no controller is configured",
                unit.role.name
            ));
        };

        let outcome = match unit.operation {
            UnitOperation::Stop => controller.stop(&unit.role).await,
            UnitOperation::Start => controller.start(&unit.role).await,
            _ => {
                return match controller.state(&unit.role).await {
                    Ok(state) => UnitOutput::ok(state.as_str()),
                    Err(e) => UnitOutput::failed(e.to_string()),
                };
            }
        };

        match outcome {
            Ok(ControlOutcome::Done) => UnitOutput::ok(""),
            Ok(ControlOutcome::AlreadyInState) => UnitOutput::unchanged("already in requested state"),
            Err(e) => UnitOutput::failed(e.to_string()),
        }
    }

    /// Pooled connection for `host`, opening one if needed. Concurrent
    /// callers for the same endpoint share a single connect.
    async fn connection(&self, host: &Host) -> ConnectionResult<Arc<dyn Connection>> {
        let key = host.connection.pool_key();
        let slot = self.pool.entry(key.clone()).or_default().clone();
        let mut guard = slot.lock().await;

        if let Some(conn) = guard.as_ref() {
            if conn.is_alive().await {
                return Ok(conn.clone());
            }
            debug!(endpoint = %key, "Pooled connection is dead, reconnecting");
        }

        let conn = tokio::time::timeout(self.connect_timeout, self.connector.connect(&host.connection))
            .await
            .map_err(|_| ConnectionError::Timeout(self.connect_timeout.as_secs()))??;
        debug!(endpoint = %key, "Connected");
        *guard = Some(conn.clone());
        Ok(conn)
    }

    fn evict(&self, target: &ConnectionType) {
        if self.pool.remove(&target.pool_key()).is_some() {
            debug!(endpoint = %target, "Evicted connection after transient failure");
        }
    }

    /// Close and forget the pooled connections of `hosts`.
    pub async fn close_hosts(&self, hosts: &[Host]) {
        for host in hosts {
            if let Some((_, slot)) = self.pool.remove(&host.connection.pool_key()) {
                close_slot(&slot).await;
            }
        }
    }

    /// Close every pooled connection.
    pub async fn close_all(&self) {
        let slots: HashMap<String, Slot> = self
            .pool
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        self.pool.clear();
        for slot in slots.values() {
            close_slot(slot).await;
        }
    }
}

async fn close_slot(slot: &Slot) {
    if let Some(conn) = slot.lock().await.take() {
        if let Err(e) = conn.close().await {
            debug!(connection = conn.identifier(), error = %e, "Error while closing connection");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::LocalConnection;
    use crate::topology::{Role, RoleType};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Connector handing out local connections, failing the first `fail`
    /// connects with a transient error.
    struct FlakyConnector {
        fail: AtomicUsize,
        connects: AtomicUsize,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn connect(&self, _: &ConnectionType) -> ConnectionResult<Arc<dyn Connection>> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            if self
                .fail
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ConnectionError::ConnectionFailed("reset by peer".into()));
            }
            Ok(Arc::new(LocalConnection::new()))
        }
    }

    fn executor(fail: usize) -> (RemoteExecutor, Arc<FlakyConnector>) {
        let connector = Arc::new(FlakyConnector {
            fail: AtomicUsize::new(fail),
            connects: AtomicUsize::new(0),
        });
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(0.0);
        (
            RemoteExecutor::new(connector.clone()).with_retry_policy(policy),
            connector,
        )
    }

    fn unit(operation: UnitOperation, control: ProcessControl) -> ExecutionUnit {
        let role = Role {
            name: "datanode-1".into(),
            role_type: RoleType::DataNode,
            host: "local".into(),
            config_dir: PathBuf::from("/tmp"),
            log_file: "/tmp/dn.log".into(),
            artifact_dir: PathBuf::from("/tmp"),
            control,
        };
        let host = Host::new("local", ConnectionType::Local);
        ExecutionUnit::new(&role, &host, operation, Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_command_reuses_pooled_connection() {
        let (executor, connector) = executor(0);
        for _ in 0..3 {
            let result = executor
                .execute(&unit(UnitOperation::Command("true".into()), ProcessControl::None))
                .await;
            assert_eq!(result.status, UnitStatus::Succeeded);
        }
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        assert_eq!(executor.pooled(), 1);
    }

    #[tokio::test]
    async fn test_transient_connect_failure_is_retried_once() {
        let (executor, connector) = executor(1);
        let result = executor
            .execute(&unit(UnitOperation::Command("echo hi".into()), ProcessControl::None))
            .await;

        assert_eq!(result.status, UnitStatus::Succeeded);
        assert_eq!(result.stdout.trim(), "hi");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_persistent_failure_becomes_failed_result() {
        let (executor, _) = executor(5);
        let result = executor
            .execute(&unit(UnitOperation::Command("true".into()), ProcessControl::None))
            .await;
        assert_eq!(result.status, UnitStatus::Failed);
        assert!(result.stderr.contains("reset by peer"));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failed_not_retried() {
        let (executor, connector) = executor(0);
        let result = executor
            .execute(&unit(
                UnitOperation::Command("echo broken >&2; exit 3".into()),
                ProcessControl::None,
            ))
            .await;
        assert_eq!(result.status, UnitStatus::Failed);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.failure_detail(), "command: echo broken >&2; exit 3: broken");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unit_timeout() {
        let (executor, _) = executor(0);
        let mut slow = unit(UnitOperation::Command("sleep 5".into()), ProcessControl::None);
        slow.timeout = Duration::from_millis(100);

        let result = executor.execute(&slow).await;
        assert_eq!(result.status, UnitStatus::Failed);
        assert!(result.stderr.contains("timed out"));
    }

    #[tokio::test]
    async fn test_stop_of_stopped_daemon_is_already_in_state() {
        let (executor, _) = executor(0);
        let control = ProcessControl::Daemon {
            start: "true".into(),
            stop: "echo 'no datanode to stop' >&2; exit 1".into(),
            status: "exit 1".into(),
        };
        let result = executor.execute(&unit(UnitOperation::Stop, control)).await;
        assert_eq!(result.status, UnitStatus::AlreadyInState);
    }

    #[tokio::test]
    async fn test_status_reports_state() {
        let (executor, _) = executor(0);
        let control = ProcessControl::Daemon {
            start: "true".into(),
            stop: "true".into(),
            status: "exit 1".into(),
        };
        let result = executor.execute(&unit(UnitOperation::Status, control)).await;
        assert_eq!(result.status, UnitStatus::Succeeded);
        assert_eq!(result.stdout, "stopped");
    }

    #[tokio::test]
    async fn test_patch_of_missing_file_fails_without_retry() {
        let (executor, connector) = executor(0);
        let dir = tempfile::tempdir().unwrap();
        let result = executor
            .execute(&unit(
                UnitOperation::Patch {
                    path: dir.path().join("yarn-site.xml"),
                    patches: vec![crate::hadoop::PropertyPatch::new("a", "b")],
                    source: None,
                },
                ProcessControl::None,
            ))
            .await;

        assert_eq!(result.status, UnitStatus::Failed);
        assert!(result.stderr.contains("does not exist"));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_all_empties_pool() {
        let (executor, _) = executor(0);
        executor
            .execute(&unit(UnitOperation::Command("true".into()), ProcessControl::None))
            .await;
        executor.close_all().await;
        assert_eq!(executor.pooled(), 0);
    }
}
