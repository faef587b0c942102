//! Shared test utilities and fixtures for the hades test suite.
//!
//! This module provides:
//! - An in-memory [`MockConnection`] backed by a per-host [`MockHost`]
//! - A [`MockConnector`] handing those out by host name
//! - A fluent [`ClusterBuilder`] for topologies and orchestrators
//!
//! # Usage
//!
//! ```rust,ignore
//! mod common;
//! use common::*;
//! ```

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use hades::actions::ActionOrchestrator;
use hades::backup::ConfigBackupStore;
use hades::connection::{
    CommandResult, Connection, ConnectionError, ConnectionResult, ConnectionType, Connector,
    ExecuteOptions, RetryPolicy, TransferOptions,
};
use hades::executor::RemoteExecutor;
use hades::topology::{Host, ModuleGraph, ProcessControl, Role, RoleType, Topology};

// ============================================================================
// Mock host and connection
// ============================================================================

/// State of one fake machine, shared by every connection opened to it.
#[derive(Default)]
pub struct MockHost {
    commands: Mutex<Vec<String>>,
    files: Mutex<HashMap<PathBuf, Vec<u8>>>,
    /// Commands containing the key get the scripted result
    responses: Mutex<Vec<(String, CommandResult)>>,
    /// Commands containing the key fail at the transport level
    broken: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
    /// The next write to this path lands, then the connection drops
    drop_after_write: Mutex<Option<PathBuf>>,
    writes: Mutex<Vec<PathBuf>>,
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockHost {
    /// Script the result of commands containing `pattern`.
    pub fn respond(&self, pattern: impl Into<String>, result: CommandResult) {
        self.responses.lock().push((pattern.into(), result));
    }

    /// Make commands containing `pattern` exit 1 with `stderr`.
    pub fn fail(&self, pattern: impl Into<String>, stderr: impl Into<String>) {
        self.respond(pattern, CommandResult::failure(1, String::new(), stderr.into()));
    }

    /// Make commands containing `pattern` raise a transport error.
    pub fn break_on(&self, pattern: impl Into<String>) {
        self.broken.lock().push(pattern.into());
    }

    /// Let the next write to `path` land, then fail it at the transport level.
    pub fn drop_after_write(&self, path: impl Into<PathBuf>) {
        *self.drop_after_write.lock() = Some(path.into());
    }

    /// Paths written with `upload_content`, in order.
    pub fn writes(&self) -> Vec<PathBuf> {
        self.writes.lock().clone()
    }

    /// Delay every command by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, content: impl Into<Vec<u8>>) {
        self.files.lock().insert(path.into(), content.into());
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .get(path.as_ref())
            .map(|c| String::from_utf8_lossy(c).into_owned())
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// A connection to a [`MockHost`].
pub struct MockConnection {
    identifier: String,
    host: Arc<MockHost>,
    alive: AtomicBool,
}

impl MockConnection {
    pub fn new(identifier: impl Into<String>, host: Arc<MockHost>) -> Self {
        Self {
            identifier: identifier.into(),
            host,
            alive: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        command: &str,
        _options: Option<ExecuteOptions>,
    ) -> ConnectionResult<CommandResult> {
        let now = self.host.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.host.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.host.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.host.in_flight.fetch_sub(1, Ordering::SeqCst);

        self.host.commands.lock().push(command.to_string());
        if self.host.broken.lock().iter().any(|p| command.contains(p.as_str())) {
            return Err(ConnectionError::ConnectionClosed);
        }
        let responses = self.host.responses.lock();
        if let Some((_, result)) = responses.iter().find(|(p, _)| command.contains(p.as_str())) {
            return Ok(result.clone());
        }
        Ok(CommandResult::success(String::new(), String::new()))
    }

    async fn upload(
        &self,
        local_path: &Path,
        remote_path: &Path,
        _options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        let content = std::fs::read(local_path)?;
        self.host.add_file(remote_path, content);
        Ok(())
    }

    async fn upload_content(
        &self,
        content: &[u8],
        remote_path: &Path,
        _options: Option<TransferOptions>,
    ) -> ConnectionResult<()> {
        self.host.add_file(remote_path, content.to_vec());
        self.host.writes.lock().push(remote_path.to_path_buf());
        let mut drop_after = self.host.drop_after_write.lock();
        if drop_after.as_deref() == Some(remote_path) {
            *drop_after = None;
            return Err(ConnectionError::ConnectionClosed);
        }
        Ok(())
    }

    async fn download_content(&self, remote_path: &Path) -> ConnectionResult<Vec<u8>> {
        self.host
            .files
            .lock()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| {
                ConnectionError::TransferFailed(format!("{} not found", remote_path.display()))
            })
    }

    async fn path_exists(&self, path: &Path) -> ConnectionResult<bool> {
        Ok(self.host.files.lock().contains_key(path))
    }

    async fn close(&self) -> ConnectionResult<()> {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.host.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Hands out [`MockConnection`]s; docker containers map to hosts by name.
#[derive(Default)]
pub struct MockConnector {
    hosts: Mutex<HashMap<String, Arc<MockHost>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn host(&self, name: &str) -> Arc<MockHost> {
        Arc::clone(self.hosts.lock().entry(name.to_string()).or_default())
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, target: &ConnectionType) -> ConnectionResult<Arc<dyn Connection>> {
        let name = match target {
            ConnectionType::Docker { container } => container.clone(),
            ConnectionType::Ssh { host, .. } => host.clone(),
            ConnectionType::Local => "local".to_string(),
        };
        let host = self.host(&name);
        host.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection::new(name, host)))
    }
}

// ============================================================================
// Topology fixtures
// ============================================================================

/// A daemon role whose control commands are `start|stop|status <name>`.
pub fn daemon_role(name: &str, role_type: RoleType, host: &str) -> Role {
    Role {
        name: name.to_string(),
        role_type,
        host: host.to_string(),
        config_dir: PathBuf::from("/opt/hadoop/etc/hadoop"),
        log_file: format!("/opt/hadoop/logs/{}.log", name),
        artifact_dir: PathBuf::from("/opt/hadoop/share/hadoop"),
        control: ProcessControl::Daemon {
            start: format!("start {}", name),
            stop: format!("stop {}", name),
            status: format!("status {}", name),
        },
    }
}

/// Fluent builder for test clusters.
///
/// ```rust,ignore
/// let (orchestrator, connector) = ClusterBuilder::new()
///     .role("namenode", RoleType::NameNode, "nn")
///     .role("datanode-1", RoleType::DataNode, "dn1")
///     .build(backup_dir.path());
/// ```
pub struct ClusterBuilder {
    roles: Vec<Role>,
    modules: ModuleGraph,
    connection: fn(&str) -> ConnectionType,
    forks: usize,
}

impl Default for ClusterBuilder {
    fn default() -> Self {
        Self {
            roles: Vec::new(),
            modules: ModuleGraph::empty(),
            connection: |name| ConnectionType::Docker {
                container: name.to_string(),
            },
            forks: 5,
        }
    }
}

impl ClusterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// namenode, two datanodes, resourcemanager and two nodemanagers.
    pub fn hadoop() -> Self {
        Self::new()
            .role("namenode", RoleType::NameNode, "nn")
            .role("datanode-1", RoleType::DataNode, "dn1")
            .role("datanode-2", RoleType::DataNode, "dn2")
            .role("resourcemanager", RoleType::ResourceManager, "rm")
            .role("nodemanager-1", RoleType::NodeManager, "dn1")
            .role("nodemanager-2", RoleType::NodeManager, "dn2")
    }

    pub fn role(mut self, name: &str, role_type: RoleType, host: &str) -> Self {
        self.roles.push(daemon_role(name, role_type, host));
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }

    pub fn modules(mut self, modules: ModuleGraph) -> Self {
        self.modules = modules;
        self
    }

    /// Reach every host through the control node.
    pub fn local(mut self) -> Self {
        self.connection = |_| ConnectionType::Local;
        self
    }

    pub fn forks(mut self, forks: usize) -> Self {
        self.forks = forks;
        self
    }

    pub fn topology(&self) -> Topology {
        let mut hosts: Vec<Host> = Vec::new();
        for role in &self.roles {
            if !hosts.iter().any(|h| h.name == role.host) {
                hosts.push(Host::new(role.host.clone(), (self.connection)(&role.host)));
            }
        }
        Topology::new(hosts, self.roles.clone(), self.modules.clone()).unwrap()
    }

    /// Orchestrator over mock connections.
    pub fn build(self, backup_dir: &Path) -> (ActionOrchestrator, Arc<MockConnector>) {
        let connector = MockConnector::new();
        let orchestrator = self.build_with(connector.clone(), backup_dir);
        (orchestrator, connector)
    }

    /// Orchestrator over an arbitrary connector.
    pub fn build_with(self, connector: Arc<dyn Connector>, backup_dir: &Path) -> ActionOrchestrator {
        let topology = Arc::new(self.topology());
        let executor = Arc::new(
            RemoteExecutor::new(connector).with_retry_policy(RetryPolicy::no_retry()),
        );
        let backups = Arc::new(ConfigBackupStore::new(backup_dir, executor.clone()));
        ActionOrchestrator::new(topology, executor, backups).with_parallelism(self.forks)
    }
}

/// A minimal `*-site.xml` document holding `properties`.
pub fn site_xml(properties: &[(&str, &str)]) -> String {
    let mut doc = String::from("<?xml version=\"1.0\"?>\n<configuration>\n");
    for (name, value) in properties {
        doc.push_str(&format!(
            "  <property>\n    <name>{}</name>\n    <value>{}</value>\n  </property>\n",
            name, value
        ));
    }
    doc.push_str("</configuration>\n");
    doc
}
