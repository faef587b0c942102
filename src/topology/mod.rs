//! Cluster topology: hosts, the roles running on them, and the module
//! dependency graph.
//!
//! A [`TopologyProvider`] knows how to query one kind of cluster. Actions
//! never talk to a provider directly; they work on a [`Topology`] snapshot
//! taken once per invocation.

pub mod cloudera;
pub mod graph;
pub mod hadock;

pub use cloudera::ClouderaProvider;
pub use graph::{Module, ModuleGraph, ModuleSpec};
pub use hadock::HadockProvider;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::Config;
use crate::connection::ConnectionType;
use crate::error::{Error, Result};

/// Kind of cluster hades operates on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum ClusterType {
    /// Containerized cluster run with docker compose
    #[default]
    Hadock,
    /// Cluster managed by Cloudera Manager
    Cloudera,
}

impl fmt::Display for ClusterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterType::Hadock => f.write_str("hadock"),
            ClusterType::Cloudera => f.write_str("cloudera"),
        }
    }
}

/// A machine (or container) reachable through one transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    pub connection: ConnectionType,
}

impl Host {
    pub fn new(name: impl Into<String>, connection: ConnectionType) -> Self {
        Self {
            name: name.into(),
            connection,
        }
    }
}

/// Hadoop daemon kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RoleType {
    NameNode,
    SecondaryNameNode,
    JournalNode,
    DataNode,
    ResourceManager,
    NodeManager,
    JobHistoryServer,
    /// Client-only role with no daemon
    Gateway,
    Other(String),
}

impl RoleType {
    /// Name of the daemon as passed to `hdfs|yarn|mapred --daemon`.
    pub fn daemon_name(&self) -> Option<&str> {
        match self {
            RoleType::NameNode => Some("namenode"),
            RoleType::SecondaryNameNode => Some("secondarynamenode"),
            RoleType::JournalNode => Some("journalnode"),
            RoleType::DataNode => Some("datanode"),
            RoleType::ResourceManager => Some("resourcemanager"),
            RoleType::NodeManager => Some("nodemanager"),
            RoleType::JobHistoryServer => Some("historyserver"),
            RoleType::Gateway | RoleType::Other(_) => None,
        }
    }

    /// The Hadoop component the daemon belongs to.
    pub fn component(&self) -> Option<Component> {
        match self {
            RoleType::NameNode
            | RoleType::SecondaryNameNode
            | RoleType::JournalNode
            | RoleType::DataNode => Some(Component::Hdfs),
            RoleType::ResourceManager | RoleType::NodeManager => Some(Component::Yarn),
            RoleType::JobHistoryServer => Some(Component::MapReduce),
            RoleType::Gateway | RoleType::Other(_) => None,
        }
    }

    /// Role type name as used by the Cloudera Manager API.
    pub fn cloudera_name(&self) -> String {
        match self {
            RoleType::JobHistoryServer => "JOBHISTORY".to_string(),
            other => other.to_string().to_uppercase(),
        }
    }
}

impl fmt::Display for RoleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleType::Gateway => f.write_str("gateway"),
            RoleType::JobHistoryServer => f.write_str("jobhistory"),
            RoleType::Other(name) => f.write_str(name),
            known => f.write_str(known.daemon_name().unwrap_or_default()),
        }
    }
}

impl FromStr for RoleType {
    type Err = Error;

    /// Case-insensitive; dashes and underscores are ignored, so `NAMENODE`,
    /// `name-node` and `namenode` are the same type.
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_lowercase();

        let role_type = match normalized.as_str() {
            "" => return Err(Error::validation("role type must not be empty")),
            "namenode" => RoleType::NameNode,
            "secondarynamenode" => RoleType::SecondaryNameNode,
            "journalnode" => RoleType::JournalNode,
            "datanode" => RoleType::DataNode,
            "resourcemanager" => RoleType::ResourceManager,
            "nodemanager" => RoleType::NodeManager,
            "jobhistory" | "historyserver" | "jobhistoryserver" => RoleType::JobHistoryServer,
            "gateway" => RoleType::Gateway,
            _ => RoleType::Other(normalized),
        };
        Ok(role_type)
    }
}

impl TryFrom<String> for RoleType {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<RoleType> for String {
    fn from(value: RoleType) -> Self {
        value.to_string()
    }
}

/// Hadoop component, used for command names and library directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Hdfs,
    Yarn,
    MapReduce,
}

impl Component {
    /// Command line entry point (`bin/hdfs`, `bin/yarn`, `bin/mapred`).
    pub fn command(&self) -> &'static str {
        match self {
            Component::Hdfs => "hdfs",
            Component::Yarn => "yarn",
            Component::MapReduce => "mapred",
        }
    }

    /// Directory under `share/hadoop` holding the component's jars.
    pub fn share_dir(&self) -> &'static str {
        match self {
            Component::Hdfs => "hdfs",
            Component::Yarn => "yarn",
            Component::MapReduce => "mapreduce",
        }
    }
}

/// How a role's process is stopped, started and queried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessControl {
    /// Shell commands run on the role's host; `status` exits 0 while running.
    Daemon {
        start: String,
        stop: String,
        status: String,
    },
    /// Delegated to the cluster manager through a [`RoleController`].
    Managed { service: String },
    /// Nothing to control (client roles).
    None,
}

/// A Hadoop daemon instance bound to exactly one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique name within the cluster
    pub name: String,
    pub role_type: RoleType,
    /// Name of the host the role runs on
    pub host: String,
    /// Directory holding the role's `*-site.xml` files
    pub config_dir: PathBuf,
    /// Log file; may contain shell glob characters
    pub log_file: String,
    /// Where distributed files and deployed artifacts land
    pub artifact_dir: PathBuf,
    pub control: ProcessControl,
}

impl Role {
    /// Path of a config file in the role's config directory.
    pub fn config_path(&self, file_name: &str) -> PathBuf {
        self.config_dir.join(file_name)
    }
}

/// Observed state of a role process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleState {
    Running,
    Stopped,
    Unknown(String),
}

impl RoleState {
    pub fn as_str(&self) -> &str {
        match self {
            RoleState::Running => "running",
            RoleState::Stopped => "stopped",
            RoleState::Unknown(state) => state,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "running" | "started" => RoleState::Running,
            "stopped" => RoleState::Stopped,
            other => RoleState::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for RoleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a managed stop or start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOutcome {
    Done,
    /// The role was already in the requested state
    AlreadyInState,
}

/// Process control delegated to a cluster manager.
#[async_trait]
pub trait RoleController: Send + Sync {
    async fn stop(&self, role: &Role) -> Result<ControlOutcome>;
    async fn start(&self, role: &Role) -> Result<ControlOutcome>;
    async fn state(&self, role: &Role) -> Result<RoleState>;
}

/// Source of hosts, roles and modules for one kind of cluster.
#[async_trait]
pub trait TopologyProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    async fn list_hosts(&self) -> Result<Vec<Host>>;

    /// Roles in declaration order.
    async fn list_roles(&self) -> Result<Vec<Role>>;

    async fn module_dependency_graph(&self) -> Result<ModuleGraph>;

    /// Base URL of the YARN ResourceManager web service.
    async fn resource_manager_url(&self) -> Result<Option<String>> {
        Ok(None)
    }

    /// Location of the MapReduce examples jar on cluster hosts.
    fn examples_jar(&self) -> String;

    /// Controller for roles with [`ProcessControl::Managed`].
    fn role_controller(&self) -> Option<Arc<dyn RoleController>> {
        None
    }
}

/// Immutable view of the cluster used for one invocation.
#[derive(Debug, Clone)]
pub struct Topology {
    hosts: IndexMap<String, Host>,
    roles: Vec<Role>,
    modules: ModuleGraph,
    resource_manager_url: Option<String>,
    examples_jar: String,
}

impl Topology {
    /// Build a topology, checking that role names are unique and every role
    /// refers to a known host.
    pub fn new(hosts: Vec<Host>, roles: Vec<Role>, modules: ModuleGraph) -> Result<Self> {
        let hosts: IndexMap<String, Host> =
            hosts.into_iter().map(|h| (h.name.clone(), h)).collect();

        let mut seen = HashSet::new();
        for role in &roles {
            if !seen.insert(role.name.to_lowercase()) {
                return Err(Error::topology(format!("duplicate role name '{}'", role.name)));
            }
            if !hosts.contains_key(&role.host) {
                return Err(Error::topology(format!(
                    "role '{}' refers to unknown host '{}'",
                    role.name, role.host
                )));
            }
        }

        Ok(Self {
            hosts,
            roles,
            modules,
            resource_manager_url: None,
            examples_jar: String::new(),
        })
    }

    pub fn with_resource_manager_url(mut self, url: Option<String>) -> Self {
        self.resource_manager_url = url;
        self
    }

    pub fn with_examples_jar(mut self, jar: impl Into<String>) -> Self {
        self.examples_jar = jar.into();
        self
    }

    /// Query a provider once.
    pub async fn snapshot(provider: &dyn TopologyProvider) -> Result<Self> {
        let hosts = provider.list_hosts().await?;
        let roles = provider.list_roles().await?;
        let modules = provider.module_dependency_graph().await?;
        let rm_url = provider.resource_manager_url().await?;

        tracing::debug!(
            provider = provider.name(),
            hosts = hosts.len(),
            roles = roles.len(),
            "Topology loaded"
        );

        Ok(Self::new(hosts, roles, modules)?
            .with_resource_manager_url(rm_url)
            .with_examples_jar(provider.examples_jar()))
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn host(&self, name: &str) -> Option<&Host> {
        self.hosts.get(name)
    }

    /// Host a role runs on. Roles are validated on construction.
    pub fn host_of(&self, role: &Role) -> Result<&Host> {
        self.hosts
            .get(&role.host)
            .ok_or_else(|| Error::topology(format!("unknown host '{}'", role.host)))
    }

    pub fn modules(&self) -> &ModuleGraph {
        &self.modules
    }

    pub fn resource_manager_url(&self) -> Option<&str> {
        self.resource_manager_url.as_deref()
    }

    pub fn examples_jar(&self) -> &str {
        &self.examples_jar
    }

    /// First role of the given type, in declaration order.
    pub fn first_of_type(&self, role_type: &RoleType) -> Option<&Role> {
        self.roles.iter().find(|r| &r.role_type == role_type)
    }
}

/// Provider for the configured cluster type.
pub fn provider_from_config(config: &Config) -> Result<Box<dyn TopologyProvider>> {
    let modules = config.modules.clone();
    match config.cluster_type {
        ClusterType::Hadock => Ok(Box::new(HadockProvider::new(
            config.hadock.clone(),
            modules,
        )?)),
        ClusterType::Cloudera => Ok(Box::new(ClouderaProvider::new(
            config.cloudera.clone(),
            config.ssh.clone(),
            modules,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(name: &str, host: &str) -> Role {
        Role {
            name: name.into(),
            role_type: RoleType::DataNode,
            host: host.into(),
            config_dir: PathBuf::from("/etc/hadoop"),
            log_file: "/var/log/dn.log".into(),
            artifact_dir: PathBuf::from("/opt/hadoop/share/hadoop/hdfs"),
            control: ProcessControl::None,
        }
    }

    #[test]
    fn test_role_type_parsing_is_lenient() {
        assert_eq!("NAMENODE".parse::<RoleType>().unwrap(), RoleType::NameNode);
        assert_eq!("name-node".parse::<RoleType>().unwrap(), RoleType::NameNode);
        assert_eq!(
            "JOBHISTORY".parse::<RoleType>().unwrap(),
            RoleType::JobHistoryServer
        );
        assert_eq!(
            "Spark_Gateway".parse::<RoleType>().unwrap(),
            RoleType::Other("sparkgateway".into())
        );
        assert!("  ".parse::<RoleType>().is_err());
    }

    #[test]
    fn test_role_type_names() {
        assert_eq!(RoleType::NodeManager.to_string(), "nodemanager");
        assert_eq!(RoleType::JobHistoryServer.cloudera_name(), "JOBHISTORY");
        assert_eq!(RoleType::DataNode.cloudera_name(), "DATANODE");
        assert_eq!(RoleType::JobHistoryServer.daemon_name(), Some("historyserver"));
        assert_eq!(
            RoleType::ResourceManager.component().map(|c| c.command()),
            Some("yarn")
        );
    }

    #[test]
    fn test_topology_rejects_unknown_host() {
        let hosts = vec![Host::new("dn1", ConnectionType::Local)];
        let err = Topology::new(hosts, vec![role("datanode-1", "dn2")], ModuleGraph::empty())
            .unwrap_err();
        assert!(err.to_string().contains("unknown host 'dn2'"));
    }

    #[test]
    fn test_topology_rejects_duplicate_roles() {
        let hosts = vec![Host::new("dn1", ConnectionType::Local)];
        let roles = vec![role("datanode", "dn1"), role("DataNode", "dn1")];
        assert!(Topology::new(hosts, roles, ModuleGraph::empty()).is_err());
    }

    #[test]
    fn test_role_state_parse() {
        assert_eq!(RoleState::parse("STARTED"), RoleState::Running);
        assert_eq!(RoleState::parse("stopped\n"), RoleState::Stopped);
        assert_eq!(
            RoleState::parse("BUSY"),
            RoleState::Unknown("busy".into())
        );
    }
}
