//! Topology of a local containerized cluster described by a docker compose
//! file.
//!
//! Each compose service running a Hadoop daemon becomes one host (its
//! container) with one role. The role type comes from the
//! `hades.role-type` label when present, otherwise from the service name.

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use super::{Host, ModuleGraph, ModuleSpec, ProcessControl, Role, RoleType, TopologyProvider};
use crate::config::HadockSettings;
use crate::connection::ConnectionType;
use crate::error::{Error, Result};
use crate::hadoop::builtin_modules;

/// Label overriding the inferred role type.
pub const ROLE_TYPE_LABEL: &str = "hades.role-type";

#[derive(Debug, Deserialize)]
struct ComposeFile {
    name: Option<String>,
    #[serde(default)]
    services: IndexMap<String, ComposeService>,
}

#[derive(Debug, Default, Deserialize)]
struct ComposeService {
    container_name: Option<String>,
    #[serde(default)]
    labels: Labels,
}

/// Compose accepts labels either as a map or as `KEY=VALUE` strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Labels {
    Map(HashMap<String, String>),
    List(Vec<String>),
}

impl Default for Labels {
    fn default() -> Self {
        Labels::Map(HashMap::new())
    }
}

impl Labels {
    fn get(&self, key: &str) -> Option<String> {
        match self {
            Labels::Map(map) => map.get(key).cloned(),
            Labels::List(items) => items.iter().find_map(|item| {
                let (k, v) = item.split_once('=')?;
                (k.trim() == key).then(|| v.trim().to_string())
            }),
        }
    }
}

/// Guess a role type from a compose service name like `datanode-2`.
pub fn infer_role_type(service: &str) -> Option<RoleType> {
    let name: String = service
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphabetic())
        .collect();

    let role_type = if name.contains("secondarynamenode") || name.contains("snn") {
        RoleType::SecondaryNameNode
    } else if name.contains("namenode") {
        RoleType::NameNode
    } else if name.contains("journalnode") {
        RoleType::JournalNode
    } else if name.contains("datanode") {
        RoleType::DataNode
    } else if name.contains("resourcemanager") {
        RoleType::ResourceManager
    } else if name.contains("nodemanager") {
        RoleType::NodeManager
    } else if name.contains("historyserver") || name.contains("jobhistory") {
        RoleType::JobHistoryServer
    } else if name.contains("gateway") || name.contains("client") || name.contains("edge") {
        RoleType::Gateway
    } else {
        return None;
    };
    Some(role_type)
}

/// Topology provider for hadock clusters.
#[derive(Debug, Clone)]
pub struct HadockProvider {
    settings: HadockSettings,
    modules: Vec<ModuleSpec>,
}

impl HadockProvider {
    pub fn new(settings: HadockSettings, modules: Vec<ModuleSpec>) -> Result<Self> {
        if settings.path.is_none() {
            return Err(Error::Config(
                "hadock.path is required for a hadock cluster".into(),
            ));
        }
        Ok(Self { settings, modules })
    }

    fn compose_path(&self) -> PathBuf {
        let root = self.settings.path.clone().unwrap_or_default();
        root.join(&self.settings.compose_file)
    }

    fn project_name(&self, compose: &ComposeFile) -> String {
        compose.name.clone().unwrap_or_else(|| {
            self.settings
                .path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_else(|| "hadock".to_string())
        })
    }

    async fn load(&self) -> Result<ComposeFile> {
        let path = self.compose_path();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            Error::topology(format!("cannot read {}: {}", path.display(), e))
        })?;
        serde_yaml::from_str(&content)
            .map_err(|e| Error::topology(format!("{}: {}", path.display(), e)))
    }

    /// Services running Hadoop daemons, with their container names.
    async fn services(&self) -> Result<Vec<(String, String, RoleType)>> {
        let compose = self.load().await?;
        let project = self.project_name(&compose);

        let mut services = Vec::new();
        for (name, service) in &compose.services {
            let role_type = match service.labels.get(ROLE_TYPE_LABEL) {
                Some(label) => Some(label.parse()?),
                None => infer_role_type(name),
            };
            let Some(role_type) = role_type else {
                debug!(service = %name, "Skipping service without a Hadoop role");
                continue;
            };
            let container = service
                .container_name
                .clone()
                .unwrap_or_else(|| format!("{}-{}-1", project, name));
            services.push((name.clone(), container, role_type));
        }
        Ok(services)
    }

    fn role_for(&self, service: &str, role_type: RoleType) -> Role {
        let home = &self.settings.hadoop_home;
        let control = match (role_type.component(), role_type.daemon_name()) {
            (Some(component), Some(daemon)) => {
                let bin = home.join("bin").join(component.command());
                let bin = bin.display();
                ProcessControl::Daemon {
                    start: format!("{} --daemon start {}", bin, daemon),
                    stop: format!("{} --daemon stop {}", bin, daemon),
                    status: format!("{} --daemon status {}", bin, daemon),
                }
            }
            _ => ProcessControl::None,
        };

        let log_file = match role_type.daemon_name() {
            Some(daemon) => format!("{}/logs/hadoop-*-{}-*.log", home.display(), daemon),
            None => format!("{}/logs/*.log", home.display()),
        };
        let share = role_type
            .component()
            .map(|c| c.share_dir())
            .unwrap_or("common");

        Role {
            name: service.to_string(),
            role_type,
            host: service.to_string(),
            config_dir: home.join("etc").join("hadoop"),
            log_file,
            artifact_dir: home.join("share").join("hadoop").join(share),
            control,
        }
    }
}

#[async_trait]
impl TopologyProvider for HadockProvider {
    fn name(&self) -> &str {
        "hadock"
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        Ok(self
            .services()
            .await?
            .into_iter()
            .map(|(service, container, _)| {
                Host::new(service, ConnectionType::Docker { container })
            })
            .collect())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        Ok(self
            .services()
            .await?
            .into_iter()
            .map(|(service, _, role_type)| self.role_for(&service, role_type))
            .collect())
    }

    async fn module_dependency_graph(&self) -> Result<ModuleGraph> {
        ModuleGraph::from_specs(builtin_modules().into_iter().chain(self.modules.clone()))
    }

    async fn resource_manager_url(&self) -> Result<Option<String>> {
        Ok(Some(self.settings.resource_manager_url.clone()))
    }

    fn examples_jar(&self) -> String {
        format!(
            "{}/share/hadoop/mapreduce/hadoop-mapreduce-examples-*.jar",
            self.settings.hadoop_home.display()
        )
    }
}
