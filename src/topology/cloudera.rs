//! Topology of a cluster managed by Cloudera Manager, read from its REST
//! API. Role processes are controlled through the same API.

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{
    ControlOutcome, Host, ModuleGraph, ModuleSpec, ProcessControl, Role, RoleController,
    RoleState, RoleType, TopologyProvider,
};
use crate::config::{ClouderaSettings, SshSettings};
use crate::connection::ConnectionType;
use crate::error::{Error, Result};
use crate::hadoop::builtin_modules;

/// Service types whose roles hades manages.
const MANAGED_SERVICE_TYPES: &[&str] = &["HDFS", "YARN"];

const COMMAND_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct ApiList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct ApiCluster {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiHost {
    host_id: String,
    hostname: String,
}

#[derive(Debug, Deserialize)]
struct ApiService {
    name: String,
    #[serde(rename = "type")]
    service_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiHostRef {
    host_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRole {
    name: String,
    #[serde(rename = "type")]
    role_type: String,
    host_ref: ApiHostRef,
    role_state: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiCommand {
    id: i64,
    #[serde(default)]
    active: bool,
    success: Option<bool>,
    result_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiBulkCommand {
    #[serde(default = "Vec::new")]
    items: Vec<ApiCommand>,
    #[serde(default = "Vec::new")]
    errors: Vec<String>,
}

/// Thin client over the parts of the Cloudera Manager API hades uses.
#[derive(Debug)]
struct ClouderaApi {
    client: Client,
    base_url: String,
    username: String,
    password: String,
    cluster: OnceCell<String>,
    configured_cluster: Option<String>,
}

impl ClouderaApi {
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(method = %method, url = %url, "Cloudera Manager request");

        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&self.username, Some(&self.password));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;

        match response.status() {
            status if status.is_success() => Ok(response.json().await?),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::topology(format!(
                "Cloudera Manager rejected the credentials for {}",
                self.username
            ))),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(Error::topology(format!(
                    "Cloudera Manager returned {} for {}: {}",
                    status,
                    path,
                    text.trim()
                )))
            }
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(Method::GET, path, None).await
    }

    async fn cluster(&self) -> Result<&str> {
        let name = self
            .cluster
            .get_or_try_init(|| async {
                let clusters: ApiList<ApiCluster> = self.get("/clusters").await?;
                match &self.configured_cluster {
                    Some(wanted) => clusters
                        .items
                        .into_iter()
                        .find(|c| &c.name == wanted)
                        .map(|c| c.name)
                        .ok_or_else(|| {
                            Error::topology(format!("cluster '{}' not found", wanted))
                        }),
                    None => clusters
                        .items
                        .into_iter()
                        .next()
                        .map(|c| c.name)
                        .ok_or_else(|| Error::topology("Cloudera Manager has no clusters")),
                }
            })
            .await?;
        Ok(name.as_str())
    }

    async fn hosts(&self) -> Result<Vec<ApiHost>> {
        let hosts: ApiList<ApiHost> = self.get("/hosts").await?;
        Ok(hosts.items)
    }

    async fn services(&self) -> Result<Vec<ApiService>> {
        let cluster = self.cluster().await?;
        let services: ApiList<ApiService> =
            self.get(&format!("/clusters/{}/services", cluster)).await?;
        Ok(services
            .items
            .into_iter()
            .filter(|s| MANAGED_SERVICE_TYPES.contains(&s.service_type.as_str()))
            .collect())
    }

    async fn roles(&self, service: &str) -> Result<Vec<ApiRole>> {
        let cluster = self.cluster().await?;
        let roles: ApiList<ApiRole> = self
            .get(&format!("/clusters/{}/services/{}/roles", cluster, service))
            .await?;
        Ok(roles.items)
    }

    async fn role(&self, service: &str, role: &str) -> Result<ApiRole> {
        let cluster = self.cluster().await?;
        self.get(&format!(
            "/clusters/{}/services/{}/roles/{}",
            cluster, service, role
        ))
        .await
    }

    async fn role_command(&self, service: &str, role: &str, command: &str) -> Result<ApiCommand> {
        let cluster = self.cluster().await?;
        let path = format!(
            "/clusters/{}/services/{}/roleCommands/{}",
            cluster, service, command
        );
        let bulk: ApiBulkCommand = self
            .request(Method::POST, &path, Some(json!({ "items": [role] })))
            .await?;
        if !bulk.errors.is_empty() {
            return Err(Error::topology(bulk.errors.join("; ")));
        }
        bulk.items
            .into_iter()
            .next()
            .ok_or_else(|| Error::topology(format!("{} of {} returned no command", command, role)))
    }

    /// Poll a command until it is no longer active.
    async fn wait(&self, mut command: ApiCommand, poll: Duration) -> Result<ApiCommand> {
        while command.active {
            tokio::time::sleep(poll).await;
            command = self.get(&format!("/commands/{}", command.id)).await?;
        }
        Ok(command)
    }
}

/// Topology provider and role controller for Cloudera Manager clusters.
#[derive(Debug, Clone)]
pub struct ClouderaProvider {
    api: Arc<ClouderaApi>,
    settings: ClouderaSettings,
    ssh: SshSettings,
    modules: Vec<ModuleSpec>,
    poll_interval: Duration,
}

impl ClouderaProvider {
    pub fn new(
        settings: ClouderaSettings,
        ssh: SshSettings,
        modules: Vec<ModuleSpec>,
    ) -> Result<Self> {
        let host = settings.host.clone().ok_or_else(|| {
            Error::Config("cloudera.host is required for a Cloudera cluster".into())
        })?;
        let scheme = if settings.use_tls { "https" } else { "http" };
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}/api/{}", host.trim_end_matches('/'), settings.api_version)
        } else {
            format!(
                "{}://{}:{}/api/{}",
                scheme, host, settings.port, settings.api_version
            )
        };
        Self::with_base_url(settings, ssh, modules, base_url)
    }

    /// Use an explicit API base URL such as `http://cm:7180/api/v19`.
    pub fn with_base_url(
        settings: ClouderaSettings,
        ssh: SshSettings,
        modules: Vec<ModuleSpec>,
        base_url: String,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(format!("hades/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        let api = ClouderaApi {
            client,
            base_url,
            username: settings.username.clone(),
            password: settings.password.clone(),
            cluster: OnceCell::new(),
            configured_cluster: settings.cluster.clone(),
        };
        Ok(Self {
            api: Arc::new(api),
            settings,
            ssh,
            modules,
            poll_interval: COMMAND_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn log_dir(role_type: &RoleType) -> &'static str {
        match role_type.component() {
            Some(super::Component::Yarn) => "/var/log/hadoop-yarn",
            Some(super::Component::MapReduce) => "/var/log/hadoop-mapreduce",
            _ => "/var/log/hadoop-hdfs",
        }
    }

    fn role_for(&self, api_role: ApiRole, service: &str, hostname: &str) -> Role {
        let role_type: RoleType = api_role
            .role_type
            .parse()
            .unwrap_or_else(|_| RoleType::Other(api_role.role_type.to_lowercase()));
        let log_file = format!(
            "{}/hadoop-cmf-{}-{}-{}.log.out",
            Self::log_dir(&role_type),
            service,
            api_role.role_type,
            hostname
        );

        Role {
            name: api_role.name,
            role_type,
            host: hostname.to_string(),
            config_dir: self.settings.conf_dir.clone(),
            log_file,
            artifact_dir: self.settings.artifact_dir.clone(),
            control: ProcessControl::Managed {
                service: service.to_string(),
            },
        }
    }

    async fn host_names(&self) -> Result<HashMap<String, String>> {
        Ok(self
            .api
            .hosts()
            .await?
            .into_iter()
            .map(|h| (h.host_id, h.hostname))
            .collect())
    }

    fn managed_service(role: &Role) -> Result<&str> {
        match &role.control {
            ProcessControl::Managed { service } => Ok(service),
            _ => Err(Error::validation(format!(
                "role '{}' is not managed by Cloudera Manager",
                role.name
            ))),
        }
    }

    async fn run_role_command(&self, role: &Role, command: &str) -> Result<ControlOutcome> {
        let service = Self::managed_service(role)?;
        let started = self.api.role_command(service, &role.name, command).await?;
        info!(role = %role.name, command, id = started.id, "Cloudera Manager command issued");

        let finished = self.api.wait(started, self.poll_interval).await?;
        if finished.success == Some(true) {
            Ok(ControlOutcome::Done)
        } else {
            Err(Error::topology(format!(
                "{} of {} failed: {}",
                command,
                role.name,
                finished.result_message.unwrap_or_default()
            )))
        }
    }
}

#[async_trait]
impl TopologyProvider for ClouderaProvider {
    fn name(&self) -> &str {
        "cloudera"
    }

    async fn list_hosts(&self) -> Result<Vec<Host>> {
        Ok(self
            .api
            .hosts()
            .await?
            .into_iter()
            .map(|h| {
                let connection = ConnectionType::Ssh {
                    host: h.hostname.clone(),
                    port: self.ssh.port,
                    user: self.ssh.user.clone(),
                };
                Host::new(h.hostname, connection)
            })
            .collect())
    }

    async fn list_roles(&self) -> Result<Vec<Role>> {
        let hosts = self.host_names().await?;
        let mut roles = Vec::new();
        for service in self.api.services().await? {
            for api_role in self.api.roles(&service.name).await? {
                let hostname = hosts.get(&api_role.host_ref.host_id).cloned().ok_or_else(|| {
                    Error::topology(format!(
                        "role '{}' runs on unknown host id {}",
                        api_role.name, api_role.host_ref.host_id
                    ))
                })?;
                roles.push(self.role_for(api_role, &service.name, &hostname));
            }
        }
        Ok(roles)
    }

    async fn module_dependency_graph(&self) -> Result<ModuleGraph> {
        ModuleGraph::from_specs(builtin_modules().into_iter().chain(self.modules.clone()))
    }

    async fn resource_manager_url(&self) -> Result<Option<String>> {
        let roles = self.list_roles().await?;
        Ok(roles
            .iter()
            .find(|r| r.role_type == RoleType::ResourceManager)
            .map(|r| format!("http://{}:8088", r.host)))
    }

    fn examples_jar(&self) -> String {
        format!(
            "{}/hadoop-mapreduce-examples-*.jar",
            self.settings.artifact_dir.display()
        )
    }

    fn role_controller(&self) -> Option<Arc<dyn RoleController>> {
        Some(Arc::new(self.clone()))
    }
}

#[async_trait]
impl RoleController for ClouderaProvider {
    async fn stop(&self, role: &Role) -> Result<ControlOutcome> {
        if self.state(role).await? == RoleState::Stopped {
            return Ok(ControlOutcome::AlreadyInState);
        }
        self.run_role_command(role, "stop").await
    }

    async fn start(&self, role: &Role) -> Result<ControlOutcome> {
        if self.state(role).await? == RoleState::Running {
            return Ok(ControlOutcome::AlreadyInState);
        }
        self.run_role_command(role, "start").await
    }

    async fn state(&self, role: &Role) -> Result<RoleState> {
        let service = Self::managed_service(role)?;
        let api_role = self.api.role(service, &role.name).await?;
        Ok(RoleState::parse(api_role.role_state.as_deref().unwrap_or("unknown")))
    }
}
