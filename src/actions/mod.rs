//! Cluster actions.
//!
//! [`ActionOrchestrator`] turns a user request into execution units,
//! resolves the roles it applies to and hands the work to the
//! coordinator. Fan-out actions gather every per-role failure into one
//! [`Error::RemoteExecution`]; compile stops at the first failed module.

pub mod compile;
mod config_update;
mod status;

pub use compile::{
    fingerprint, CompileReport, CompileRequest, FingerprintStore, MavenBuilder, ModuleBuilder,
};
pub use config_update::ConfigUpdate;
pub use status::{RoleStatus, StatusReport};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use crate::backup::ConfigBackupStore;
use crate::config::{BuildSettings, Config};
use crate::error::{Error, Result};
use crate::executor::{
    collect_failures, ExecutionCoordinator, ExecutionResult, ExecutionUnit, RemoteExecutor,
    RoleOutcome, UnitOperation,
};
use crate::hadoop::Application;
use crate::selector;
use crate::topology::{Host, Role, Topology};

/// A request the orchestrator can run.
#[derive(Debug, Clone)]
pub enum Action {
    Restart {
        selector: String,
    },
    Distribute {
        selector: String,
        files: Vec<PathBuf>,
    },
    UpdateConfig(ConfigUpdate),
    Command {
        selector: String,
        command: String,
    },
    RunApp {
        app: Application,
        cmd: Option<String>,
        queue: Option<String>,
    },
    Compile(CompileRequest),
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Restart { .. } => "restart",
            Action::Distribute { .. } => "distribute",
            Action::UpdateConfig(_) => "update-config",
            Action::Command { .. } => "command",
            Action::RunApp { .. } => "run-app",
            Action::Compile(_) => "compile",
        }
    }
}

/// What a successful [`Action`] produced.
#[derive(Debug, Clone)]
pub enum ActionReport {
    Roles(Vec<RoleOutcome>),
    App(ExecutionResult),
    Compile(CompileReport),
}

/// Runs cluster actions against one topology snapshot.
pub struct ActionOrchestrator {
    topology: Arc<Topology>,
    executor: Arc<RemoteExecutor>,
    coordinator: ExecutionCoordinator,
    backups: Arc<ConfigBackupStore>,
    command_timeout: Duration,
    app_timeout: Duration,
    build: BuildSettings,
    default_modules: Vec<String>,
    builder: Option<Arc<dyn ModuleBuilder>>,
}

impl ActionOrchestrator {
    pub fn new(
        topology: Arc<Topology>,
        executor: Arc<RemoteExecutor>,
        backups: Arc<ConfigBackupStore>,
    ) -> Self {
        Self {
            topology,
            executor,
            coordinator: ExecutionCoordinator::default(),
            backups,
            command_timeout: Duration::from_secs(120),
            app_timeout: Duration::from_secs(1800),
            build: BuildSettings::default(),
            default_modules: Vec::new(),
            builder: None,
        }
    }

    /// Take parallelism, timeouts and build settings from `config`.
    pub fn with_config(mut self, config: &Config) -> Self {
        self.coordinator = ExecutionCoordinator::new(config.execution.forks);
        self.command_timeout = config.execution.command_timeout;
        self.app_timeout = config.execution.app_timeout;
        self.build = config.build.clone();
        self.default_modules = config.default_modules.clone();
        self
    }

    pub fn with_parallelism(mut self, max: usize) -> Self {
        self.coordinator = ExecutionCoordinator::new(max);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_build(mut self, build: BuildSettings, default_modules: Vec<String>) -> Self {
        self.build = build;
        self.default_modules = default_modules;
        self
    }

    /// Replace the maven builder.
    pub fn with_builder(mut self, builder: Arc<dyn ModuleBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn executor(&self) -> &Arc<RemoteExecutor> {
        &self.executor
    }

    pub fn backups(&self) -> &Arc<ConfigBackupStore> {
        &self.backups
    }

    /// Run any action.
    pub async fn run(&self, action: Action) -> Result<ActionReport> {
        info!(action = action.name(), "Running action");
        match action {
            Action::Restart { selector } => self.restart(&selector).await.map(ActionReport::Roles),
            Action::Distribute { selector, files } => self
                .distribute(&selector, &files)
                .await
                .map(ActionReport::Roles),
            Action::UpdateConfig(update) => {
                self.update_config(update).await.map(ActionReport::Roles)
            }
            Action::Command { selector, command } => self
                .run_command(&selector, &command)
                .await
                .map(ActionReport::Roles),
            Action::RunApp { app, cmd, queue } => self
                .run_app(app, cmd.as_deref(), queue.as_deref())
                .await
                .map(ActionReport::App),
            Action::Compile(request) => self.compile(request).await.map(ActionReport::Compile),
        }
    }

    /// Stop then start every selected role. A role is started only when it
    /// stopped or was not running.
    #[instrument(skip(self))]
    pub async fn restart(&self, selector: &str) -> Result<Vec<RoleOutcome>> {
        let roles = selector::resolve(selector, &self.topology)?;
        let timeout = self.command_timeout;
        let outcomes = self
            .fan_out(&roles, move |role, host| {
                vec![
                    ExecutionUnit::new(role, host, UnitOperation::Stop, timeout),
                    ExecutionUnit::new(role, host, UnitOperation::Start, timeout),
                ]
            })
            .await?;
        finish("restart", outcomes)
    }

    /// Upload local files into each selected role's artifact directory.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn distribute(&self, selector: &str, files: &[PathBuf]) -> Result<Vec<RoleOutcome>> {
        if files.is_empty() {
            return Err(Error::validation("no files to distribute"));
        }
        if let Some(missing) = files.iter().find(|f| !f.is_file()) {
            return Err(Error::validation(format!(
                "local file {} does not exist",
                missing.display()
            )));
        }

        let roles = selector::resolve(selector, &self.topology)?;
        let files = files.to_vec();
        let timeout = self.command_timeout;
        let outcomes = self
            .fan_out(&roles, move |role, host| upload_units(role, host, &files, timeout))
            .await?;
        finish("distribute", outcomes)
    }

    /// Run a shell command on every selected role.
    #[instrument(skip(self))]
    pub async fn run_command(&self, selector: &str, command: &str) -> Result<Vec<RoleOutcome>> {
        let roles = selector::resolve(selector, &self.topology)?;
        let command = command.to_string();
        let timeout = self.command_timeout;
        let outcomes = self
            .fan_out(&roles, move |role, host| {
                vec![ExecutionUnit::new(
                    role,
                    host,
                    UnitOperation::Command(command.clone()),
                    timeout,
                )]
            })
            .await?;
        finish("command", outcomes)
    }

    /// Role name to host, for every role.
    fn hosts_by_role(&self, roles: &[Role]) -> Result<HashMap<String, Host>> {
        roles
            .iter()
            .map(|role| Ok((role.name.clone(), self.topology.host_of(role)?.clone())))
            .collect()
    }

    /// Plan units per role and run them through the coordinator.
    async fn fan_out<P>(&self, roles: &[Role], plan: P) -> Result<Vec<RoleOutcome>>
    where
        P: Fn(&Role, &Host) -> Vec<ExecutionUnit> + Send + Sync + 'static,
    {
        let hosts = self.hosts_by_role(roles)?;
        Ok(self
            .coordinator
            .dispatch_units(Arc::clone(&self.executor), roles, move |role| {
                hosts
                    .get(&role.name)
                    .map(|host| plan(role, host))
                    .unwrap_or_default()
            })
            .await)
    }
}

fn upload_units(role: &Role, host: &Host, files: &[PathBuf], timeout: Duration) -> Vec<ExecutionUnit> {
    files
        .iter()
        .map(|file| {
            ExecutionUnit::new(
                role,
                host,
                UnitOperation::Upload {
                    local: file.clone(),
                    remote_dir: role.artifact_dir.clone(),
                },
                timeout,
            )
        })
        .collect()
}

/// Turn per-role failures into one aggregate error.
fn finish(action: &str, outcomes: Vec<RoleOutcome>) -> Result<Vec<RoleOutcome>> {
    let failures = collect_failures(&outcomes);
    if failures.is_empty() {
        Ok(outcomes)
    } else {
        Err(Error::RemoteExecution {
            action: action.to_string(),
            failures,
        })
    }
}
