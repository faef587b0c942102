//! Subcommand implementations.

pub mod app;
pub mod compile;
pub mod init;
pub mod log;
pub mod roles;
pub mod status;

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::actions::ActionOrchestrator;
use crate::backup::ConfigBackupStore;
use crate::cli::output::OutputFormatter;
use crate::config::Config;
use crate::connection::TransportConnector;
use crate::error::Result;
use crate::executor::RemoteExecutor;
use crate::topology::{provider_from_config, Topology};

/// State shared by a command's execution.
///
/// The cluster is only contacted when a command first asks for the
/// orchestrator.
pub struct CommandContext {
    pub config: Config,
    pub config_path: PathBuf,
    pub output: OutputFormatter,
    orchestrator: Option<Arc<ActionOrchestrator>>,
}

impl CommandContext {
    pub fn new(config: Config, config_path: PathBuf, output: OutputFormatter) -> Self {
        Self {
            config,
            config_path,
            output,
            orchestrator: None,
        }
    }

    /// Orchestrator over a fresh topology snapshot.
    pub async fn orchestrator(&mut self) -> Result<Arc<ActionOrchestrator>> {
        if let Some(orchestrator) = &self.orchestrator {
            return Ok(Arc::clone(orchestrator));
        }

        let provider = provider_from_config(&self.config)?;
        debug!(provider = provider.name(), "Reading cluster topology");
        let topology = Arc::new(Topology::snapshot(provider.as_ref()).await?);
        info!(
            roles = topology.roles().len(),
            hosts = topology.hosts().count(),
            "Topology loaded"
        );

        let connector = Arc::new(TransportConnector::new(self.config.ssh.clone()));
        let executor = Arc::new(
            RemoteExecutor::new(connector)
                .with_retry_policy(self.config.execution.retry.clone())
                .with_connect_timeout(self.config.ssh.connect_timeout)
                .with_controller(provider.role_controller()),
        );
        let backups = Arc::new(
            ConfigBackupStore::new(&self.config.backup.dir, Arc::clone(&executor))
                .with_timeout(self.config.execution.command_timeout),
        );

        let orchestrator = Arc::new(
            ActionOrchestrator::new(topology, executor, backups).with_config(&self.config),
        );
        self.orchestrator = Some(Arc::clone(&orchestrator));
        Ok(orchestrator)
    }

    /// Close every connection opened by this command.
    pub async fn close_connections(&self) {
        if let Some(orchestrator) = &self.orchestrator {
            orchestrator.executor().close_all().await;
        }
    }
}

/// Trait for runnable commands
#[async_trait]
pub trait Runnable {
    /// Execute the command, returning the process exit code.
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32>;
}
