//! # Hades - Hadoop cluster operations
//!
//! Hades drives a Hadoop cluster from a developer machine: restart roles,
//! push configuration and jars, follow logs across hosts, build modules
//! from a Hadoop source tree and run example applications. Clusters are
//! either a local docker compose project ("hadock") or a cluster managed
//! by Cloudera Manager.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           CLI Interface                              │
//! │                    (clap-based command parsing)                      │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                       ActionOrchestrator                             │
//! │     (restart, distribute, update-config, compile, status, apps)      │
//! └─────────────────────────────────────────────────────────────────────┘
//!          │                         │                         │
//!          ▼                         ▼                         ▼
//! ┌─────────────────┐   ┌─────────────────────┐   ┌─────────────────────┐
//! │    Topology     │   │ ExecutionCoordinator│   │  ConfigBackupStore  │
//! │ (hadock / CM +  │   │  (bounded fan-out   │   │  (versioned config  │
//! │  RoleSelector)  │   │   over roles)       │   │   snapshots)        │
//! └─────────────────┘   └─────────────────────┘   └─────────────────────┘
//!                                    │
//!                                    ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                  RemoteExecutor / LogAggregator                      │
//! │                 (Local, Docker and SSH transports)                   │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use hades::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load("config.json".as_ref())?;
//!     let provider = hades::topology::provider_from_config(&config)?;
//!     let topology = Arc::new(Topology::snapshot(provider.as_ref()).await?);
//!
//!     let executor = Arc::new(RemoteExecutor::new(Arc::new(
//!         TransportConnector::new(config.ssh.clone()),
//!     )));
//!     let backups = Arc::new(ConfigBackupStore::new(&config.backup.dir, executor.clone()));
//!     let orchestrator = ActionOrchestrator::new(topology, executor, backups)
//!         .with_config(&config);
//!
//!     orchestrator.restart("datanode*").await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod prelude {
    //! Re-exports of the types most callers need.

    pub use std::sync::Arc;

    pub use crate::actions::{Action, ActionOrchestrator, ActionReport, CompileRequest, ConfigUpdate};
    pub use crate::backup::ConfigBackupStore;
    pub use crate::config::Config;
    pub use crate::connection::{
        CommandResult, Connection, ConnectionError, ConnectionType, Connector, ExecuteOptions,
        TransportConnector,
    };
    pub use crate::error::{Error, Result};
    pub use crate::executor::{ExecutionCoordinator, RemoteExecutor, RoleOutcome};
    pub use crate::hadoop::{Application, HadoopConfigFile};
    pub use crate::logs::{LineFilter, LogAggregator, LogMode};
    pub use crate::script::Script;
    pub use crate::topology::{ClusterType, Host, Role, RoleType, Topology};
}

/// Error types and the crate-wide [`Result`] alias.
pub mod error;

/// Configuration file model, loading and environment overrides.
pub mod config;

/// Tracing subscriber setup.
pub mod telemetry;

/// Transports: local, docker and SSH.
pub mod connection;

/// Cluster topology: hosts, roles, module graph and providers.
pub mod topology;

/// Role selector expressions.
pub mod selector;

/// Hadoop specifics: config XML, example applications, YARN REST.
pub mod hadoop;

/// Remote execution of per-role units and bounded fan-out.
pub mod executor;

/// Versioned snapshots of role configuration files.
pub mod backup;

/// Multi-role log reading and following.
pub mod logs;

/// Cluster actions built on top of the executor.
pub mod actions;

/// YAML scripts chaining actions.
pub mod script;

/// Command-line interface.
pub mod cli;

pub use error::{Error, Result};
