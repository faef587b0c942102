//! Command-line interface.
//!
//! Argument parsing lives here; each subcommand's behaviour lives in
//! [`commands`].

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hades - operate Hadoop clusters
///
/// Restart roles, push configs and jars, follow logs and build Hadoop
/// modules on hadock or Cloudera Manager clusters.
#[derive(Parser, Debug, Clone)]
#[command(name = "hades")]
#[command(version)]
#[command(about = "Hadoop cluster operations", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(short = 'c', long, default_value = "config.json", env = "HADES_CONFIG")]
    pub config: PathBuf,

    /// Turn on DEBUG level logging
    #[arg(short = 'd', long)]
    pub debug: bool,

    /// Verbosity level (-v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Number of roles worked on in parallel
    #[arg(long, global = true)]
    pub forks: Option<usize>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Compile Hadoop modules
    Compile(commands::compile::CompileArgs),

    /// Initialize the config file
    Init(commands::init::InitArgs),

    /// Read the logs of Hadoop roles
    Log(commands::log::LogArgs),

    /// Distribute files to selected roles
    Distribute(commands::roles::DistributeArgs),

    /// Print the status of the cluster
    Status(commands::status::StatusArgs),

    /// Run an example application on the cluster
    #[command(name = "run-app")]
    RunApp(commands::app::RunAppArgs),

    /// Run a hades script from the scripts directory
    #[command(name = "run-script")]
    RunScript(commands::app::RunScriptArgs),

    /// Update properties of a config file on selected roles
    #[command(name = "update-config")]
    UpdateConfig(commands::roles::UpdateConfigArgs),

    /// Restart selected roles
    #[command(name = "restart-role")]
    RestartRole(commands::roles::RestartArgs),

    /// YARN specific commands
    #[command(subcommand)]
    Yarn(YarnCommand),
}

/// `hades yarn ...`
#[derive(Subcommand, Debug, Clone)]
pub enum YarnCommand {
    /// Print YARN scheduler queues
    Queue(commands::status::QueueArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-2)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(2)
    }

    /// Whether the command needs a loaded config file.
    pub fn needs_config(&self) -> bool {
        !matches!(self.command, Commands::Init(_))
    }

    /// Name used in log messages.
    pub fn command_name(&self) -> &'static str {
        match self.command {
            Commands::Compile(_) => "compile",
            Commands::Init(_) => "init",
            Commands::Log(_) => "log",
            Commands::Distribute(_) => "distribute",
            Commands::Status(_) => "status",
            Commands::RunApp(_) => "run-app",
            Commands::RunScript(_) => "run-script",
            Commands::UpdateConfig(_) => "update-config",
            Commands::RestartRole(_) => "restart-role",
            Commands::Yarn(_) => "yarn",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hadoop::{Application, HadoopConfigFile};
    use crate::topology::ClusterType;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["hades", "restart-role", "datanode*"]).unwrap();
        assert!(matches!(cli.command, Commands::RestartRole(ref a) if a.selector == "datanode*"));
        assert_eq!(cli.config, PathBuf::from("config.json"));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "hades", "-c", "/etc/hades.json", "-d", "-vv", "status", "--forks", "3",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("/etc/hades.json"));
        assert!(cli.debug);
        assert_eq!(cli.verbosity(), 2);
        assert_eq!(cli.forks, Some(3));
    }

    #[test]
    fn test_update_config_args() {
        let cli = Cli::try_parse_from([
            "hades",
            "update-config",
            "nodemanager*",
            "-f",
            "yarn-site",
            "-p",
            "yarn.nodemanager.resource.memory-mb",
            "-v",
            "8192",
            "-n",
        ])
        .unwrap();
        let Commands::UpdateConfig(args) = cli.command else {
            panic!("expected update-config");
        };
        assert_eq!(args.file, HadoopConfigFile::YarnSite);
        assert_eq!(args.property, vec!["yarn.nodemanager.resource.memory-mb"]);
        assert_eq!(args.value, vec!["8192"]);
        assert!(args.no_backup);
    }

    #[test]
    fn test_unknown_config_kind_rejected() {
        assert!(Cli::try_parse_from(["hades", "update-config", "-f", "hive-site", "-p", "a", "-v", "b"]).is_err());
    }

    #[test]
    fn test_compile_args() {
        let cli = Cli::try_parse_from([
            "hades", "compile", "-c", "-d", "-m", "hadoop-hdfs", "-m", "hadoop-yarn-common",
        ])
        .unwrap();
        let Commands::Compile(args) = cli.command else {
            panic!("expected compile");
        };
        assert!(args.changed && args.deploy && !args.no_copy);
        assert_eq!(args.module, vec!["hadoop-hdfs", "hadoop-yarn-common"]);
    }

    #[test]
    fn test_init_does_not_need_config() {
        let cli = Cli::try_parse_from([
            "hades", "init", "-c", "cloudera", "-H", "cm.example.com",
        ])
        .unwrap();
        assert!(!cli.needs_config());
        let Commands::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert_eq!(args.cluster_type, ClusterType::Cloudera);
        assert_eq!(args.username, "admin");
    }

    #[test]
    fn test_log_and_app_args() {
        let cli = Cli::try_parse_from(["hades", "log", "namenode", "-f", "-t", "50", "-g", "ERROR"]).unwrap();
        let Commands::Log(args) = cli.command else {
            panic!("expected log");
        };
        assert!(args.follow);
        assert_eq!(args.tail, Some(50));
        assert_eq!(args.grep.as_deref(), Some("ERROR"));

        let cli = Cli::try_parse_from(["hades", "run-app", "wordcount", "-q", "etl"]).unwrap();
        assert!(matches!(cli.command, Commands::RunApp(ref a) if a.app == Application::Wordcount));

        let cli = Cli::try_parse_from(["hades", "yarn", "queue"]).unwrap();
        assert!(matches!(cli.command, Commands::Yarn(YarnCommand::Queue(_))));
    }
}
