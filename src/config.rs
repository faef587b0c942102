//! Configuration for hades.
//!
//! The config file is JSON (`config.json` by default, written by `hades init`);
//! a `.toml` file is accepted as well. After loading, `HADES_*` environment
//! variables override individual values:
//!
//! - `HADES_FORKS`: worker pool size
//! - `HADES_COMMAND_TIMEOUT`: per-unit timeout in seconds
//! - `HADES_BACKUP_DIR`: where config snapshots are kept

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::connection::RetryPolicy;
use crate::error::{Error, Result};
use crate::telemetry::LogFormat;
use crate::topology::{ClusterType, ModuleSpec};

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which kind of cluster we operate
    pub cluster_type: ClusterType,

    /// Cloudera Manager connection, used when `cluster_type` is `cloudera`
    pub cloudera: ClouderaSettings,

    /// Local containerized cluster, used when `cluster_type` is `hadock`
    pub hadock: HadockSettings,

    /// Modules always part of an aggregated compile
    pub default_modules: Vec<String>,

    /// Extra modules, or overrides of built-in ones by name
    pub modules: Vec<ModuleSpec>,

    pub build: BuildSettings,
    pub execution: ExecutionSettings,
    pub ssh: SshSettings,
    pub backup: BackupSettings,
    pub logs: LogSettings,
    pub logging: LoggingSettings,

    /// Directory holding hades scripts
    pub scripts_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cluster_type: ClusterType::Hadock,
            cloudera: ClouderaSettings::default(),
            hadock: HadockSettings::default(),
            default_modules: Vec::new(),
            modules: Vec::new(),
            build: BuildSettings::default(),
            execution: ExecutionSettings::default(),
            ssh: SshSettings::default(),
            backup: BackupSettings::default(),
            logs: LogSettings::default(),
            logging: LoggingSettings::default(),
            scripts_dir: PathBuf::from("script"),
        }
    }
}

/// Cloudera Manager API access
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClouderaSettings {
    pub host: Option<String>,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub use_tls: bool,
    /// API version path segment, e.g. `v19`
    pub api_version: String,
    /// Cluster to operate; the first cluster reported by the API when unset
    pub cluster: Option<String>,
    /// Directory holding the client configuration on every host
    pub conf_dir: PathBuf,
    /// Where roles should receive distributed files
    pub artifact_dir: PathBuf,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ClouderaSettings {
    fn default() -> Self {
        Self {
            host: None,
            port: 7180,
            username: "admin".to_string(),
            password: "admin".to_string(),
            use_tls: false,
            api_version: "v19".to_string(),
            cluster: None,
            conf_dir: PathBuf::from("/etc/hadoop/conf"),
            artifact_dir: PathBuf::from("/opt/cloudera/parcels/CDH/jars"),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Hadock (docker-compose Hadoop) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HadockSettings {
    /// Path of the hadock repository
    pub path: Option<PathBuf>,
    /// Compose file, relative to `path`
    pub compose_file: PathBuf,
    /// Hadoop installation inside the containers
    pub hadoop_home: PathBuf,
    /// ResourceManager web address as reachable from the control node
    pub resource_manager_url: String,
}

impl Default for HadockSettings {
    fn default() -> Self {
        Self {
            path: None,
            compose_file: PathBuf::from("docker-compose.yml"),
            hadoop_home: PathBuf::from("/opt/hadoop"),
            resource_manager_url: "http://localhost:8088".to_string(),
        }
    }
}

/// Module build settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Root of the Hadoop source checkout
    pub hadoop_source: Option<PathBuf>,
    /// Local directory compiled jars are copied into (skipped with `--no-copy`)
    pub hadoop_jar_path: Option<PathBuf>,
    /// Maven executable
    pub maven: String,
    /// Extra maven arguments
    pub maven_args: Vec<String>,
    /// Where the last successful build's fingerprints are recorded
    pub fingerprint_file: PathBuf,
    #[serde(with = "humantime_serde")]
    pub build_timeout: Duration,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            hadoop_source: None,
            hadoop_jar_path: None,
            maven: "mvn".to_string(),
            maven_args: vec![
                "-DskipTests".to_string(),
                "-Dmaven.javadoc.skip=true".to_string(),
            ],
            fingerprint_file: hades_home().join("fingerprints.json"),
            build_timeout: Duration::from_secs(1800),
        }
    }
}

/// Fan-out and per-unit limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Maximum number of roles worked on concurrently
    pub forks: usize,
    /// Timeout of one execution unit
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    /// Timeout for example application runs
    #[serde(with = "humantime_serde")]
    pub app_timeout: Duration,
    /// Retry policy for transient connection failures
    pub retry: RetryPolicy,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            forks: 5,
            command_timeout: Duration::from_secs(120),
            app_timeout: Duration::from_secs(3600),
            retry: RetryPolicy::default(),
        }
    }
}

/// SSH identity for hosts reached over SSH
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
    pub passphrase: Option<String>,
    pub password: Option<String>,
    pub use_agent: bool,
    /// Accept hosts missing from known_hosts (mismatching keys are always rejected)
    pub accept_unknown_hosts: bool,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub inactivity_timeout: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            identity_file: None,
            passphrase: None,
            password: None,
            use_agent: true,
            accept_unknown_hosts: true,
            connect_timeout: Duration::from_secs(10),
            inactivity_timeout: Duration::from_secs(300),
        }
    }
}

/// Config snapshot storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub dir: PathBuf,
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            dir: hades_home().join("backups"),
        }
    }
}

/// Log reading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// How often followed files are polled
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// How long cancelled followers get to shut down
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,
    /// Largest chunk read per poll
    pub max_read_bytes: u64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(2),
            max_read_bytes: 1024 * 1024,
        }
    }
}

/// Process logging
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default level when RUST_LOG is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}

/// `~/.hades`, or `./.hades` when there is no home directory.
pub fn hades_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".hades")
}

impl Config {
    /// Load the config file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::ConfigSetup(format!(
                "Config file {} does not exist. Create config with 'init' subcommand.",
                path.display()
            )));
        }

        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file without overrides or validation.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
            _ => serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
        }
    }

    /// Config written by `hades init`.
    pub fn for_init(
        cluster_type: ClusterType,
        host: Option<String>,
        username: String,
        password: String,
        hadock_path: Option<PathBuf>,
    ) -> Self {
        let mut config = Config {
            cluster_type,
            ..Config::default()
        };
        config.cloudera.host = host;
        config.cloudera.username = username;
        config.cloudera.password = password;
        config.hadock.path = hadock_path;
        config
    }

    /// Write the config as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check that the settings needed by the configured cluster type exist.
    pub fn validate(&self) -> Result<()> {
        if self.execution.forks == 0 {
            return Err(Error::Config("execution.forks must be at least 1".into()));
        }
        match self.cluster_type {
            ClusterType::Cloudera if self.cloudera.host.is_none() => Err(Error::Config(
                "cloudera.host is required for a Cloudera cluster".into(),
            )),
            ClusterType::Hadock if self.hadock.path.is_none() => Err(Error::Config(
                "hadock.path is required for a hadock cluster".into(),
            )),
            _ => Ok(()),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(forks) = std::env::var("HADES_FORKS") {
            if let Ok(n) = forks.parse() {
                self.execution.forks = n;
            }
        }

        if let Ok(timeout) = std::env::var("HADES_COMMAND_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.execution.command_timeout = Duration::from_secs(secs);
            }
        }

        if let Ok(dir) = std::env::var("HADES_BACKUP_DIR") {
            self.backup.dir = PathBuf::from(dir);
        }
    }
}
