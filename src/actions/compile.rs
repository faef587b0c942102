//! Module builds for `hades compile`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, instrument, warn};
use walkdir::{DirEntry, WalkDir};

use super::{finish, ActionOrchestrator};
use crate::config::BuildSettings;
use crate::connection::{Connection, ExecuteOptions, LocalConnection};
use crate::error::{Error, Result};
use crate::topology::{Module, Role};

/// What `compile` should build and what to do with the result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompileRequest {
    /// Skip modules whose sources did not change since their last build
    pub changed_only: bool,
    /// Upload built jars to every role the module applies to
    pub deploy: bool,
    /// Modules added to the configured defaults
    pub modules: Vec<String>,
    /// Do not copy jars into the local Hadoop jar directory
    pub no_copy: bool,
    /// Build exactly this module and nothing else
    pub single: Option<String>,
}

/// Result of a compile run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CompileReport {
    /// Modules built, in build order, with their artifacts
    pub built: Vec<(String, PathBuf)>,
    /// Requested modules skipped because nothing changed
    pub unchanged: Vec<String>,
    /// Roles that received artifacts
    pub deployed_to: Vec<String>,
}

/// Builds a module and returns the path of the produced jar.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModuleBuilder: Send + Sync {
    async fn build(&self, module: &Module) -> Result<PathBuf>;
}

/// Runs maven in the module's directory of the Hadoop source checkout.
pub struct MavenBuilder {
    source: PathBuf,
    maven: String,
    args: Vec<String>,
    timeout: Duration,
    shell: LocalConnection,
}

impl MavenBuilder {
    pub fn new(settings: &BuildSettings) -> Result<Self> {
        let source = settings.hadoop_source.clone().ok_or_else(|| {
            Error::Config("build.hadoop_source is required to compile modules".into())
        })?;
        Ok(Self {
            source,
            maven: settings.maven.clone(),
            args: settings.maven_args.clone(),
            timeout: settings.build_timeout,
            shell: LocalConnection::with_identifier("maven"),
        })
    }

    fn command(&self) -> String {
        let mut command = format!("{} package", self.maven);
        for arg in &self.args {
            command.push(' ');
            command.push_str(arg);
        }
        command
    }
}

#[async_trait]
impl ModuleBuilder for MavenBuilder {
    #[instrument(skip(self, module), fields(module = %module.name))]
    async fn build(&self, module: &Module) -> Result<PathBuf> {
        let dir = self.source.join(&module.path);
        if !dir.is_dir() {
            return Err(Error::compile(
                &module.name,
                format!("module directory {} does not exist", dir.display()),
            ));
        }

        let options = ExecuteOptions::new()
            .with_cwd(dir.to_string_lossy())
            .with_timeout(self.timeout.as_secs().max(1));
        let result = self
            .shell
            .execute(&self.command(), Some(options))
            .await
            .map_err(|e| Error::compile(&module.name, e.to_string()))?;

        if !result.success {
            return Err(Error::compile(
                &module.name,
                last_lines(&result.combined_output(), 20),
            ));
        }

        find_artifact(&dir.join("target")).ok_or_else(|| {
            Error::compile(&module.name, "build succeeded but produced no jar")
        })
    }
}

fn last_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}

/// Newest main jar in a maven `target` directory.
fn find_artifact(target: &Path) -> Option<PathBuf> {
    std::fs::read_dir(target)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            name.ends_with(".jar")
                && !name.ends_with("-sources.jar")
                && !name.ends_with("-tests.jar")
                && !name.ends_with("-javadoc.jar")
        })
        .max_by_key(|path| {
            path.metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH)
        })
}

fn is_build_noise(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.') || name == "target")
}

/// Content hash of a module's sources, ignoring build output and hidden
/// files.
pub fn fingerprint(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_build_noise(e));

    for entry in walker {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);
        hasher.update(std::fs::read(entry.path())?);
        hasher.update([0]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct FingerprintFile {
    #[serde(default)]
    modules: BTreeMap<String, String>,
}

/// Fingerprints of the last successful build per module, kept in a JSON
/// file.
#[derive(Debug)]
pub struct FingerprintStore {
    path: PathBuf,
    recorded: BTreeMap<String, String>,
}

impl FingerprintStore {
    /// Read the store; a missing file is an empty store.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let recorded = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<FingerprintFile>(&content)?.modules,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, recorded })
    }

    pub fn recorded(&self, module: &str) -> Option<&str> {
        self.recorded.get(module).map(String::as_str)
    }

    pub fn is_changed(&self, module: &str, current: &str) -> bool {
        self.recorded(module) != Some(current)
    }

    /// Record a fingerprint and persist the store.
    pub fn record(&mut self, module: &str, fingerprint: String) -> Result<()> {
        self.recorded.insert(module.to_string(), fingerprint);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = FingerprintFile {
            modules: self.recorded.clone(),
        };
        std::fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        debug!(module, path = %self.path.display(), "Fingerprint recorded");
        Ok(())
    }
}

/// Copy a built jar into the local Hadoop jar directory.
pub fn copy_artifact(artifact: &Path, jar_dir: &Path) -> Result<PathBuf> {
    let file_name = artifact
        .file_name()
        .ok_or_else(|| Error::validation(format!("{} is not a file", artifact.display())))?;
    std::fs::create_dir_all(jar_dir)?;
    let target = jar_dir.join(file_name);
    std::fs::copy(artifact, &target)?;
    info!(artifact = %artifact.display(), target = %target.display(), "Artifact copied");
    Ok(target)
}

impl ActionOrchestrator {
    /// Modules to build, dependencies first.
    fn build_order(&self, request: &CompileRequest) -> Result<(Vec<String>, Vec<String>)> {
        let graph = self.topology.modules();

        if let Some(single) = &request.single {
            graph.check_known(std::slice::from_ref(single))?;
            return Ok((vec![single.clone()], Vec::new()));
        }

        let mut requested: Vec<String> = Vec::new();
        for name in self.default_modules.iter().chain(&request.modules) {
            if !requested.contains(name) {
                requested.push(name.clone());
            }
        }
        if requested.is_empty() {
            return Err(Error::validation(
                "no modules to compile: set default_modules or pass --module",
            ));
        }
        graph.check_known(&requested)?;

        let mut unchanged = Vec::new();
        if request.changed_only {
            let source = self.hadoop_source()?;
            let store = FingerprintStore::load(&self.build.fingerprint_file)?;
            let mut changed = Vec::new();
            for name in requested {
                let current = self.module_fingerprint(source, &name)?;
                if store.is_changed(&name, &current) {
                    changed.push(name);
                } else {
                    unchanged.push(name);
                }
            }
            requested = changed;
        }
        if requested.is_empty() {
            return Ok((Vec::new(), unchanged));
        }

        let expanded = graph.with_dependencies(&requested)?;
        Ok((graph.topological_order(&expanded)?, unchanged))
    }

    fn hadoop_source(&self) -> Result<&Path> {
        self.build
            .hadoop_source
            .as_deref()
            .ok_or_else(|| Error::Config("build.hadoop_source is required to compile modules".into()))
    }

    fn module_fingerprint(&self, source: &Path, name: &str) -> Result<String> {
        let module = self
            .topology
            .modules()
            .get(name)
            .ok_or_else(|| Error::validation(format!("unknown module '{}'", name)))?;
        fingerprint(&source.join(&module.path))
    }

    /// Build the requested modules one at a time, stopping at the first
    /// failure, then optionally deploy the jars.
    #[instrument(skip(self))]
    pub async fn compile(&self, request: CompileRequest) -> Result<CompileReport> {
        let (order, unchanged) = self.build_order(&request)?;
        let mut report = CompileReport {
            unchanged,
            ..CompileReport::default()
        };
        if order.is_empty() {
            info!("All requested modules are up to date");
            return Ok(report);
        }

        let builder: Arc<dyn ModuleBuilder> = match &self.builder {
            Some(builder) => Arc::clone(builder),
            None => Arc::new(MavenBuilder::new(&self.build)?),
        };
        let mut fingerprints = FingerprintStore::load(&self.build.fingerprint_file)?;
        let source = self.build.hadoop_source.as_deref();
        info!(modules = ?order, "Compiling");

        for name in &order {
            let module = self
                .topology
                .modules()
                .get(name)
                .ok_or_else(|| Error::validation(format!("unknown module '{}'", name)))?;

            let started = Instant::now();
            let artifact = builder.build(module).await.map_err(|e| match e {
                Error::Compile { .. } => e,
                other => Error::compile(name, other.to_string()),
            })?;
            info!(module = %name, artifact = %artifact.display(), elapsed = ?started.elapsed(), "Module built");

            if let Some(source) = source {
                fingerprints.record(name, self.module_fingerprint(source, name)?)?;
            }
            if !request.no_copy {
                if let Some(jar_dir) = &self.build.hadoop_jar_path {
                    copy_artifact(&artifact, jar_dir)?;
                }
            }
            report.built.push((name.clone(), artifact));
        }

        if request.deploy {
            report.deployed_to = self.deploy(&report.built).await?;
        }
        Ok(report)
    }

    /// Upload each artifact to one role per host and artifact directory
    /// among the roles its module applies to.
    async fn deploy(&self, built: &[(String, PathBuf)]) -> Result<Vec<String>> {
        let graph = self.topology.modules();
        let mut targets: Vec<Role> = Vec::new();
        let mut uploads: HashMap<String, Vec<PathBuf>> = HashMap::new();

        for (name, artifact) in built {
            let Some(module) = graph.get(name) else {
                continue;
            };
            let mut seen = HashSet::new();
            for role in self.topology.roles() {
                if !module.applies_to(&role.role_type)
                    || !seen.insert((role.host.clone(), role.artifact_dir.clone()))
                {
                    continue;
                }
                let target = match targets
                    .iter()
                    .find(|t| t.host == role.host && t.artifact_dir == role.artifact_dir)
                {
                    Some(existing) => existing.name.clone(),
                    None => {
                        targets.push(role.clone());
                        role.name.clone()
                    }
                };
                uploads.entry(target).or_default().push(artifact.clone());
            }
        }

        if targets.is_empty() {
            warn!("No role to deploy the built modules to");
            return Ok(Vec::new());
        }

        let timeout = self.command_timeout;
        let outcomes = self
            .fan_out(&targets, move |role, host| {
                let files = uploads.get(&role.name).map(Vec::as_slice).unwrap_or_default();
                super::upload_units(role, host, files, timeout)
            })
            .await?;
        let outcomes = finish("deploy", outcomes)?;
        Ok(outcomes.into_iter().map(|o| o.role).collect())
    }
}
