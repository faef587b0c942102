//! Hades scripts: YAML lists of actions run in order.
//!
//! ```yaml
//! - update_config:
//!     selector: "nodemanager*"
//!     file: yarn-site
//!     properties:
//!       yarn.nodemanager.resource.memory-mb: "8192"
//! - restart: "nodemanager*"
//! - sleep: 30s
//! - run_app:
//!     app: pi
//!     queue: default
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_yaml::with::singleton_map_recursive;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

use crate::actions::{Action, ActionOrchestrator, ConfigUpdate};
use crate::error::{Error, Result};
use crate::hadoop::{Application, HadoopConfigFile};

/// One script step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptStep {
    /// Restart the roles matching a selector
    Restart(String),
    Distribute {
        #[serde(default)]
        selector: String,
        files: Vec<PathBuf>,
    },
    UpdateConfig {
        #[serde(default)]
        selector: String,
        file: HadoopConfigFile,
        #[serde(default)]
        properties: IndexMap<String, String>,
        #[serde(default)]
        source: Option<PathBuf>,
        #[serde(default)]
        no_backup: bool,
    },
    /// Run a shell command on the selected roles
    Command {
        #[serde(default)]
        selector: String,
        run: String,
    },
    RunApp {
        app: Application,
        #[serde(default)]
        queue: Option<String>,
        #[serde(default)]
        cmd: Option<String>,
    },
    Sleep(#[serde(with = "humantime_serde")] Duration),
}

impl ScriptStep {
    /// The action this step runs, `None` for a pause.
    pub fn action(&self, base_dir: &Path) -> Option<Action> {
        let action = match self.clone() {
            ScriptStep::Restart(selector) => Action::Restart { selector },
            ScriptStep::Distribute { selector, files } => Action::Distribute {
                selector,
                files: files.into_iter().map(|f| base_dir.join(f)).collect(),
            },
            ScriptStep::UpdateConfig {
                selector,
                file,
                properties,
                source,
                no_backup,
            } => {
                let (properties, values) = properties.into_iter().unzip();
                Action::UpdateConfig(ConfigUpdate {
                    selector,
                    file,
                    properties,
                    values,
                    no_backup,
                    source: source.map(|s| base_dir.join(s)),
                })
            }
            ScriptStep::Command { selector, run } => Action::Command {
                selector,
                command: run,
            },
            ScriptStep::RunApp { app, queue, cmd } => Action::RunApp { app, cmd, queue },
            ScriptStep::Sleep(_) => return None,
        };
        Some(action)
    }

    fn describe(&self) -> String {
        match self {
            ScriptStep::Restart(selector) => format!("restart '{}'", selector),
            ScriptStep::Distribute { selector, files } => {
                format!("distribute {} file(s) to '{}'", files.len(), selector)
            }
            ScriptStep::UpdateConfig { selector, file, .. } => {
                format!("update {} on '{}'", file, selector)
            }
            ScriptStep::Command { selector, run } => format!("run '{}' on '{}'", run, selector),
            ScriptStep::RunApp { app, .. } => format!("run app {}", app),
            ScriptStep::Sleep(d) => format!("sleep {:?}", d),
        }
    }
}

/// A parsed script file.
#[derive(Debug, Clone)]
pub struct Script {
    pub name: String,
    pub path: PathBuf,
    pub steps: Vec<ScriptStep>,
}

impl Script {
    /// Find `name` in `dir`, trying `.yml` and `.yaml` when it has no
    /// extension. An existing path is used as is.
    pub fn locate(dir: &Path, name: &str) -> Result<PathBuf> {
        let direct = Path::new(name);
        if direct.is_file() {
            return Ok(direct.to_path_buf());
        }
        let candidates = [
            dir.join(name),
            dir.join(format!("{}.yml", name)),
            dir.join(format!("{}.yaml", name)),
        ];
        candidates
            .into_iter()
            .find(|p| p.is_file())
            .ok_or_else(|| {
                Error::validation(format!(
                    "script '{}' not found in {}",
                    name,
                    dir.display()
                ))
            })
    }

    /// Parse script steps. Each step is a single-key map naming its kind.
    pub fn parse(content: &str) -> std::result::Result<Vec<ScriptStep>, serde_yaml::Error> {
        singleton_map_recursive::deserialize(serde_yaml::Deserializer::from_str(content))
    }

    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path = Self::locate(dir, name)?;
        let content = std::fs::read_to_string(&path)?;
        let steps = Self::parse(&content).map_err(|e| Error::Script {
            script: name.to_string(),
            step: 0,
            message: format!("invalid script: {}", e),
        })?;
        Ok(Self {
            name: name.to_string(),
            path,
            steps,
        })
    }

    /// Run every step in order; the first failing step ends the script.
    #[instrument(skip(self, orchestrator), fields(script = %self.name, steps = self.steps.len()))]
    pub async fn run(&self, orchestrator: &ActionOrchestrator) -> Result<()> {
        let base_dir = self.path.parent().unwrap_or(Path::new("."));

        for (i, step) in self.steps.iter().enumerate() {
            let number = i + 1;
            info!(step = number, "{}", step.describe());

            match step.action(base_dir) {
                Some(action) => {
                    orchestrator.run(action).await.map_err(|e| Error::Script {
                        script: self.name.clone(),
                        step: number,
                        message: e.to_string(),
                    })?;
                }
                None => {
                    if let ScriptStep::Sleep(duration) = step {
                        tokio::time::sleep(*duration).await;
                    }
                }
            }
        }
        info!("Script finished");
        Ok(())
    }
}
