use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use super::{finish, ActionOrchestrator};
use crate::backup::ConfigBackupStore;
use crate::error::{Error, Result};
use crate::executor::{ExecutionResult, ExecutionUnit, RemoteExecutor, RoleOutcome, UnitOperation};
use crate::hadoop::{HadoopConfigFile, PropertyPatch};
use crate::selector;
use crate::topology::{Host, Role};

/// Arguments of `update-config`.
#[derive(Debug, Clone)]
pub struct ConfigUpdate {
    pub selector: String,
    pub file: HadoopConfigFile,
    pub properties: Vec<String>,
    pub values: Vec<String>,
    /// Skip the snapshot taken before patching
    pub no_backup: bool,
    /// Local document patched and written instead of the remote one
    pub source: Option<PathBuf>,
}

impl ConfigUpdate {
    pub fn new(selector: impl Into<String>, file: HadoopConfigFile) -> Self {
        Self {
            selector: selector.into(),
            file,
            properties: Vec::new(),
            values: Vec::new(),
            no_backup: false,
            source: None,
        }
    }

    pub fn set(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(property.into());
        self.values.push(value.into());
        self
    }

    /// Paired patches. Checked before anything is resolved or contacted.
    pub fn patches(&self) -> Result<Vec<PropertyPatch>> {
        let patches = PropertyPatch::zip(&self.properties, &self.values)
            .map_err(|e| Error::validation(e.to_string()))?;
        if patches.is_empty() && self.source.is_none() {
            return Err(Error::validation(
                "nothing to update: give --property/--value pairs or --source",
            ));
        }
        Ok(patches)
    }
}

/// Everything one role's update needs, shared across workers.
struct RoleUpdate {
    backups: Arc<ConfigBackupStore>,
    executor: Arc<RemoteExecutor>,
    file: HadoopConfigFile,
    patches: Vec<PropertyPatch>,
    source: Option<String>,
    no_backup: bool,
    timeout: Duration,
}

impl RoleUpdate {
    /// Backup, patch, and on a failed patch put the backup back. The
    /// session lock is held throughout.
    async fn apply(&self, role: Role, host: Host) -> Vec<ExecutionResult> {
        let path = role.config_path(self.file.file_name());
        let session = self.backups.session(&role, &host, &path).await;
        let mut results = Vec::new();

        let snapshot = if self.no_backup {
            None
        } else {
            let label = format!("backup {}", self.file);
            match session.backup().await {
                Ok(snapshot) => {
                    results.push(ExecutionResult::succeeded(
                        &role.name,
                        label,
                        format!("version {}", snapshot.version),
                    ));
                    Some(snapshot)
                }
                Err(e) => {
                    results.push(ExecutionResult::failed(&role.name, label, e.to_string()));
                    return results;
                }
            }
        };

        let unit = ExecutionUnit::new(
            &role,
            &host,
            UnitOperation::Patch {
                path,
                patches: self.patches.clone(),
                source: self.source.clone(),
            },
            self.timeout,
        )
        .with_label(format!("update {}", self.file));
        let patched = self.executor.execute(&unit).await;
        let failed = !patched.is_success();
        results.push(patched);

        if let (true, Some(snapshot)) = (failed, snapshot.as_ref()) {
            warn!(role = %role.name, version = snapshot.version, "Patch failed, rolling back");
            let rollback = match session.restore(Some(snapshot)).await {
                Ok(result) => result.with_label("rollback"),
                Err(e) => ExecutionResult::failed(&role.name, "rollback", e.to_string()),
            };
            results.push(rollback);
        }
        results
    }
}

impl ActionOrchestrator {
    /// Set properties in a config file of every selected role.
    ///
    /// Each role is handled on its own: a failure rolls back only that
    /// role, roles already updated stay updated.
    #[instrument(skip(self, update), fields(selector = %update.selector, file = %update.file))]
    pub async fn update_config(&self, update: ConfigUpdate) -> Result<Vec<RoleOutcome>> {
        let patches = update.patches()?;
        let source = match &update.source {
            Some(path) => Some(tokio::fs::read_to_string(path).await.map_err(|e| {
                Error::validation(format!("cannot read source {}: {}", path.display(), e))
            })?),
            None => None,
        };

        let roles = selector::resolve(&update.selector, &self.topology)?;
        let hosts = self.hosts_by_role(&roles)?;
        let job = Arc::new(RoleUpdate {
            backups: Arc::clone(&self.backups),
            executor: Arc::clone(&self.executor),
            file: update.file,
            patches,
            source,
            no_backup: update.no_backup,
            timeout: self.command_timeout,
        });

        let outcomes = self
            .coordinator
            .dispatch(&roles, move |role| {
                let job = Arc::clone(&job);
                let host = hosts.get(&role.name).cloned();
                async move {
                    match host {
                        Some(host) => job.apply(role, host).await,
                        None => vec![ExecutionResult::failed(&role.name, "update", "unknown host")],
                    }
                }
            })
            .await;
        finish("update-config", outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::connection::ConnectionType;
    use crate::executor::UnitStatus;
    use crate::topology::RoleType;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    const YARN_SITE: &str = "<?xml version=\"1.0\"?>\n<configuration>\n  <property>\n    <name>yarn.nodemanager.resource.memory-mb</name>\n    <value>4096</value>\n  </property>\n</configuration>\n";

    fn seed(connector: &FakeConnector, host: &str, content: &str) {
        connector
            .host(host)
            .files
            .lock()
            .insert(PathBuf::from("/etc/hadoop/yarn-site.xml"), content.as_bytes().to_vec());
    }

    fn remote(connector: &FakeConnector, host: &str) -> String {
        let host = connector.host(host);
        let files = host.files.lock();
        String::from_utf8(files[Path::new("/etc/hadoop/yarn-site.xml")].clone()).unwrap()
    }

    #[tokio::test]
    async fn test_count_mismatch_rejected_before_resolving() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, connector) = cluster(dir.path());

        let mut update = ConfigUpdate::new("no-such-role", HadoopConfigFile::YarnSite);
        update.properties = vec!["a".into(), "b".into()];
        update.values = vec!["1".into()];

        let err = orchestrator.update_config(update).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("Properties: 2 Values: 1"));
        assert!(connector.hosts.lock().is_empty());
    }

    #[tokio::test]
    async fn test_empty_update_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = cluster(dir.path());
        let err = orchestrator
            .update_config(ConfigUpdate::new("", HadoopConfigFile::CoreSite))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_backs_up_then_patches() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, connector) = cluster(dir.path());
        seed(&connector, "rm", YARN_SITE);

        let outcomes = orchestrator
            .update_config(
                ConfigUpdate::new("resourcemanager", HadoopConfigFile::YarnSite)
                    .set("yarn.nodemanager.resource.memory-mb", "8192")
                    .set("yarn.scheduler.minimum-allocation-mb", "512"),
            )
            .await
            .unwrap();

        let labels: Vec<_> = outcomes[0].results.iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["backup yarn-site.xml", "update yarn-site.xml"]);

        let doc = remote(&connector, "rm");
        assert!(doc.contains("<value>8192</value>"));
        assert!(doc.contains("yarn.scheduler.minimum-allocation-mb"));

        let history = orchestrator
            .backups
            .history("resourcemanager", "yarn-site.xml")
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, YARN_SITE.as_bytes());
    }

    #[tokio::test]
    async fn test_failed_patch_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, connector) = cluster(dir.path());
        // Not a configuration document, so the patch fails after the backup.
        seed(&connector, "rm", "<broken/>");

        let err = orchestrator
            .update_config(
                ConfigUpdate::new("resourcemanager", HadoopConfigFile::YarnSite).set("a", "1"),
            )
            .await
            .unwrap_err();

        assert_eq!(err.failures().len(), 1);
        assert!(err.failures()[0].detail.starts_with("update yarn-site.xml"));
        assert_eq!(remote(&connector, "rm"), "<broken/>");
    }

    #[tokio::test]
    async fn test_rollback_after_patch_was_written() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, connector) = cluster(dir.path());
        seed(&connector, "rm", YARN_SITE);
        let path = PathBuf::from("/etc/hadoop/yarn-site.xml");
        *connector.host("rm").drop_after_write.lock() = Some(path);

        let job = RoleUpdate {
            backups: Arc::clone(&orchestrator.backups),
            executor: Arc::clone(&orchestrator.executor),
            file: HadoopConfigFile::YarnSite,
            patches: vec![PropertyPatch::new("yarn.nodemanager.resource.memory-mb", "8192")],
            source: None,
            no_backup: false,
            timeout: Duration::from_secs(5),
        };
        let results = job
            .apply(
                role("resourcemanager", RoleType::ResourceManager, "rm"),
                Host::new("rm", ConnectionType::Docker { container: "rm".into() }),
            )
            .await;

        let steps: Vec<_> = results.iter().map(|r| (r.label.as_str(), r.status)).collect();
        assert_eq!(
            steps,
            vec![
                ("backup yarn-site.xml", UnitStatus::Succeeded),
                ("update yarn-site.xml", UnitStatus::Failed),
                ("rollback", UnitStatus::Succeeded),
            ]
        );
        let snapshot = orchestrator
            .backups
            .latest("resourcemanager", "yarn-site.xml")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(remote(&connector, "rm").as_bytes(), snapshot.content.as_slice());
        assert_eq!(remote(&connector, "rm"), YARN_SITE);
    }

    #[tokio::test]
    async fn test_missing_file_fails_role_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, connector) = cluster(dir.path());
        seed(&connector, "dn1", YARN_SITE);

        let err = orchestrator
            .update_config(ConfigUpdate::new("datanode*", HadoopConfigFile::YarnSite).set("a", "1"))
            .await
            .unwrap_err();

        let failed: Vec<_> = err.failures().iter().map(|f| f.role.as_str()).collect();
        assert_eq!(failed, vec!["datanode-2"]);
        assert!(remote(&connector, "dn1").contains("<name>a</name>"));
        assert!(connector.host("dn2").files.lock().is_empty());
    }

    #[tokio::test]
    async fn test_source_document_replaces_remote() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("yarn-site.xml");
        std::fs::write(&source, YARN_SITE).unwrap();
        let (orchestrator, connector) = cluster(dir.path());
        seed(&connector, "rm", "<configuration></configuration>");

        let mut update = ConfigUpdate::new("resourcemanager", HadoopConfigFile::YarnSite);
        update.source = Some(source);
        update.no_backup = true;
        orchestrator.update_config(update).await.unwrap();

        assert_eq!(remote(&connector, "rm"), YARN_SITE);
    }
}
