//! Module compilation and deployment.

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use common::*;
use hades::actions::{CompileRequest, ModuleBuilder};
use hades::config::BuildSettings;
use hades::topology::{Module, ModuleGraph, ModuleSpec, RoleType};
use hades::{Error, Result};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

/// Writes a fake jar per module and records the build order.
struct RecordingBuilder {
    out: PathBuf,
    built: Mutex<Vec<String>>,
    broken: Option<&'static str>,
}

impl RecordingBuilder {
    fn new(out: &Path) -> Arc<Self> {
        Arc::new(Self {
            out: out.to_path_buf(),
            built: Mutex::new(Vec::new()),
            broken: None,
        })
    }

    fn failing(out: &Path, module: &'static str) -> Arc<Self> {
        Arc::new(Self {
            out: out.to_path_buf(),
            built: Mutex::new(Vec::new()),
            broken: Some(module),
        })
    }

    fn built(&self) -> Vec<String> {
        self.built.lock().clone()
    }
}

#[async_trait]
impl ModuleBuilder for RecordingBuilder {
    async fn build(&self, module: &Module) -> Result<PathBuf> {
        self.built.lock().push(module.name.clone());
        if self.broken == Some(module.name.as_str()) {
            return Err(Error::compile(&module.name, "BUILD FAILURE"));
        }
        let jar = self.out.join(format!("{}-3.4.0.jar", module.name));
        std::fs::write(&jar, module.name.as_bytes())?;
        Ok(jar)
    }
}

fn hadoop_modules() -> ModuleGraph {
    ModuleGraph::from_specs([
        ModuleSpec::new("hadoop-common", "hadoop-common-project/hadoop-common"),
        ModuleSpec::new("hadoop-hdfs", "hadoop-hdfs-project/hadoop-hdfs")
            .depends_on(&["hadoop-common"])
            .for_roles(&[RoleType::NameNode, RoleType::DataNode]),
        ModuleSpec::new("hadoop-yarn-api", "hadoop-yarn-project/hadoop-yarn/hadoop-yarn-api")
            .depends_on(&["hadoop-common"]),
        ModuleSpec::new(
            "hadoop-yarn-server-nodemanager",
            "hadoop-yarn-project/hadoop-yarn/hadoop-yarn-server/hadoop-yarn-server-nodemanager",
        )
        .depends_on(&["hadoop-yarn-api"])
        .for_roles(&[RoleType::NodeManager]),
    ])
    .unwrap()
}

/// A source tree with every module directory present.
fn source_tree(root: &Path) {
    for name in hadoop_modules().names() {
        let module = hadoop_modules().get(name).unwrap().clone();
        let dir = root.join(&module.path);
        std::fs::create_dir_all(dir.join("src")).unwrap();
        std::fs::write(dir.join("pom.xml"), format!("<artifactId>{}</artifactId>", name)).unwrap();
    }
}

fn build_settings(root: &Path) -> BuildSettings {
    BuildSettings {
        hadoop_source: Some(root.join("hadoop")),
        hadoop_jar_path: Some(root.join("jars")),
        fingerprint_file: root.join("fingerprints.json"),
        ..BuildSettings::default()
    }
}

#[tokio::test]
async fn test_compile_builds_dependencies_first_and_copies_jars() {
    let dir = tempfile::tempdir().unwrap();
    source_tree(&dir.path().join("hadoop"));
    let builder = RecordingBuilder::new(dir.path());
    let (orchestrator, _) = ClusterBuilder::hadoop()
        .modules(hadoop_modules())
        .build(&dir.path().join("backups"));
    let orchestrator = orchestrator
        .with_build(build_settings(dir.path()), vec!["hadoop-yarn-server-nodemanager".into()])
        .with_builder(builder.clone());

    let report = orchestrator.compile(CompileRequest::default()).await.unwrap();

    assert_eq!(
        builder.built(),
        vec!["hadoop-common", "hadoop-yarn-api", "hadoop-yarn-server-nodemanager"]
    );
    assert_eq!(report.built.len(), 3);
    assert!(dir.path().join("jars/hadoop-yarn-api-3.4.0.jar").is_file());
}

#[tokio::test]
async fn test_compile_stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    source_tree(&dir.path().join("hadoop"));
    let builder = RecordingBuilder::failing(dir.path(), "hadoop-common");
    let (orchestrator, _) = ClusterBuilder::hadoop()
        .modules(hadoop_modules())
        .build(&dir.path().join("backups"));
    let orchestrator = orchestrator
        .with_build(build_settings(dir.path()), Vec::new())
        .with_builder(builder.clone());

    let request = CompileRequest {
        modules: vec!["hadoop-hdfs".into()],
        ..CompileRequest::default()
    };
    let err = orchestrator.compile(request).await.unwrap_err();

    assert!(matches!(err, Error::Compile { ref module, .. } if module == "hadoop-common"));
    assert_eq!(err.exit_code(), 5);
    assert_eq!(builder.built(), vec!["hadoop-common"]);
}

#[tokio::test]
async fn test_compile_changed_only_skips_unchanged_modules() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("hadoop");
    source_tree(&source);
    let (orchestrator, _) = ClusterBuilder::hadoop()
        .modules(hadoop_modules())
        .build(&dir.path().join("backups"));
    let first = RecordingBuilder::new(dir.path());
    let orchestrator = orchestrator
        .with_build(build_settings(dir.path()), vec!["hadoop-common".into()])
        .with_builder(first.clone());
    orchestrator.compile(CompileRequest::default()).await.unwrap();
    assert_eq!(first.built(), vec!["hadoop-common"]);

    let request = CompileRequest {
        changed_only: true,
        ..CompileRequest::default()
    };
    let report = orchestrator.compile(request.clone()).await.unwrap();
    assert!(report.built.is_empty());
    assert_eq!(report.unchanged, vec!["hadoop-common"]);

    std::fs::write(
        source.join("hadoop-common-project/hadoop-common/src/Configuration.java"),
        "class Configuration {}",
    )
    .unwrap();
    let report = orchestrator.compile(request).await.unwrap();
    let built: Vec<&str> = report.built.iter().map(|(m, _)| m.as_str()).collect();
    assert_eq!(built, vec!["hadoop-common"]);
}

#[tokio::test]
async fn test_compile_deploy_uploads_to_matching_roles() {
    let dir = tempfile::tempdir().unwrap();
    source_tree(&dir.path().join("hadoop"));
    let (orchestrator, connector) = ClusterBuilder::hadoop()
        .modules(hadoop_modules())
        .build(&dir.path().join("backups"));
    let orchestrator = orchestrator
        .with_build(build_settings(dir.path()), Vec::new())
        .with_builder(RecordingBuilder::new(dir.path()));

    let request = CompileRequest {
        deploy: true,
        no_copy: true,
        single: Some("hadoop-yarn-server-nodemanager".into()),
        ..CompileRequest::default()
    };
    let report = orchestrator.compile(request).await.unwrap();

    assert_eq!(report.deployed_to, vec!["nodemanager-1", "nodemanager-2"]);
    let jar = "/opt/hadoop/share/hadoop/hadoop-yarn-server-nodemanager-3.4.0.jar";
    assert!(connector.host("dn1").file(jar).is_some());
    assert!(connector.host("dn2").file(jar).is_some());
    assert!(connector.host("rm").file(jar).is_none());
    assert!(!dir.path().join("jars").exists());
}

#[test]
fn test_dependency_cycle_is_rejected() {
    let err = ModuleGraph::from_specs([
        ModuleSpec::new("a", "a").depends_on(&["b"]),
        ModuleSpec::new("b", "b").depends_on(&["a"]),
    ])
    .unwrap_err();
    assert!(matches!(err, Error::DependencyCycle { ref cycle } if cycle.len() == 3));
}
