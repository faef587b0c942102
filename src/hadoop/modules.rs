//! Built-in catalogue of Hadoop source modules.
//!
//! Entries from the config file with the same name replace these.

use crate::topology::{ModuleSpec, RoleType};

const HDFS_ROLES: &[RoleType] = &[
    RoleType::NameNode,
    RoleType::SecondaryNameNode,
    RoleType::JournalNode,
    RoleType::DataNode,
];

/// Modules hades knows about without any configuration, dependencies first.
pub fn builtin_modules() -> Vec<ModuleSpec> {
    use RoleType::*;

    vec![
        ModuleSpec::new("hadoop-common", "hadoop-common-project/hadoop-common"),
        ModuleSpec::new("hadoop-hdfs-client", "hadoop-hdfs-project/hadoop-hdfs-client")
            .depends_on(&["hadoop-common"]),
        ModuleSpec::new("hadoop-hdfs", "hadoop-hdfs-project/hadoop-hdfs")
            .depends_on(&["hadoop-common", "hadoop-hdfs-client"])
            .for_roles(HDFS_ROLES),
        ModuleSpec::new(
            "hadoop-yarn-api",
            "hadoop-yarn-project/hadoop-yarn/hadoop-yarn-api",
        )
        .depends_on(&["hadoop-common"]),
        ModuleSpec::new(
            "hadoop-yarn-common",
            "hadoop-yarn-project/hadoop-yarn/hadoop-yarn-common",
        )
        .depends_on(&["hadoop-yarn-api"]),
        ModuleSpec::new(
            "hadoop-yarn-client",
            "hadoop-yarn-project/hadoop-yarn/hadoop-yarn-client",
        )
        .depends_on(&["hadoop-yarn-common"]),
        ModuleSpec::new(
            "hadoop-yarn-server-common",
            "hadoop-yarn-project/hadoop-yarn/hadoop-yarn-server/hadoop-yarn-server-common",
        )
        .depends_on(&["hadoop-yarn-common"])
        .for_roles(&[ResourceManager, NodeManager]),
        ModuleSpec::new(
            "hadoop-yarn-server-resourcemanager",
            "hadoop-yarn-project/hadoop-yarn/hadoop-yarn-server/hadoop-yarn-server-resourcemanager",
        )
        .depends_on(&["hadoop-yarn-server-common"])
        .for_roles(&[ResourceManager]),
        ModuleSpec::new(
            "hadoop-yarn-server-nodemanager",
            "hadoop-yarn-project/hadoop-yarn/hadoop-yarn-server/hadoop-yarn-server-nodemanager",
        )
        .depends_on(&["hadoop-yarn-server-common"])
        .for_roles(&[NodeManager]),
        ModuleSpec::new(
            "hadoop-mapreduce-client-core",
            "hadoop-mapreduce-project/hadoop-mapreduce-client/hadoop-mapreduce-client-core",
        )
        .depends_on(&["hadoop-yarn-common"])
        .for_roles(&[NodeManager, JobHistoryServer]),
        ModuleSpec::new(
            "hadoop-mapreduce-client-app",
            "hadoop-mapreduce-project/hadoop-mapreduce-client/hadoop-mapreduce-client-app",
        )
        .depends_on(&["hadoop-mapreduce-client-core"])
        .for_roles(&[NodeManager]),
        ModuleSpec::new(
            "hadoop-mapreduce-client-hs",
            "hadoop-mapreduce-project/hadoop-mapreduce-client/hadoop-mapreduce-client-hs",
        )
        .depends_on(&["hadoop-mapreduce-client-core"])
        .for_roles(&[JobHistoryServer]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::ModuleGraph;

    #[test]
    fn test_catalogue_forms_a_dag() {
        let graph = ModuleGraph::from_specs(builtin_modules()).unwrap();
        let order = graph
            .topological_order(&graph.names().collect::<Vec<_>>())
            .unwrap();
        assert_eq!(order.first().map(String::as_str), Some("hadoop-common"));
        assert_eq!(order.len(), graph.len());
    }

    #[test]
    fn test_resourcemanager_pulls_in_yarn_chain() {
        let graph = ModuleGraph::from_specs(builtin_modules()).unwrap();
        let expanded = graph
            .with_dependencies(&["hadoop-yarn-server-resourcemanager"])
            .unwrap();
        assert_eq!(
            expanded,
            vec![
                "hadoop-common",
                "hadoop-yarn-api",
                "hadoop-yarn-common",
                "hadoop-yarn-server-common",
                "hadoop-yarn-server-resourcemanager",
            ]
        );
    }
}
