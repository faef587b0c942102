use serde::Serialize;
use tracing::{instrument, warn};

use super::{finish, ActionOrchestrator};
use crate::error::{Error, Result};
use crate::executor::{ExecutionResult, ExecutionUnit, RoleOutcome, UnitOperation};
use crate::hadoop::{Application, ClusterMetrics, QueueInfo, YarnClient};
use crate::topology::{Role, RoleState, RoleType};

/// State of one role.
#[derive(Debug, Clone, Serialize)]
pub struct RoleStatus {
    pub role: String,
    pub role_type: RoleType,
    pub host: String,
    pub state: RoleState,
}

/// Output of `hades status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub roles: Vec<RoleStatus>,
    /// ResourceManager metrics, absent when it could not be reached
    pub metrics: Option<ClusterMetrics>,
}

fn role_status(role: &Role, outcome: &RoleOutcome) -> RoleStatus {
    let state = match outcome.results.first() {
        Some(result) if result.is_success() => RoleState::parse(&result.stdout),
        Some(result) => RoleState::Unknown(result.failure_detail()),
        None => RoleState::Unknown("not checked".into()),
    };
    RoleStatus {
        role: role.name.clone(),
        role_type: role.role_type.clone(),
        host: role.host.clone(),
        state,
    }
}

impl ActionOrchestrator {
    fn yarn(&self) -> Result<YarnClient> {
        let url = self.topology.resource_manager_url().ok_or_else(|| {
            Error::topology("the cluster has no ResourceManager web address")
        })?;
        YarnClient::new(url, self.command_timeout)
    }

    /// State of every role plus ResourceManager metrics. Roles whose state
    /// could not be read are reported as unknown rather than failing.
    #[instrument(skip(self))]
    pub async fn status(&self) -> Result<StatusReport> {
        let roles = self.topology.roles().to_vec();
        let timeout = self.command_timeout;
        let outcomes = self
            .fan_out(&roles, move |role, host| {
                vec![ExecutionUnit::new(role, host, UnitOperation::Status, timeout)]
            })
            .await?;

        let statuses = roles
            .iter()
            .zip(&outcomes)
            .map(|(role, outcome)| role_status(role, outcome))
            .collect();

        let metrics = match self.yarn() {
            Ok(client) => match client.cluster_metrics().await {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    warn!(error = %e, "Could not read cluster metrics");
                    None
                }
            },
            Err(_) => None,
        };

        Ok(StatusReport {
            roles: statuses,
            metrics,
        })
    }

    /// Role example applications are submitted from.
    fn submitter(&self) -> Result<&Role> {
        [
            RoleType::ResourceManager,
            RoleType::Gateway,
            RoleType::NodeManager,
        ]
        .iter()
        .find_map(|t| self.topology.first_of_type(t))
        .ok_or_else(|| Error::topology("no ResourceManager or gateway role to submit from"))
    }

    /// Submit an example application and wait for it to finish.
    ///
    /// `cmd` replaces the application's default arguments.
    #[instrument(skip(self))]
    pub async fn run_app(
        &self,
        app: Application,
        cmd: Option<&str>,
        queue: Option<&str>,
    ) -> Result<ExecutionResult> {
        let role = self.submitter()?;
        let host = self.topology.host_of(role)?;
        let command = app.command(self.topology.examples_jar(), queue, cmd);

        let unit = ExecutionUnit::new(role, host, UnitOperation::Command(command), self.app_timeout)
            .with_label(format!("run {}", app));
        let result = self.executor.execute(&unit).await;

        let outcome = RoleOutcome::new(role.name.clone(), vec![result.clone()]);
        finish("run-app", vec![outcome])?;
        Ok(result)
    }

    /// Scheduler queues of the ResourceManager, parents before children.
    #[instrument(skip(self))]
    pub async fn print_queues(&self) -> Result<Vec<QueueInfo>> {
        self.yarn()?.queues().await
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::topology::ModuleGraph;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_status_reads_state_per_role() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, connector) = cluster(dir.path());
        connector
            .host("dn2")
            .failing
            .lock()
            .push(("status datanode-2".into(), String::new()));

        let report = orchestrator.status().await.unwrap();
        let states: Vec<_> = report
            .roles
            .iter()
            .map(|s| (s.role.as_str(), s.state.clone()))
            .collect();
        assert_eq!(
            states,
            vec![
                ("namenode", RoleState::Running),
                ("datanode-1", RoleState::Running),
                ("datanode-2", RoleState::Stopped),
                ("resourcemanager", RoleState::Running),
            ]
        );
        assert!(report.metrics.is_none());
    }

    #[tokio::test]
    async fn test_run_app_uses_resourcemanager_and_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, connector) = cluster(dir.path());

        orchestrator
            .run_app(Application::Pi, Some("2 10"), Some("analytics"))
            .await
            .unwrap();

        let commands = connector.host("rm").commands.lock().clone();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains(" pi -Dmapreduce.job.queuename=analytics 2 10"));
    }

    #[tokio::test]
    async fn test_run_app_failure_is_aggregate_error() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, connector) = cluster(dir.path());
        connector
            .host("rm")
            .failing
            .lock()
            .push(("yarn jar".into(), "queue analytics does not exist".into()));

        let err = orchestrator
            .run_app(Application::Sleep, None, Some("analytics"))
            .await
            .unwrap_err();
        assert_eq!(err.failures()[0].role, "resourcemanager");
        assert!(err.failures()[0].detail.contains("does not exist"));
    }

    #[tokio::test]
    async fn test_run_app_without_submitter() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = orchestrator(
            vec![role("namenode", RoleType::NameNode, "nn")],
            ModuleGraph::empty(),
            dir.path(),
        );
        let err = orchestrator.run_app(Application::Pi, None, None).await.unwrap_err();
        assert!(matches!(err, Error::Topology(_)));
    }

    #[tokio::test]
    async fn test_queues_need_resourcemanager_url() {
        let dir = tempfile::tempdir().unwrap();
        let (orchestrator, _) = cluster(dir.path());
        assert!(matches!(
            orchestrator.print_queues().await.unwrap_err(),
            Error::Topology(_)
        ));
    }
}
