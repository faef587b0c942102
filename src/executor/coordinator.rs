//! Fan-out of per-role work with bounded parallelism.

use futures::future::join_all;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::{ExecutionResult, ExecutionUnit, RemoteExecutor, RoleOutcome};
use crate::topology::Role;

/// Run `units` in order, stopping after the first failed one.
pub async fn run_sequence(
    executor: &RemoteExecutor,
    units: Vec<ExecutionUnit>,
) -> Vec<ExecutionResult> {
    let mut results = Vec::with_capacity(units.len());
    for unit in units {
        let result = executor.execute(&unit).await;
        let proceed = result.status.permits_next();
        results.push(result);
        if !proceed {
            break;
        }
    }
    results
}

/// Dispatches work over roles with at most `max_parallelism` roles in
/// flight. Outcomes come back in the order roles were given, no matter
/// the completion order. A failing role never cancels the others.
#[derive(Debug, Clone)]
pub struct ExecutionCoordinator {
    max_parallelism: usize,
}

impl ExecutionCoordinator {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
        }
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    /// Run `work` once per role. A worker that panics yields a failed
    /// outcome for its role; this relies on panics unwinding.
    pub async fn dispatch<F, Fut>(&self, roles: &[Role], work: F) -> Vec<RoleOutcome>
    where
        F: Fn(Role) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<ExecutionResult>> + Send + 'static,
    {
        if roles.is_empty() {
            return Vec::new();
        }

        let workers = self.max_parallelism.min(roles.len());
        let semaphore = Arc::new(Semaphore::new(workers));
        let work = Arc::new(work);

        let handles: Vec<_> = roles
            .iter()
            .cloned()
            .map(|role| {
                let semaphore = Arc::clone(&semaphore);
                let work = Arc::clone(&work);
                tokio::spawn(async move {
                    // The semaphore is never closed.
                    let _permit = semaphore.acquire_owned().await.ok();
                    work(role).await
                })
            })
            .collect();

        let outcomes: Vec<RoleOutcome> = roles
            .iter()
            .zip(join_all(handles).await)
            .map(|(role, joined)| match joined {
                Ok(results) => RoleOutcome::new(role.name.clone(), results),
                Err(e) => {
                    error!(role = %role.name, error = %e, "Worker task failed");
                    RoleOutcome::new(
                        role.name.clone(),
                        vec![ExecutionResult::failed(
                            role.name.clone(),
                            "worker",
                            format!("worker task failed: {}", e),
                        )],
                    )
                }
            })
            .collect();

        for outcome in &outcomes {
            if outcome.is_success() {
                info!(role = %outcome.role, elapsed = ?outcome.duration(), "Role finished");
            } else if let Some(failure) = outcome.failure() {
                warn!(role = %outcome.role, detail = %failure.detail, "Role failed");
            }
        }
        outcomes
    }

    /// Build units per role with `plan` and run them in sequence on each
    /// role.
    pub async fn dispatch_units<P>(
        &self,
        executor: Arc<RemoteExecutor>,
        roles: &[Role],
        plan: P,
    ) -> Vec<RoleOutcome>
    where
        P: Fn(&Role) -> Vec<ExecutionUnit> + Send + Sync + 'static,
    {
        self.dispatch(roles, move |role| {
            let units = plan(&role);
            let executor = Arc::clone(&executor);
            async move { run_sequence(&executor, units).await }
        })
        .await
    }
}

impl Default for ExecutionCoordinator {
    fn default() -> Self {
        Self::new(5)
    }
}
