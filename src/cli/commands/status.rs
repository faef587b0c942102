//! `status` and `yarn queue`.

use async_trait::async_trait;
use clap::Parser;
use colored::Colorize;

use super::{CommandContext, Runnable};
use crate::error::Result;
use crate::topology::RoleState;

/// Arguments for the status command
#[derive(Parser, Debug, Clone, Default)]
pub struct StatusArgs {}

fn paint_state(state: &RoleState) -> String {
    match state {
        RoleState::Running => state.as_str().green().to_string(),
        RoleState::Stopped => state.as_str().red().to_string(),
        RoleState::Unknown(_) => state.as_str().yellow().to_string(),
    }
}

#[async_trait]
impl Runnable for StatusArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let orchestrator = ctx.orchestrator().await?;
        let report = orchestrator.status().await?;

        ctx.output.section("Roles");
        let rows: Vec<Vec<String>> = report
            .roles
            .iter()
            .map(|s| {
                vec![
                    s.role.clone(),
                    s.role_type.to_string(),
                    s.host.clone(),
                    paint_state(&s.state),
                ]
            })
            .collect();
        ctx.output.table(&["ROLE", "TYPE", "HOST", "STATE"], &rows);

        match &report.metrics {
            Some(m) => {
                ctx.output.section("Cluster metrics");
                ctx.output.table(
                    &["METRIC", "VALUE"],
                    &[
                        vec!["Active nodes".into(), m.active_nodes.to_string()],
                        vec!["Lost / unhealthy nodes".into(), format!("{} / {}", m.lost_nodes, m.unhealthy_nodes)],
                        vec!["Apps running".into(), m.apps_running.to_string()],
                        vec!["Apps pending".into(), m.apps_pending.to_string()],
                        vec!["Apps failed".into(), m.apps_failed.to_string()],
                        vec!["Memory (MB)".into(), format!("{} / {}", m.allocated_mb, m.total_mb)],
                        vec![
                            "VCores".into(),
                            format!("{} / {}", m.allocated_virtual_cores, m.total_virtual_cores),
                        ],
                    ],
                );
            }
            None => ctx.output.warning("ResourceManager metrics unavailable"),
        }
        Ok(0)
    }
}

/// Arguments for `yarn queue`
#[derive(Parser, Debug, Clone, Default)]
pub struct QueueArgs {}

#[async_trait]
impl Runnable for QueueArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let orchestrator = ctx.orchestrator().await?;
        let queues = orchestrator.print_queues().await?;

        let rows: Vec<Vec<String>> = queues
            .iter()
            .map(|q| {
                vec![
                    format!("{}{}", "  ".repeat(q.depth), q.name),
                    format!("{:.1}%", q.capacity),
                    format!("{:.1}%", q.used_capacity),
                    format!("{:.1}%", q.max_capacity),
                    q.state.clone().unwrap_or_default(),
                    q.num_applications.to_string(),
                ]
            })
            .collect();
        ctx.output.table(
            &["QUEUE", "CAPACITY", "USED", "MAX", "STATE", "APPS"],
            &rows,
        );
        Ok(0)
    }
}
