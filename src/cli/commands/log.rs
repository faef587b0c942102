//! `log`: print or follow role logs.

use async_trait::async_trait;
use clap::Parser;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{CommandContext, Runnable};
use crate::error::Result;
use crate::logs::{LineFilter, LogAggregator, LogMode};
use crate::selector;

/// Lines printed per role when neither --tail nor --follow is given.
pub const DEFAULT_TAIL: usize = 100;

/// Arguments for the log command
#[derive(Parser, Debug, Clone)]
pub struct LogArgs {
    /// Roles whose logs to read
    pub selector: String,

    /// Follow the log files instead of just reading them
    #[arg(short = 'f', long)]
    pub follow: bool,

    /// Only read the last N lines
    #[arg(short = 't', long)]
    pub tail: Option<usize>,

    /// Only show lines containing this substring
    #[arg(short = 'g', long)]
    pub grep: Option<String>,
}

impl LogArgs {
    pub fn mode(&self) -> LogMode {
        if self.follow {
            LogMode::Follow { backlog: self.tail }
        } else {
            LogMode::Tail(self.tail.unwrap_or(DEFAULT_TAIL))
        }
    }
}

#[async_trait]
impl Runnable for LogArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let orchestrator = ctx.orchestrator().await?;
        let roles = selector::resolve(&self.selector, orchestrator.topology())?;
        let targets = roles
            .into_iter()
            .map(|role| {
                let host = orchestrator.topology().host_of(&role)?.clone();
                Ok((role, host))
            })
            .collect::<Result<Vec<_>>>()?;

        let aggregator = LogAggregator::new(orchestrator.executor().clone(), &ctx.config.logs)
            .with_timeout(ctx.config.execution.command_timeout)
            .with_parallelism(ctx.config.execution.forks);

        let cancel = CancellationToken::new();
        let interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, closing log streams");
                interrupt.cancel();
            }
        });

        let filter = self.grep.clone().map(LineFilter::new);
        let mut lines = aggregator.stream(targets, self.mode(), filter, cancel);
        while let Some(line) = lines.next().await {
            ctx.output.log_line(&line.role, &line.line);
        }
        ctx.output.flush();
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection() {
        let args = LogArgs::try_parse_from(["log", "namenode"]).unwrap();
        assert_eq!(args.mode(), LogMode::Tail(DEFAULT_TAIL));

        let args = LogArgs::try_parse_from(["log", "namenode", "-t", "20"]).unwrap();
        assert_eq!(args.mode(), LogMode::Tail(20));

        let args = LogArgs::try_parse_from(["log", "namenode", "-f"]).unwrap();
        assert_eq!(args.mode(), LogMode::Follow { backlog: None });
    }
}
