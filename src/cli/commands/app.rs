//! `run-app` and `run-script`.

use async_trait::async_trait;
use clap::Parser;

use super::{CommandContext, Runnable};
use crate::error::Result;
use crate::executor::RoleOutcome;
use crate::hadoop::Application;
use crate::script::Script;

/// Arguments for the run-app command
#[derive(Parser, Debug, Clone)]
pub struct RunAppArgs {
    /// Application to run
    #[arg(value_enum, ignore_case = true)]
    pub app: Application,

    /// Arguments replacing the application's defaults
    #[arg(short = 'c', long)]
    pub cmd: Option<String>,

    /// Queue the application is submitted to
    #[arg(short = 'q', long)]
    pub queue: Option<String>,
}

#[async_trait]
impl Runnable for RunAppArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let orchestrator = ctx.orchestrator().await?;
        ctx.output.banner(&format!("RUN {}", self.app));

        let result = orchestrator
            .run_app(self.app, self.cmd.as_deref(), self.queue.as_deref())
            .await?;
        let outcome = RoleOutcome::new(result.role.clone(), vec![result]);
        ctx.output.role_outcome(&outcome);
        ctx.output.recap("run-app", &[outcome]);
        Ok(0)
    }
}

/// Arguments for the run-script command
#[derive(Parser, Debug, Clone)]
pub struct RunScriptArgs {
    /// Script name in the scripts directory, or a path
    pub script: String,
}

#[async_trait]
impl Runnable for RunScriptArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let script = Script::load(&ctx.config.scripts_dir, &self.script)?;
        let orchestrator = ctx.orchestrator().await?;

        ctx.output.banner(&format!("SCRIPT [{}]", script.name));
        script.run(&orchestrator).await?;
        ctx.output
            .success(&format!("Script {} finished ({} steps)", script.name, script.steps.len()));
        Ok(0)
    }
}
