//! `compile`: build Hadoop modules and optionally deploy them.

use async_trait::async_trait;
use clap::Parser;

use super::{CommandContext, Runnable};
use crate::actions::CompileRequest;
use crate::error::Result;

/// Arguments for the compile command
#[derive(Parser, Debug, Clone)]
pub struct CompileArgs {
    /// Compile only the changed modules
    #[arg(short = 'c', long)]
    pub changed: bool,

    /// Deploy the compiled modules to the cluster
    #[arg(short = 'd', long)]
    pub deploy: bool,

    /// Do not copy the compiled jars to the hadoop jar path
    #[arg(short = 'n', long)]
    pub no_copy: bool,

    /// Add a module to the aggregated compilation; repeatable
    #[arg(short = 'm', long, action = clap::ArgAction::Append)]
    pub module: Vec<String>,

    /// Only compile this module
    #[arg(short = 's', long)]
    pub single: Option<String>,
}

impl CompileArgs {
    pub fn to_request(&self) -> CompileRequest {
        CompileRequest {
            changed_only: self.changed,
            deploy: self.deploy,
            modules: self.module.clone(),
            no_copy: self.no_copy,
            single: self.single.clone(),
        }
    }
}

#[async_trait]
impl Runnable for CompileArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let orchestrator = ctx.orchestrator().await?;
        ctx.output.banner("COMPILE");

        let spinner = ctx.output.create_spinner("Compiling modules");
        let result = orchestrator.compile(self.to_request()).await;
        spinner.finish_and_clear();
        let report = result?;

        if report.built.is_empty() {
            ctx.output.success("Nothing to compile, all modules are up to date");
            return Ok(0);
        }
        let rows: Vec<Vec<String>> = report
            .built
            .iter()
            .map(|(module, jar)| vec![module.clone(), jar.display().to_string()])
            .collect();
        ctx.output.table(&["MODULE", "ARTIFACT"], &rows);
        if !report.unchanged.is_empty() {
            ctx.output
                .info(&format!("Unchanged: {}", report.unchanged.join(", ")));
        }
        if !report.deployed_to.is_empty() {
            ctx.output
                .success(&format!("Deployed to {}", report.deployed_to.join(", ")));
        }
        Ok(0)
    }
}
