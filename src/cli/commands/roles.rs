//! Commands working on selected roles: restart, distribute, update-config.

use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;

use super::{CommandContext, Runnable};
use crate::actions::ConfigUpdate;
use crate::error::{Error, Result};
use crate::executor::RoleOutcome;
use crate::hadoop::{HadoopConfigFile, PropertyPatch};

/// Print outcomes and the recap, also when the action failed part-way.
fn report(ctx: &CommandContext, title: &str, result: Result<Vec<RoleOutcome>>) -> Result<i32> {
    let outcomes = result?;
    for outcome in &outcomes {
        ctx.output.role_outcome(outcome);
    }
    ctx.output.recap(title, &outcomes);
    Ok(0)
}

/// Arguments for the restart-role command
#[derive(Parser, Debug, Clone)]
pub struct RestartArgs {
    /// Roles to restart (empty = all)
    #[arg(default_value = "")]
    pub selector: String,
}

#[async_trait]
impl Runnable for RestartArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let orchestrator = ctx.orchestrator().await?;
        ctx.output.banner(&format!("RESTART [{}]", self.selector));
        report(ctx, "restart", orchestrator.restart(&self.selector).await)
    }
}

/// Arguments for the distribute command
#[derive(Parser, Debug, Clone)]
pub struct DistributeArgs {
    /// Roles to distribute to (empty = all)
    #[arg(default_value = "")]
    pub selector: String,

    /// Local file to distribute; repeatable
    #[arg(short = 'f', long = "file", action = clap::ArgAction::Append)]
    pub files: Vec<PathBuf>,
}

#[async_trait]
impl Runnable for DistributeArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        if self.files.is_empty() {
            return Err(Error::validation("give at least one --file to distribute"));
        }
        let orchestrator = ctx.orchestrator().await?;
        ctx.output.banner(&format!("DISTRIBUTE [{}]", self.selector));
        report(
            ctx,
            "distribute",
            orchestrator.distribute(&self.selector, &self.files).await,
        )
    }
}

/// Arguments for the update-config command
#[derive(Parser, Debug, Clone)]
pub struct UpdateConfigArgs {
    /// Roles whose config to update (empty = all)
    #[arg(default_value = "")]
    pub selector: String,

    /// Which config file to update
    #[arg(short = 'f', long, value_enum)]
    pub file: HadoopConfigFile,

    /// Property name; repeatable, paired with --value in order
    #[arg(short = 'p', long, action = clap::ArgAction::Append)]
    pub property: Vec<String>,

    /// Property value; repeatable
    #[arg(short = 'v', long, action = clap::ArgAction::Append)]
    pub value: Vec<String>,

    /// Update the config from a local file
    #[arg(short = 's', long)]
    pub source: Option<PathBuf>,

    /// Do not back up the config file before changing it
    #[arg(short = 'n', long)]
    pub no_backup: bool,
}

impl UpdateConfigArgs {
    /// Reject mismatched property and value counts before anything else.
    pub fn validate(&self) -> Result<()> {
        PropertyPatch::zip(&self.property, &self.value)
            .map(|_| ())
            .map_err(|e| Error::validation(e.to_string()))
    }

    pub fn to_update(&self) -> ConfigUpdate {
        ConfigUpdate {
            selector: self.selector.clone(),
            file: self.file,
            properties: self.property.clone(),
            values: self.value.clone(),
            no_backup: self.no_backup,
            source: self.source.clone(),
        }
    }
}

#[async_trait]
impl Runnable for UpdateConfigArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        self.validate()?;
        let update = self.to_update();
        update.patches()?;

        let orchestrator = ctx.orchestrator().await?;
        ctx.output
            .banner(&format!("UPDATE {} [{}]", self.file, self.selector));
        report(ctx, "update-config", orchestrator.update_config(update).await)
    }
}
