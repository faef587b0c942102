//! `init`: write a fresh config file.

use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;

use super::{CommandContext, Runnable};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::topology::ClusterType;

/// Arguments for the init command
#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Kind of cluster to operate
    #[arg(short = 'c', long, value_enum, ignore_case = true, default_value_t = ClusterType::Hadock)]
    pub cluster_type: ClusterType,

    /// Cloudera Manager host
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Cloudera Manager username
    #[arg(short = 'u', long, default_value = "admin")]
    pub username: String,

    /// Cloudera Manager password
    #[arg(short = 'p', long, default_value = "admin")]
    pub password: String,

    /// Path of the hadock repository
    #[arg(short = 'd', long)]
    pub hadock_path: Option<PathBuf>,
}

impl InitArgs {
    pub fn to_config(&self) -> Result<Config> {
        let config = Config::for_init(
            self.cluster_type,
            self.host.clone(),
            self.username.clone(),
            self.password.clone(),
            self.hadock_path.clone(),
        );
        config.validate().map_err(|e| match e {
            Error::Config(msg) => Error::validation(format!(
                "{} (pass it to init, see `hades init --help`)",
                msg
            )),
            other => other,
        })?;
        Ok(config)
    }
}

#[async_trait]
impl Runnable for InitArgs {
    async fn run(&self, ctx: &mut CommandContext) -> Result<i32> {
        let config = self.to_config()?;
        config.save(&ctx.config_path)?;
        ctx.output.success(&format!(
            "Wrote {} config to {}",
            self.cluster_type,
            ctx.config_path.display()
        ));
        ctx.config = config;
        Ok(0)
    }
}
