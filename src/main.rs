//! Hades - Hadoop cluster operations.
//!
//! Entry point of the `hades` CLI.

use std::time::Instant;

use anyhow::Context;
use tracing::{debug, info};

use hades::cli::commands::{CommandContext, Runnable};
use hades::cli::output::{format_duration, OutputFormatter};
use hades::cli::{Cli, Commands, YarnCommand};
use hades::config::{Config, LoggingSettings};
use hades::telemetry::LoggingBuilder;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse_args();
    let output = OutputFormatter::new(!cli.no_color, cli.verbosity());

    let loaded = if cli.needs_config() {
        Some(Config::load(&cli.config))
    } else {
        None
    };
    let logging = match &loaded {
        Some(Ok(config)) => config.logging.clone(),
        _ => LoggingSettings::default(),
    };
    LoggingBuilder::from_settings(&logging)
        .with_verbosity(cli.debug, cli.verbose)
        .with_ansi(output.use_color())
        .init()
        .context("failed to initialize logging")?;
    debug!(version = VERSION, command = cli.command_name(), "Starting hades");

    let mut config = match loaded {
        Some(Ok(config)) => config,
        Some(Err(e)) => {
            output.error(&e.to_string());
            std::process::exit(e.exit_code());
        }
        None => Config::default(),
    };
    if let Some(forks) = cli.forks {
        config.execution.forks = forks.max(1);
    }

    let started = Instant::now();
    let mut ctx = CommandContext::new(config, cli.config.clone(), output);
    let result = match &cli.command {
        Commands::Compile(args) => args.run(&mut ctx).await,
        Commands::Init(args) => args.run(&mut ctx).await,
        Commands::Log(args) => args.run(&mut ctx).await,
        Commands::Distribute(args) => args.run(&mut ctx).await,
        Commands::Status(args) => args.run(&mut ctx).await,
        Commands::RunApp(args) => args.run(&mut ctx).await,
        Commands::RunScript(args) => args.run(&mut ctx).await,
        Commands::UpdateConfig(args) => args.run(&mut ctx).await,
        Commands::RestartRole(args) => args.run(&mut ctx).await,
        Commands::Yarn(YarnCommand::Queue(args)) => args.run(&mut ctx).await,
    };
    ctx.close_connections().await;

    match result {
        Ok(code) => {
            info!(
                command = cli.command_name(),
                elapsed = %format_duration(started.elapsed()),
                "Finished"
            );
            std::process::exit(code);
        }
        Err(e) => {
            ctx.output.error(&e.to_string());
            if matches!(e, hades::Error::ConfigSetup(_)) {
                ctx.output.hint("Run `hades init` to create a config file");
            }
            std::process::exit(e.exit_code());
        }
    }
}
