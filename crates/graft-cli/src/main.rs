//! Graft CLI - run a plugin host, install plugins and inspect import graphs

mod cli;
mod commands;
mod console;
mod context;
mod error;

use std::time::Duration;

use clap::Parser;
use cli::Cli;
use context::HostContext;
use error::CliResult;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(run_command_async(cli));
    // stdin reads run on a blocking thread that never returns on its own
    rt.shutdown_timeout(Duration::from_millis(250));

    result.map_err(|report| anyhow::anyhow!("{report:?}"))
}

async fn run_command_async(cli: Cli) -> CliResult<()> {
    use cli::Commands;

    let ctx = HostContext::load(cli.config.as_deref(), cli.root)?;

    match cli.command {
        Commands::Run { plugins, no_watch } => {
            commands::run::run(&ctx, &plugins, !no_watch).await?;
        }

        Commands::Install { specifiers } => {
            commands::install::run(&ctx, &specifiers).await?;
        }

        Commands::Uninstall { name } => {
            commands::uninstall::run(&ctx, &name).await?;
        }

        Commands::List { json } => {
            commands::list::run(&ctx, json)?;
        }

        Commands::Graph { entry } => {
            commands::graph::run(&ctx, &entry)?;
        }
    }

    Ok(())
}
