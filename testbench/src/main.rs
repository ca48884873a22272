use anyhow::Result;
use clap::Parser;
use common::{config::parse_config, exit};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::args::Cli;

mod args;
mod commands;

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("LOG").unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let config = match parse_config(&cli.config) {
        Ok(c) => c,
        Err(err) => {
            for line in err.lines() {
                eprintln!("{line}");
            }
            exit!(err, "Invalid configuration file {}", cli.config.display())
        }
    };

    if cli.destroy {
        commands::destroy::destroy(&cli, &config).await
    } else {
        commands::setup::setup(&cli, &config).await
    }
}
