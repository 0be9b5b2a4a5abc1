use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    let config_path = cli::commands::config_path(cli.config.as_deref(), cli.project.as_deref());
    let config = cli::commands::load_config(&config_path, cli.project.as_deref())?;
    debug!("Using project root {}", config.project_root.display());

    let runtime = tokio::runtime::Runtime::new()?;
    match cli.command {
        Commands::Init(args) => cli::commands::init::execute(&config, &config_path, args)?,
        Commands::Analyze(args) => runtime.block_on(cli::commands::analyze::execute(&config, args))?,
        Commands::Generate(args) => runtime.block_on(cli::commands::generate::execute(config, args))?,
        Commands::Maintain(args) => runtime.block_on(cli::commands::maintain::execute(config, args))?,
        Commands::Status(args) => runtime.block_on(cli::commands::status::execute(config, args))?,
        Commands::Run => runtime.block_on(cli::commands::run::execute(config))?,
    }

    Ok(())
}
