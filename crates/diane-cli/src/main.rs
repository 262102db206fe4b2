use anyhow::Result;
use clap::Parser;

use diane_cli::cli::{Cli, Commands};
use diane_cli::commands;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let env_filter = cli
        .log_level
        .map(|l| l.as_filter_str().to_string())
        .unwrap_or_else(|| std::env::var("DIANE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(format!(
            "diane_cli={env_filter},diane_hub={env_filter},diane_upstream={env_filter}"
        )))
        .init();

    let mut config = diane_config::AppConfig::load(cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    match cli.command {
        Commands::Stdio => commands::serve::stdio(&config).await?,
        Commands::Http => commands::serve::http(&config).await?,
        Commands::Sse => commands::serve::sse(&config).await?,
        Commands::Serve => commands::serve::all(&config).await?,
        Commands::Servers(args) => commands::servers::execute(&config, args.command)?,
        Commands::Contexts(args) => commands::contexts::execute(&config, args.command)?,
    }

    Ok(())
}
