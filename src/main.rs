//! Tabular pipeline entry point

use clap::Parser;
use tabular_pipeline::cli::{cmd_process, cmd_serve, cmd_test, cmd_train, Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tabular_pipeline=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { host, port }) => cmd_serve(host, port).await?,
        Some(Commands::Process { config }) => cmd_process(&config)?,
        Some(Commands::Train { config, tracking_dir }) => cmd_train(&config, &tracking_dir)?,
        Some(Commands::Test { config }) => cmd_test(&config)?,
        None => cmd_serve(None, None).await?,
    }

    Ok(())
}
