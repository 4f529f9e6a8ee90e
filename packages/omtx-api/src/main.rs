use clap::{Parser, Subcommand};
use tracing::info;

use omtx_api::{AppConfig, AppState};

#[derive(Parser)]
#[command(name = "omtx-api")]
#[command(about = "GPU job orchestration API: submission, completion webhook, reconciler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP server (default if no subcommand is given).
    Serve,
    /// Validate that the configured environment and backends are
    /// reachable, then exit. Exit code is non-zero on any failure —
    /// meant for a container's readiness/startup probe.
    MigrateCheck,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::MigrateCheck => migrate_check(config).await,
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let port = config.port;
    let state = AppState::build(config).await?;

    tokio::spawn(omtx_api::reconciler::run(state.clone()));

    let router = omtx_api::build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "omtx-api listening");
    axum::serve(listener, router.into_make_service()).await?;
    Ok(())
}

async fn migrate_check(config: AppConfig) -> anyhow::Result<()> {
    info!("checking that the configured backends are reachable");
    let _state = AppState::build(config).await?;
    info!("all backends reachable");
    Ok(())
}
