use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::env;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use flightlink::config::{PipelineConfig, config_path};
use flightlink::db;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "flightlink")]
#[command(about = "Live flight data pipeline: polls positions and schedules, links them, and aggregates flight sessions")]
#[command(version)]
struct Cli {
    /// Path to the TOML configuration file (defaults to $FLIGHTLINK_CONFIG or ./flightlink.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run all periodic jobs and serve the read API
    Run {
        #[arg(long, default_value = "127.0.0.1")]
        interface: String,

        #[arg(long, default_value_t = 8080)]
        port: u16,

        /// Expose Prometheus metrics on this port
        #[arg(long)]
        metrics_port: Option<u16>,
    },
    /// Fetch and store a single state-vector batch
    PollStates,
    /// Fetch a single metadata batch and reconcile it
    PollMetadata,
    /// Rebuild flight sessions from linked state vectors
    Aggregate,
    /// Delete records older than the retention horizon
    Clean {
        /// Override the configured retention horizon in days
        #[arg(long)]
        days: Option<u32>,
    },
    /// Apply pending database migrations and exit
    Migrate,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();
}

fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = env::var("SENTRY_DSN").ok().filter(|dsn| !dsn.is_empty())?;
    let environment = env::var("FLIGHTLINK_ENV").unwrap_or_else(|_| "development".to_string());

    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: Some(environment.into()),
            attach_stacktrace: true,
            ..Default::default()
        },
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let _sentry = init_sentry();
    init_tracing();

    let config_file = cli.config.unwrap_or_else(config_path);
    let config = PipelineConfig::load_or_default(&config_file)
        .with_context(|| format!("Failed to load configuration from {}", config_file.display()))?;

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = db::create_pool(&database_url, 10)?;

    let applied = db::run_migrations(&pool).await?;
    info!("Database ready ({} migrations applied)", applied);

    match cli.command {
        Commands::Run {
            interface,
            port,
            metrics_port,
        } => commands::handle_run(&config, pool, interface, port, metrics_port).await,
        Commands::PollStates => commands::handle_poll_states(&config, pool).await,
        Commands::PollMetadata => commands::handle_poll_metadata(&config, pool).await,
        Commands::Aggregate => commands::handle_aggregate(&config, pool).await,
        Commands::Clean { days } => commands::handle_clean(&config, pool, days).await,
        Commands::Migrate => Ok(()),
    }
}
