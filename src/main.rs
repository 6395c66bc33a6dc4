use clap::Parser;
use sqlx::migrate::Migrator;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use starpay_core::adapters::PostgresLedgerStore;
use starpay_core::cache::{MemoryStore, RedisStore, RemoteCache};
use starpay_core::cli::{Cli, Commands, DbCommands};
use starpay_core::config::Config;
use starpay_core::health::{DependencyChecker, PostgresChecker, RemoteCacheChecker};
use starpay_core::{create_app, db, startup, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Setup logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => {
            let pool = db::create_pool(&config).await?;
            let migrator = Migrator::new(Path::new("./migrations")).await?;
            migrator.run(&pool).await?;
            tracing::info!("Database migrations completed");
            Ok(())
        }
        Commands::Config => {
            let pool = db::create_pool(&config).await?;
            let report = startup::validate_environment(&config, &pool).await?;
            report.print();
            if !report.is_valid() {
                std::process::exit(1);
            }
            Ok(())
        }
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let pool = db::create_pool(&config).await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&pool).await?;
    tracing::info!("Database migrations completed");

    let report = startup::validate_environment(&config, &pool).await?;
    report.print();

    let remote: Arc<dyn RemoteCache> = match &config.redis_url {
        Some(url) => {
            let store = RedisStore::connect(url)
                .await
                .map_err(|e| anyhow::anyhow!("redis connection failed: {e}"))?;
            tracing::info!("Connected to Redis");
            Arc::new(store)
        }
        None => {
            tracing::warn!("REDIS_URL not set, using in-process cache store");
            Arc::new(MemoryStore::new())
        }
    };

    let checkers: Vec<Box<dyn DependencyChecker>> = vec![
        Box::new(PostgresChecker::new(pool.clone())),
        Box::new(RemoteCacheChecker::new(remote.clone())),
    ];

    let store = Arc::new(PostgresLedgerStore::new(pool));
    let state = AppState::build(config.clone(), store, remote, checkers);
    let app = create_app(state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}
