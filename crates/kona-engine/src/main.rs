use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use kona_core::config::KonaConfig;
use kona_events::{EventBus, Heartbeat};
use kona_scheduler::{PollTick, Scheduler};
use kona_store::SqliteStore;
use tracing::info;

mod app;
mod handlers;
mod http;

#[derive(Debug, Parser)]
#[command(name = "kona-engine", version, about = "Kona job engine")]
struct Cli {
    /// Path to kona.toml (falls back to KONA_CONFIG, then ~/.kona/kona.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kona_engine=info,kona_scheduler=info,tower_http=debug".into()),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > KONA_CONFIG env > ~/.kona/kona.toml
    let config_path = cli.config.or_else(|| std::env::var("KONA_CONFIG").ok());
    let config = KonaConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        KonaConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");

    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
    let store = Arc::new(SqliteStore::new(db)?);
    info!("database ready");

    let events = Arc::new(EventBus::new());
    let scheduler = Arc::new(Scheduler::new(
        config.scheduler.clone(),
        &config.system,
        store,
        events,
    ));
    // Unknown handler references and malformed static jobs abort startup.
    scheduler.init(&handlers::catalog())?;

    let heartbeat = Arc::new(Heartbeat::new());
    heartbeat.subscribe(
        "scheduler",
        config.scheduler.frequency,
        Arc::new(PollTick(Arc::clone(&scheduler))),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let heartbeat_task = tokio::spawn(Arc::clone(&heartbeat).run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.http.bind, config.http.port).parse()?;
    let state = Arc::new(app::AppState::new(config, Arc::clone(&scheduler)));
    let router = app::build_router(state);

    info!("Kona engine listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    // stop the heartbeat so no new polls start
    let _ = shutdown_tx.send(true);
    let _ = heartbeat_task.await;
    Ok(())
}

fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
