//! paneltrack-ingest - comic import microservice
//!
//! Scans folders of comic archives, identifies them against the local and
//! external catalogs and commits approved files into the library.
//! Default port: 5730.

use anyhow::{Context, Result};
use clap::Parser;
use paneltrack_common::config::{config_file_path, load_toml_config, resolve_root_folder};
use paneltrack_common::events::EventBus;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use paneltrack_ingest::config::{
    resolve_comicvine_api_key, resolve_scoring_config, IngestConfig, ScoringConfigHandle,
    DEFAULT_PORT,
};
use paneltrack_ingest::services::{
    ComicVineClient, DisabledCatalog, ExternalCatalog, FileScanner, LocalFileSystem,
    RequestScheduler,
};
use paneltrack_ingest::{AppState, Collaborators};

const CONFIG_FILE_NAME: &str = "paneltrack-ingest.toml";
const DATABASE_FILE_NAME: &str = "paneltrack.db";

#[derive(Debug, Parser)]
#[command(name = "paneltrack-ingest", version, about = "Comic import service")]
struct Args {
    /// TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Data folder holding the database
    #[arg(long)]
    root_folder: Option<PathBuf>,

    #[arg(long)]
    bind_address: Option<String>,

    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = match config_file_path(args.config.as_deref(), CONFIG_FILE_NAME) {
        Some(path) => load_toml_config(&path)?,
        None => Default::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&toml_config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting paneltrack-ingest");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &toml_config);
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;

    let db_path = root_folder.join(DATABASE_FILE_NAME);
    info!("Database: {}", db_path.display());
    let db_pool = paneltrack_ingest::db::init_database_pool(&db_path).await?;

    let interrupted = paneltrack_ingest::db::batches::cleanup_interrupted_batches(&db_pool).await?;
    if interrupted > 0 {
        warn!(count = interrupted, "Batches interrupted by the previous shutdown reset to ready");
    }

    let config = IngestConfig::from_toml(&toml_config, &root_folder);
    info!("Library root: {}", config.library_root.display());

    let scoring = ScoringConfigHandle::new(resolve_scoring_config(&db_pool, &toml_config).await?);

    let api_key = resolve_comicvine_api_key(&db_pool, &toml_config).await?;
    let external_enabled = api_key.is_some();
    let external: Arc<dyn ExternalCatalog> = match api_key {
        Some(key) => {
            let scheduler = Arc::new(RequestScheduler::new(&config.external));
            Arc::new(ComicVineClient::new(key, &config.external, scheduler)?)
        }
        None => Arc::new(DisabledCatalog),
    };

    let event_bus = EventBus::new(256);
    let service = paneltrack_ingest::build_service(
        db_pool.clone(),
        event_bus.clone(),
        config,
        scoring,
        Collaborators {
            external,
            fs: Arc::new(LocalFileSystem::new(FileScanner::new())),
        },
    );

    let state = AppState::new(db_pool, event_bus, service.clone(), external_enabled);
    state.track_job_failures();
    let app = paneltrack_ingest::build_router(state);

    let bind_address = args
        .bind_address
        .or(toml_config.bind_address)
        .unwrap_or_else(|| "127.0.0.1".to_string());
    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let addr = format!("{}:{}", bind_address, port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested, stopping jobs");
            service.orchestrator().cancel_all().await;
        })
        .await?;

    Ok(())
}
