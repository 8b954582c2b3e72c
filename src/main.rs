use std::sync::Arc;

use tracing::{error, info};

use silo::{Config, Database, FileSystem, WorkerPool};

#[tokio::main]
async fn main() {
    // Load configuration
    let config = match Config::load_with_env("config.toml") {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config.toml: {e}");
            eprintln!("Using default configuration.");
            let mut config = Config::default();
            config.apply_env_overrides();
            config
        }
    };

    // Initialize logging
    if let Err(e) = silo::logging::init(&config.logging) {
        eprintln!("Failed to initialize logging: {e}");
        // Fall back to console-only logging
        silo::logging::init_console_only(&config.logging.level);
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let db = match Database::open(&config.database.path).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to open database {}: {}", config.database.path, e);
            std::process::exit(1);
        }
    };

    let fs = match FileSystem::from_config(db.clone(), &config.storage) {
        Ok(fs) => Arc::new(fs),
        Err(e) => {
            error!("Failed to initialize storage: {}", e);
            std::process::exit(1);
        }
    };

    let pool = WorkerPool::new(fs, config.workers.max_concurrent);

    info!("silo - per-user file storage");
    info!(
        "Storage root {} with {} workers",
        pool.file_system().storage().root().display(),
        pool.max_workers()
    );

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
    pool.close();
    db.close().await;
}
