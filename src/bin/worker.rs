use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use orgfiles::{
    config::AppConfig, db, default_handlers, state::AppState, storage::TenantStorage,
    store::PgStore, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        storage_root = %config.storage_root.display(),
        max_attempts = config.job_max_attempts,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let storage = TenantStorage::new(&config.storage_root)?;
    let store = Arc::new(PgStore::new(pool));
    let poll_interval = config.worker_poll_interval;

    let state = Arc::new(AppState::new(config, store.clone(), store, storage)?);
    let worker = Worker::new(state, default_handlers(), poll_interval);

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
