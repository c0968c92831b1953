pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod export;
pub mod feedback;
pub mod filter;
pub mod migrations;
pub mod poller;
pub mod retry;
pub mod service;
pub mod source;
pub mod state;
pub mod storage;
pub mod types;

use tracing::info;
use tracing_subscriber::EnvFilter;

pub use config::ApiConfig;
pub use error::{ApiError, Error, Result};
pub use poller::NotificationPoller;
pub use service::ApiService;

/// Initialize structured logging with tracing.
/// Respects RUST_LOG env var; defaults to `info` level for the finflagger crate.
/// Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("finflagger=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

/// Load `.env`, open local storage and build the service described by the
/// environment.
pub fn bootstrap() -> Result<ApiService> {
    dotenvy::dotenv().ok();
    let config = ApiConfig::from_env();
    bootstrap_with(&config)
}

pub fn bootstrap_with(config: &ApiConfig) -> Result<ApiService> {
    let pool = db::create_pool(&config.db_path())?;
    db::init_db(&pool)?;
    let applied = migrations::run_pending(&pool)?;
    info!(
        db = %config.db_path().display(),
        migrations = applied.len(),
        mock = config.use_mock_data,
        "Local storage ready"
    );
    ApiService::from_config(config, storage::LocalStorage::new(pool))
}
