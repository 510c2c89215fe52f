pub mod analyzer;
pub mod config;
pub mod error;
pub mod history;
pub mod session;
pub mod storage;

use std::sync::Arc;

pub use config::{AppConfig, Provider};
pub use error::WeldMasterError;
pub use history::{HistoryEntry, SavedMachineEntry};
pub use session::{SessionController, SessionSettings, SessionSnapshot};

use analyzer::AiAdvisor;
use session::CapabilityProvider;
use storage::{PersistentStore, SqliteBackend};

/// Install the global tracing subscriber, filtered by `RUST_LOG` (default
/// `info`). Later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init();
}

/// Build a session backed by the on-disk store and the configured provider.
pub fn open_session(
    config: &AppConfig,
    capability: Arc<dyn CapabilityProvider>,
) -> Result<SessionController, WeldMasterError> {
    let api_key = config::load_api_key(config.provider).unwrap_or_default();
    let advisor = AiAdvisor::from_config(config, api_key)?;

    let db_path = config
        .store_path()
        .map_err(|e| WeldMasterError::Config(e.to_string()))?;
    let backend = SqliteBackend::open(&db_path, config.storage_quota_bytes)?;

    Ok(SessionController::new(
        Arc::new(advisor),
        capability,
        PersistentStore::new(backend),
        SessionSettings::from_config(config),
    ))
}
