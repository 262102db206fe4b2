pub mod contexts;
pub mod serve;
pub mod servers;

use std::sync::Arc;

use diane_storage::{Store, StoreConfig, StorePool};
use diane_upstream::{ManagerConfig, UpstreamManager};

/// Open the store at `config`'s data directory, registering the builtin
/// provider and default context if this is a first run.
pub fn open_store(config: &diane_config::AppConfig) -> anyhow::Result<Arc<Store>> {
    let pool = StorePool::new(StoreConfig::new(config.db_path()))?;
    let store = Arc::new(Store::new(pool));
    store.ensure_default_context()?;
    store.ensure_builtin_registered("clock")?;
    if store.import_legacy_json_if_empty(&config.legacy_import_path())? {
        tracing::info!("imported legacy server definitions on first run");
    }
    Ok(store)
}

pub fn new_manager(config: &diane_config::AppConfig) -> Arc<UpstreamManager> {
    UpstreamManager::new(
        default_builtins(),
        ManagerConfig {
            call_deadline: config.call_deadline(),
            backoff_initial: std::time::Duration::from_secs(config.backoff_initial_secs),
            backoff_max: std::time::Duration::from_secs(config.backoff_max_secs),
            ready_timeout: std::time::Duration::from_secs(10),
        },
    )
}

fn default_builtins() -> diane_builtin::BuiltinRegistry {
    diane_builtin::default_registry()
}
