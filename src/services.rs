//! Shared engine services handed to every bound tree.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::{error, info};

use crate::config::{EngineConfig, RunnerKind, StoreKind};
use crate::delay::DelayQueue;
use crate::error::{AutobindError, Result};
use crate::persist::{PersistenceMode, SqliteStore};
use crate::store::{MemoryStore, ValueStore};
use crate::task::{InlineRunner, SharedPool, TaskRunner};

/// Receives failures of user code: the context name and the error.
pub type ErrorHook = Arc<dyn Fn(&str, &AutobindError) + Send + Sync>;

pub struct Services {
    config: EngineConfig,
    pool: Arc<SharedPool>,
    delay: Arc<DelayQueue>,
    store: Arc<dyn ValueStore>,
    error_hook: RwLock<ErrorHook>,
    next_tree: AtomicU64,
}

fn log_error(context: &str, e: &AutobindError) {
    error!(context, error = %e, "user code failed");
}

impl Services {
    /// Creates services with the store the configuration asks for.
    pub fn new(config: EngineConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let store: Arc<dyn ValueStore> = match config.store {
            StoreKind::Memory => Arc::new(MemoryStore::new(config.max_value_length)),
            StoreKind::Sqlite => {
                let mode = match &config.store_path {
                    Some(path) => PersistenceMode::File(path.clone()),
                    None => PersistenceMode::InMemory,
                };
                Arc::new(SqliteStore::open(mode, config.max_value_length)?)
            }
        };
        Ok(Self::with_store(config, store))
    }

    pub fn with_store(config: EngineConfig, store: Arc<dyn ValueStore>) -> Arc<Self> {
        info!(runner = ?config.runner, store = ?config.store, "services created");
        Arc::new(Self {
            pool: SharedPool::new(config.pool_parallelism),
            delay: DelayQueue::new(Duration::from_millis(config.delay_quantum_ms)),
            store,
            error_hook: RwLock::new(Arc::new(log_error)),
            next_tree: AtomicU64::new(1),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
    pub fn pool(&self) -> &Arc<SharedPool> {
        &self.pool
    }
    pub fn delay_queue(&self) -> &Arc<DelayQueue> {
        &self.delay
    }
    pub fn store(&self) -> Arc<dyn ValueStore> {
        Arc::clone(&self.store)
    }

    pub fn set_error_hook<F>(&self, hook: F)
    where
        F: Fn(&str, &AutobindError) + Send + Sync + 'static,
    {
        if let Ok(mut current) = self.error_hook.write() {
            *current = Arc::new(hook);
        }
    }

    pub fn report(&self, context: &str, e: &AutobindError) {
        let hook = self
            .error_hook
            .read()
            .map(|h| Arc::clone(&h))
            .unwrap_or_else(|_| Arc::new(log_error));
        hook(context, e);
    }

    /// A runner for a new tree: a lease on the shared pool, or an inline
    /// runner.
    pub fn tree_runner(&self) -> Arc<dyn TaskRunner> {
        match self.config.runner {
            RunnerKind::Pool => Arc::new(self.pool.acquire()),
            RunnerKind::Inline => Arc::new(InlineRunner::new(Duration::from_millis(self.config.cancel_timeout_ms))),
        }
    }

    pub(crate) fn next_tree_id(&self) -> u64 {
        self.next_tree.fetch_add(1, Ordering::SeqCst)
    }
}
