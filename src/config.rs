//! Engine configuration.
//!
//! Values come from an optional `autobind.{toml,json,yaml}` file layered under
//! `AUTOBIND_*` environment variables. Every field has a default, so an empty
//! environment yields a working configuration.

use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::Result;

/// Which task runner a bound tree uses for user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunnerKind {
    /// Runs each task on the thread that first waits for it.
    Inline,
    /// Shared fixed-parallelism worker pool.
    Pool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub runner: RunnerKind,
    pub pool_parallelism: usize,
    pub delay_quantum_ms: u64,
    pub cancel_timeout_ms: u64,
    pub history_capacity: usize,
    pub history_renumber_factor: usize,
    pub max_value_length: usize,
    pub store: StoreKind,
    pub store_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            runner: RunnerKind::Pool,
            pool_parallelism: 4,
            delay_quantum_ms: 200,
            cancel_timeout_ms: 1000,
            history_capacity: 10,
            history_renumber_factor: 100,
            max_value_length: 8192,
            store: StoreKind::Memory,
            store_path: None,
        }
    }
}

impl EngineConfig {
    /// Load `<name>.*` (if present) and `AUTOBIND_*` overrides.
    pub fn load(name: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(name).required(false))
            .add_source(Environment::with_prefix("AUTOBIND"))
            .build()?;
        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        use crate::error::AutobindError;
        if self.pool_parallelism == 0 {
            return Err(AutobindError::Config("pool_parallelism must be at least 1".into()));
        }
        if self.history_capacity == 0 {
            return Err(AutobindError::Config("history_capacity must be at least 1".into()));
        }
        if self.history_renumber_factor == 0 {
            return Err(AutobindError::Config("history_renumber_factor must be at least 1".into()));
        }
        Ok(())
    }
}
