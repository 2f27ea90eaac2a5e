//! Database handle: one catalog and one buffer pool, plus the optional
//! process-wide instance.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::RwLock;

use crate::buffer_pool::BufferPool;
use crate::catalog::Catalog;
use crate::error::{DbError, DbResult};
use crate::lock_manager::LockManager;
use crate::DEFAULT_PAGES;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// Maximum number of resident pages.
    pub num_pages: usize,
    /// How long a lock request may wait before its transaction is aborted.
    pub lock_timeout: Duration,
    /// Abort requests that would close a waits-for cycle.
    pub deadlock_detection: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            num_pages: DEFAULT_PAGES,
            lock_timeout: Duration::from_millis(300),
            deadlock_detection: true,
        }
    }
}

impl DatabaseConfig {
    /// Defaults overridden by `BEDROCK_NUM_PAGES`, `BEDROCK_LOCK_TIMEOUT_MS`
    /// and `BEDROCK_DEADLOCK_DETECTION`. Unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(n) = env_parse::<usize>("BEDROCK_NUM_PAGES") {
            config.num_pages = n;
        }
        if let Some(ms) = env_parse::<u64>("BEDROCK_LOCK_TIMEOUT_MS") {
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Ok(raw) = env::var("BEDROCK_DEADLOCK_DETECTION") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "on" | "yes" => config.deadlock_detection = true,
                "0" | "false" | "off" | "no" => config.deadlock_detection = false,
                other => warn!("ignoring BEDROCK_DEADLOCK_DETECTION={}", other),
            }
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {}={}", key, raw);
            None
        }
    }
}

/// Cheap to clone; clones share the same catalog and buffer pool.
#[derive(Clone)]
pub struct Database {
    catalog: Arc<Catalog>,
    buffer_pool: Arc<BufferPool>,
    config: DatabaseConfig,
}

impl Database {
    pub fn new(config: DatabaseConfig) -> Self {
        let catalog = Arc::new(Catalog::new());
        let lock_manager = LockManager::new(config.lock_timeout, config.deadlock_detection);
        let buffer_pool = Arc::new(BufferPool::new(
            config.num_pages,
            catalog.clone(),
            lock_manager,
        ));
        info!(
            "[Database::new] {} pages, lock timeout {:?}, deadlock detection {}",
            config.num_pages, config.lock_timeout, config.deadlock_detection
        );
        Self {
            catalog,
            buffer_pool,
            config,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.buffer_pool
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }
}

static GLOBAL: RwLock<Option<Database>> = parking_lot::const_rwlock(None);

/// Installs a fresh process-wide database, replacing any existing one.
pub fn init(config: DatabaseConfig) -> Database {
    let db = Database::new(config);
    *GLOBAL.write() = Some(db.clone());
    db
}

/// The process-wide database, if [`init`] has been called.
pub fn get() -> DbResult<Database> {
    GLOBAL
        .read()
        .clone()
        .ok_or_else(|| DbError::Db("database not initialized".to_string()))
}

/// Replaces the process-wide buffer pool and catalog, e.g. to change the
/// pool size between tests.
pub fn reset(config: DatabaseConfig) -> Database {
    init(config)
}

pub fn teardown() {
    *GLOBAL.write() = None;
}
