use once_cell::sync::OnceCell;

use crate::buffer_pool::BufferPool;
use crate::config::Config;
use crate::lock_manager::LockManager;
use crate::page_store::{MemPageStore, PageStore};

static GLOBAL: OnceCell<Database> = OnceCell::new();

/// The composition root: owns a `Config` and the `BufferPool` built
/// from it. `Database::new` is the primary entry point for callers
/// that want an isolated instance (most tests do, to avoid
/// interfering with each other); `Database::global()` exists only for
/// callers that genuinely want a single process-wide instance.
pub struct Database {
    config: Config,
    buffer_pool: BufferPool,
}

impl Database {
    pub fn new(config: Config, store: Box<dyn PageStore>) -> Self {
        let lock_manager = LockManager::new(config.lock_timeout);
        let buffer_pool = BufferPool::new(config.capacity, lock_manager, store);
        Self {
            config,
            buffer_pool,
        }
    }

    /// The process-global default instance: an in-memory `MemPageStore`
    /// sized per `Config::default()`. Built lazily on first access.
    pub fn global() -> &'static Database {
        GLOBAL.get_or_init(|| {
            let config = Config::default();
            let store = Box::new(MemPageStore::new(config.page_size, 64));
            Database::new(config, store)
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }
}
