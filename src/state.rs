use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::broadcast::Broadcaster;
use crate::config::Config;
use crate::store::{MemorySessionStore, SessionStore};

/// shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// upload sessions keyed by file id
    pub store: Arc<dyn SessionStore>,
    pub broadcaster: Broadcaster,
    /// serializes session lookup and placeholder creation in init
    pub init_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// create app state backed by an in-memory session store
    ///
    /// must run inside a tokio runtime, the broadcaster spawns its loop here
    pub fn new(config: Config) -> Self {
        Self::with_store(config, Arc::new(MemorySessionStore::new()))
    }

    pub fn with_store(config: Config, store: Arc<dyn SessionStore>) -> Self {
        let interval = Duration::from_millis(config.broadcast_interval_ms);
        let broadcaster = Broadcaster::new(store.clone(), interval);
        Self {
            config,
            store,
            broadcaster,
            init_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn upload_dir(&self) -> &PathBuf {
        &self.config.upload_dir
    }
}
