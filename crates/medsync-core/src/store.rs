//! Unified entry point
//!
//! The `Store` opens the local database once and hands the same
//! `Arc<LocalStore>` to every component:
//! - Cache Manager (read fallback)
//! - Outbox Queue (pending writes)
//! - Draft store (form autosave)
//!
//! ## Usage
//!
//! ```ignore
//! let store = Store::open()?;
//!
//! store.outbox().enqueue(NewMutation::new("beds", "/beds/assign", "POST", payload))?;
//!
//! let engine = store.http_drain_engine()?;
//! let report = engine.drain().await?;
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::cache::CacheManager;
use crate::config::Config;
use crate::counter::{spawn_live_counter, LiveCounterConfig, LiveCounterHandle};
use crate::drafts::{spawn_autosave, AutosaveHandle, DraftStore};
use crate::outbox::OutboxQueue;
use crate::storage::LocalStore;
use crate::sync::{DrainEngine, HttpTransport, SenderRegistry};

/// Shared handles over one local database
#[derive(Clone)]
pub struct Store {
    config: Config,
    local: Arc<LocalStore>,
    cache: CacheManager,
    outbox: OutboxQueue,
    drafts: DraftStore,
}

impl Store {
    /// Open the store using the default configuration sources
    pub fn open() -> Result<Self> {
        let config = Config::load().context("Failed to load configuration")?;
        Self::open_with_config(config)
    }

    /// Open the store with a specific configuration
    pub fn open_with_config(config: Config) -> Result<Self> {
        let local = LocalStore::open(&config).with_context(|| {
            format!(
                "Failed to open database at {}",
                config.database_path().display()
            )
        })?;
        debug!(path = %config.database_path().display(), "store opened");
        Ok(Self::from_parts(config, Arc::new(local)))
    }

    /// In-memory store with default configuration
    pub fn open_in_memory() -> Result<Self> {
        let local = LocalStore::open_in_memory().context("Failed to open in-memory database")?;
        Ok(Self::from_parts(Config::default(), Arc::new(local)))
    }

    fn from_parts(config: Config, local: Arc<LocalStore>) -> Self {
        Self {
            cache: CacheManager::new(local.clone()),
            outbox: OutboxQueue::new(local.clone()),
            drafts: DraftStore::new(local.clone()),
            local,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn local(&self) -> &Arc<LocalStore> {
        &self.local
    }

    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    pub fn outbox(&self) -> &OutboxQueue {
        &self.outbox
    }

    pub fn drafts(&self) -> &DraftStore {
        &self.drafts
    }

    /// HTTP transport built from the configured base URL and token
    pub fn http_transport(&self) -> Result<Arc<HttpTransport>> {
        Ok(Arc::new(HttpTransport::from_config(&self.config)?))
    }

    /// Drain engine over this outbox with a caller-supplied registry
    pub fn drain_engine(&self, registry: SenderRegistry) -> DrainEngine {
        DrainEngine::new(self.outbox.clone(), registry)
    }

    /// Drain engine with the built-in HTTP senders
    pub fn http_drain_engine(&self) -> Result<DrainEngine> {
        let transport = self.http_transport()?;
        Ok(self.drain_engine(SenderRegistry::with_http_defaults(transport)))
    }

    /// Start a live counter using the configured poll interval
    ///
    /// Must be called from within a Tokio runtime.
    pub fn live_counter(&self, whitelist: Option<Vec<String>>) -> LiveCounterHandle {
        let config = LiveCounterConfig {
            whitelist,
            poll_interval: self.config.counter_poll_interval(),
        };
        spawn_live_counter(self.outbox.clone(), config)
    }

    /// Start autosaving a form slot using the configured quiet period
    ///
    /// Must be called from within a Tokio runtime.
    pub fn autosave(&self, collection: &str, key: &str) -> AutosaveHandle {
        spawn_autosave(
            self.drafts.clone(),
            collection,
            key,
            self.config.autosave_quiet_period(),
        )
    }
}
