//! Configuration for EmberKV
//!
//! Centralized store configuration with sensible defaults.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::ObjectCodec;
use crate::error::{EmberError, Result};
use crate::store::StoreRegistry;

/// Default debounce window between the first unflushed mutation and its flush
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(3000);

/// Configuration for a single store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Backing file. `None` makes the store memory-only and every
    /// persistence call a no-op.
    pub path: Option<PathBuf>,

    /// fsync the rewritten file before it replaces the old one
    pub sync_on_flush: bool,

    // -------------------------------------------------------------------------
    // Write Scheduling
    // -------------------------------------------------------------------------
    /// Delay between the first unflushed mutation and the flush that covers it.
    /// Zero makes every mutating call write through to disk.
    pub save_delay: Duration,

    /// Capacity of the channel that reports failed background flushes
    pub background_error_capacity: usize,

    // -------------------------------------------------------------------------
    // Shared Components
    // -------------------------------------------------------------------------
    /// Codec used for every value in the store; defaults to
    /// [`ObjectCodec::shared`]
    pub codec: Arc<ObjectCodec>,

    /// Registry flushed by [`StoreRegistry::shutdown`]
    pub registry: Arc<StoreRegistry>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            sync_on_flush: true,
            save_delay: DEFAULT_SAVE_DELAY,
            background_error_capacity: 64,
            codec: ObjectCodec::shared(),
            registry: StoreRegistry::global(),
        }
    }
}

impl StoreConfig {
    /// Create a new config builder
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> Result<()> {
        if let Some(path) = &self.path {
            if path.as_os_str().is_empty() {
                return Err(EmberError::Config("path must not be empty".into()));
            }
        }
        if self.background_error_capacity == 0 {
            return Err(EmberError::Config(
                "background_error_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for StoreConfig
#[derive(Default)]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    /// Set the backing file
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.path = Some(path.into());
        self
    }

    /// Make the store memory-only
    pub fn in_memory(mut self) -> Self {
        self.config.path = None;
        self
    }

    /// Set the debounce window
    pub fn save_delay(mut self, delay: Duration) -> Self {
        self.config.save_delay = delay;
        self
    }

    /// Set the debounce window (in milliseconds)
    pub fn save_delay_ms(mut self, ms: u64) -> Self {
        self.config.save_delay = Duration::from_millis(ms);
        self
    }

    /// Enable or disable fsync on flush
    pub fn sync_on_flush(mut self, sync: bool) -> Self {
        self.config.sync_on_flush = sync;
        self
    }

    /// Set the background error channel capacity
    pub fn background_error_capacity(mut self, capacity: usize) -> Self {
        self.config.background_error_capacity = capacity;
        self
    }

    /// Share a codec between stores
    pub fn codec(mut self, codec: Arc<ObjectCodec>) -> Self {
        self.config.codec = codec;
        self
    }

    /// Register the store with a specific shutdown registry
    pub fn registry(mut self, registry: Arc<StoreRegistry>) -> Self {
        self.config.registry = registry;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}
