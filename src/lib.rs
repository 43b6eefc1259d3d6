//! # EmberKV
//!
//! An embedded key-value persistence engine with:
//! - Typed values behind byte-sequence keys
//! - Debounced, coalesced rewrites of a single backing file
//! - A registry-driven binary codec framed with compact varints
//! - Process-wide shutdown flushing of every live store
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Callers                               │
//! │              (any number of threads)                         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ get / put / get_and_put / delete
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Store                                 │
//! │              (RwLock<HashMap<Key, Value>>)                   │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │ on_mutation                      │ flush
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │ WriteScheduler  │── timer ──────▶│   ObjectCodec   │
//!   │ (debounce)      │                │ (type registry) │
//!   └─────────────────┘                └────────┬────────┘
//!                                               │ varint framing
//!                                               ▼
//!                                      ┌─────────────────┐
//!                                      │    FileImage    │
//!                                      │ (tmp + rename)  │
//!                                      └─────────────────┘
//! ```
//!
//! ## Example
//! ```no_run
//! use emberkv::{Store, StoreConfig};
//!
//! # fn main() -> emberkv::Result<()> {
//! let config = StoreConfig::builder()
//!     .path("settings.bin")
//!     .save_delay_ms(500)
//!     .build();
//! let store = Store::open(config)?;
//!
//! let width: u32 = store.get_and_put("window.width", 800)?;
//! store.put("window.width", width + 10)?;
//! store.save()?;
//!
//! emberkv::shutdown()?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod key;
pub mod varint;
pub mod codec;
pub mod scheduler;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{EmberError, Result};
pub use config::{StoreConfig, StoreConfigBuilder, DEFAULT_SAVE_DELAY};
pub use key::Key;
pub use codec::{BincodeSerializer, ObjectCodec, Serializer};
pub use scheduler::{BackgroundError, WriteState};
pub use store::{FileImage, Store, StoreRegistry};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of EmberKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Flush and stop every store registered with the global registry
///
/// Call once during orderly process termination. Returns after every pending
/// or in-flight flush has completed.
pub fn shutdown() -> Result<()> {
    StoreRegistry::global().shutdown()
}
