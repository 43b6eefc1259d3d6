//! Store Module
//!
//! The key-value engine: an in-memory map of typed values plus a version
//! scalar, optionally persisted to a single file.
//!
//! ## Architecture
//! ```text
//!            put / get_and_put / delete / set_version
//!   callers ──────────────────────────────────────────▶ Store ── map + version
//!                                                         │
//!                                       on_mutation()     ▼
//!                                                   WriteScheduler
//!                                                         │ now / after delay
//!                                                         ▼
//!                        ObjectCodec ◀── snapshot ── flush_to_disk
//!                                                         │
//!                                                         ▼
//!                                        FileImage::write_atomic (tmp + rename)
//! ```
//!
//! ## Components
//! - `kv`: [`Store`], the public API
//! - `file`: [`FileImage`], the checksummed on-disk layout
//! - `registry`: [`StoreRegistry`], weak registry flushed on shutdown

mod file;
mod kv;
mod registry;

pub use file::{FileImage, FORMAT_VERSION, MAGIC};
pub use kv::Store;
pub use registry::StoreRegistry;
