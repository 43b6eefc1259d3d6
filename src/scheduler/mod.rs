//! Scheduler Module
//!
//! Decides when a disk-backed store writes its in-memory state to its file.
//!
//! ## State Machine
//! ```text
//!            mutation (delay > 0, nothing armed)
//!   Clean ───────────────────────────────────────▶ Dirty-Pending
//!     ▲                                              │  timer elapses
//!     │                                              │  or save()
//!     └──────────────── Flushing ◀───────────────────┘
//! ```
//! - The deadline is fixed by the first unflushed mutation; later mutations
//!   in the same window do not push it out.
//! - `save()` cancels the armed window and flushes on the caller's thread.
//! - With a zero delay every mutation flushes before returning.
//!
//! ## Threading
//! One timer thread per store, spawned on the first armed window. The thread
//! only holds a `Weak` reference to its store and never runs on a caller's
//! thread.

mod errors;
mod timer;

pub use errors::BackgroundError;
pub use timer::{Decision, WriteScheduler};

pub(crate) use errors::ErrorSink;

use crate::error::Result;

/// Target of a timer-triggered flush
pub trait Flush: Send + Sync {
    fn flush(&self) -> Result<()>;
}

/// Observable write state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteState {
    /// Everything in memory is on disk
    Clean,
    /// Mutations are waiting for a flush
    DirtyPending,
    /// A flush is writing the file right now
    Flushing,
}
