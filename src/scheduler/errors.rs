//! Reporting of background flush failures
//!
//! Timer-triggered flushes have no caller to return an error to, so failures
//! go to a bounded channel. When nobody drains it, new errors are dropped.

use std::path::PathBuf;
use std::time::SystemTime;

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

use crate::error::EmberError;

/// A failed background flush
#[derive(Debug, Clone)]
pub struct BackgroundError {
    /// File the flush was writing
    pub path: PathBuf,
    pub message: String,
    pub at: SystemTime,
}

pub(crate) struct ErrorSink {
    path: PathBuf,
    tx: Sender<BackgroundError>,
    rx: Receiver<BackgroundError>,
}

impl ErrorSink {
    pub fn new(path: PathBuf, capacity: usize) -> Self {
        let (tx, rx) = bounded(capacity);
        Self { path, tx, rx }
    }

    pub fn report(&self, err: &EmberError) {
        tracing::error!("Background flush of {} failed: {}", self.path.display(), err);

        let event = BackgroundError {
            path: self.path.clone(),
            message: err.to_string(),
            at: SystemTime::now(),
        };
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            tracing::debug!("Background error channel full, dropping error");
        }
    }

    pub fn subscribe(&self) -> Receiver<BackgroundError> {
        self.rx.clone()
    }
}
