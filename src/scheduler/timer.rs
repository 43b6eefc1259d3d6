//! Debounce timer
//!
//! Each armed window carries a generation number. A window fires only if it
//! is still the armed one when its deadline passes, so a `save()` that
//! cancels the window can never race a second flush for it.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::{ErrorSink, Flush};
use crate::error::{EmberError, Result};

/// What the caller of [`WriteScheduler::on_mutation`] must do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Flush synchronously before returning
    FlushNow,
    /// A new window was armed
    Armed,
    /// A window is already armed and will cover this mutation
    AlreadyArmed,
}

enum Command {
    Arm { generation: u64, deadline: Instant },
    Stop,
}

#[derive(Default)]
struct TimerState {
    generation: u64,
    armed: Option<u64>,
    stopped: bool,
}

struct Worker {
    tx: Sender<Command>,
    handle: JoinHandle<()>,
}

/// Per-store debounce scheduler
pub struct WriteScheduler {
    state: Arc<Mutex<TimerState>>,
    worker: Mutex<Option<Worker>>,
    target: Weak<dyn Flush>,
    errors: Arc<ErrorSink>,
}

impl WriteScheduler {
    pub(crate) fn new(target: Weak<dyn Flush>, errors: Arc<ErrorSink>) -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState::default())),
            worker: Mutex::new(None),
            target,
            errors,
        }
    }

    /// Record a mutation and decide how it reaches disk
    pub fn on_mutation(&self, delay: Duration) -> Decision {
        if delay.is_zero() {
            return Decision::FlushNow;
        }

        let mut state = self.state.lock();
        if state.stopped {
            return Decision::FlushNow;
        }
        if state.armed.is_some() {
            return Decision::AlreadyArmed;
        }

        let generation = state.generation + 1;
        let deadline = Instant::now() + delay;
        match self.send(Command::Arm {
            generation,
            deadline,
        }) {
            Ok(()) => {
                state.generation = generation;
                state.armed = Some(generation);
                tracing::debug!("Armed flush window {} for {:?}", generation, delay);
                Decision::Armed
            }
            Err(e) => {
                tracing::warn!("Cannot arm flush timer, writing through: {}", e);
                Decision::FlushNow
            }
        }
    }

    /// Disarm the pending window, if any
    ///
    /// Returns true if a window was armed.
    pub fn cancel(&self) -> bool {
        self.state.lock().armed.take().is_some()
    }

    pub fn is_armed(&self) -> bool {
        self.state.lock().armed.is_some()
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Disarm and stop the timer thread, waiting for an in-flight flush
    ///
    /// Afterwards every mutation is told to flush synchronously.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            state.stopped = true;
            state.armed = None;
        }

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.tx.send(Command::Stop);
            // The timer thread can end up dropping its own store
            if worker.handle.thread().id() != thread::current().id() {
                let _ = worker.handle.join();
            }
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        let mut worker = self.worker.lock();
        if worker.is_none() {
            *worker = Some(self.spawn()?);
        }

        match worker.as_ref() {
            Some(worker) => worker.tx.send(command).map_err(|_| {
                EmberError::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "flush timer thread has exited",
                ))
            }),
            None => Ok(()),
        }
    }

    fn spawn(&self) -> Result<Worker> {
        let (tx, rx) = unbounded();
        let state = Arc::clone(&self.state);
        let target = self.target.clone();
        let errors = Arc::clone(&self.errors);

        let handle = thread::Builder::new()
            .name("emberkv-writer".to_string())
            .spawn(move || run(rx, state, target, errors))?;

        Ok(Worker { tx, handle })
    }
}

impl Drop for WriteScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Timer thread body
fn run(
    rx: Receiver<Command>,
    state: Arc<Mutex<TimerState>>,
    target: Weak<dyn Flush>,
    errors: Arc<ErrorSink>,
) {
    let mut pending: Option<(u64, Instant)> = None;

    loop {
        let command = match pending {
            Some((_, deadline)) => match rx.recv_deadline(deadline) {
                Ok(command) => Some(command),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => return,
            },
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => return,
            },
        };

        match command {
            // A newer window replaces one that was cancelled
            Some(Command::Arm {
                generation,
                deadline,
            }) => pending = Some((generation, deadline)),
            Some(Command::Stop) => return,
            None => {
                let Some((generation, _)) = pending.take() else {
                    continue;
                };
                if !fire(&state, generation) {
                    continue;
                }

                let Some(store) = target.upgrade() else {
                    return;
                };
                if let Err(e) = store.flush() {
                    errors.report(&e);
                }
            }
        }
    }
}

/// Claim the window for flushing if it is still the armed one
fn fire(state: &Mutex<TimerState>, generation: u64) -> bool {
    let mut state = state.lock();
    if state.armed == Some(generation) {
        state.armed = None;
        true
    } else {
        false
    }
}
