/// Caller cancellation and deadlines
///
/// A `Context` is passed into long-running calls (batch, bulk load, stream
/// publish). Those calls poll `check()` at buffer and file boundaries, and
/// blocking sends select over `done()` and `deadline_timer()`.

use crate::{Error, Result};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct CancelState {
    // Dropping the sender disconnects every clone of `rx`
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
    cancelled: AtomicBool,
}

impl CancelState {
    fn new() -> Arc<Self> {
        let (tx, rx) = channel::bounded(0);
        Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            rx,
            cancelled: AtomicBool::new(false),
        })
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.tx.lock().take();
    }
}

/// Cancellation signal plus optional deadline
#[derive(Clone)]
pub struct Context {
    state: Arc<CancelState>,
    deadline: Option<Instant>,
}

/// Cancels the context it was created with (and every child of it)
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.state.cancel();
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self {
            state: CancelState::new(),
            deadline: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().child_with_timeout(timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            state: CancelState::new(),
            deadline: Some(deadline),
        }
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let ctx = Self::background();
        let handle = CancelHandle {
            state: Arc::clone(&ctx.state),
        };
        (ctx, handle)
    }

    /// Child sharing this context's cancellation, with the earlier of the
    /// two deadlines
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };
        Self {
            state: Arc::clone(&self.state),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::SeqCst)
    }

    /// Ok while the context is live; `Cancelled` or `DeadlineExceeded` otherwise
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded);
            }
        }
        Ok(())
    }

    /// Channel that becomes disconnected (ready) once the context is cancelled
    pub fn done(&self) -> Receiver<()> {
        self.state.rx.clone()
    }

    /// Channel that fires at the deadline, or never
    pub fn deadline_timer(&self) -> Receiver<Instant> {
        match self.deadline {
            Some(deadline) => channel::at(deadline),
            None => channel::never(),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.deadline)
            .finish()
    }
}
