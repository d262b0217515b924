//! Scheduling strategies for engine work
//!
//! Everything the engine does on behalf of an agenda (publishing it,
//! connecting its source, delivering values produced by async sources) is
//! submitted to a [`Scheduler`] as a unit of [`Work`]. The only contract is
//! that work submitted to one scheduler instance runs in submission order.
//!
//! - [`QueueScheduler`]: trampoline that drains pending work in arrival order
//!   (the default)
//! - [`ImmediateScheduler`]: runs work inline on the caller's stack
//! - [`AsyncScheduler`]: tokio task draining an unbounded queue

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::lock;

/// A unit of work submitted to a scheduler.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted work, preserving relative submission order.
pub trait Scheduler: Send + Sync + 'static {
    /// Submit work for execution according to this strategy.
    fn schedule(&self, work: Work);
}

/// Enqueue-and-drain scheduler.
///
/// The first caller to submit work becomes the drainer and runs every piece
/// of work queued until the queue is empty, including work submitted while
/// draining (from the same or another thread). Work that synchronously
/// submits more work therefore never interleaves with it mid-reduction.
#[derive(Default)]
pub struct QueueScheduler {
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<Work>,
    draining: bool,
}

impl QueueScheduler {
    /// Create an idle queue scheduler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pieces of work waiting to run.
    pub fn pending(&self) -> usize {
        lock(&self.state).queue.len()
    }

    /// Whether a drain is currently in progress.
    pub fn is_draining(&self) -> bool {
        lock(&self.state).draining
    }
}

impl fmt::Debug for QueueScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("QueueScheduler")
            .field("pending", &state.queue.len())
            .field("draining", &state.draining)
            .finish()
    }
}

/// Releases the drainer role if a piece of work panics.
struct DrainGuard<'a> {
    state: &'a Mutex<QueueState>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.state).draining = false;
        }
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, work: Work) {
        {
            let mut state = lock(&self.state);
            state.queue.push_back(work);
            if state.draining {
                return;
            }
            state.draining = true;
        }

        let _guard = DrainGuard { state: &self.state };
        loop {
            let next = {
                let mut state = lock(&self.state);
                match state.queue.pop_front() {
                    Some(work) => work,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            next();
        }
    }
}

/// Runs work immediately on the submitting thread.
///
/// Nested submissions recurse instead of queueing. Only suitable when all
/// agenda sources are driven from a single thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, work: Work) {
        work();
    }
}

/// Runs work on a dedicated tokio task, in submission order.
///
/// `schedule` never blocks and never runs work on the caller's stack. The
/// worker task stops when the scheduler is dropped.
pub struct AsyncScheduler {
    tx: mpsc::UnboundedSender<Work>,
    cancel: CancellationToken,
}

impl AsyncScheduler {
    /// Spawn the worker task on the given runtime.
    pub fn new(handle: &Handle) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Work>();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("Async scheduler cancelled");
                        break;
                    }
                    work = rx.recv() => match work {
                        Some(work) => work(),
                        None => break,
                    }
                }
            }
        });

        Self { tx, cancel }
    }

    /// Spawn the worker task on the ambient runtime, if there is one.
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(|handle| Self::new(&handle))
    }
}

impl fmt::Debug for AsyncScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncScheduler")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Scheduler for AsyncScheduler {
    fn schedule(&self, work: Work) {
        if self.tx.send(work).is_err() {
            debug!("Async scheduler stopped, dropping work");
        }
    }
}

impl Drop for AsyncScheduler {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
