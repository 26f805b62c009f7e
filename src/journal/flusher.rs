//! Flush strategies.
//!
//! A [`Flusher`] is told after every successful append that there is new
//! data, and decides when [`SegmentedJournal::flush`] actually runs:
//!
//! - [`DirectFlusher`]: flush before the append returns.
//! - [`NoopFlusher`]: never flush on append; durability is left to the OS
//!   or to explicit flush calls.
//! - [`DelayedFlusher`]: batch requests and flush on a tokio timer, or as
//!   soon as enough requests are pending.
//!
//! Custom strategies implement [`Flusher`] and are installed with
//! `SegmentedJournalBuilder::with_flusher`.

use super::config::FlushStrategy;
use super::error::JournalError;
use super::segmented::SegmentedJournal;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

/// Decides when appended data becomes durable.
pub trait Flusher: Send + Sync + fmt::Debug {
    /// Signal that new data was appended to `journal`.
    ///
    /// # Errors
    ///
    /// Returns the error of a synchronous flush, or
    /// [`JournalError::FlushFailed`] for an earlier background flush that
    /// failed.
    fn flush(&self, journal: &SegmentedJournal) -> Result<(), JournalError>;

    /// Whether a completed [`flush`](Self::flush) guarantees durability.
    fn is_direct(&self) -> bool {
        true
    }

    /// Release timers or other resources. Must not fail.
    fn close(&self) {}
}

/// Flushes synchronously on every request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectFlusher;

impl Flusher for DirectFlusher {
    #[inline]
    fn flush(&self, journal: &SegmentedJournal) -> Result<(), JournalError> {
        journal.flush()
    }
}

/// Ignores every request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoopFlusher;

impl Flusher for NoopFlusher {
    #[inline]
    fn flush(&self, _journal: &SegmentedJournal) -> Result<(), JournalError> {
        Ok(())
    }

    fn is_direct(&self) -> bool {
        false
    }
}

/// Shared direct flusher.
pub static DIRECT: DirectFlusher = DirectFlusher;

/// Shared no-op flusher.
pub static NOOP: NoopFlusher = NoopFlusher;

#[derive(Debug, Default)]
struct DelayedState {
    pending: usize,
    scheduled: Option<JoinHandle<()>>,
    failure: Option<String>,
    closed: bool,
}

/// Batches flush requests on a tokio runtime.
///
/// The first request after a flush schedules one on the runtime after
/// `delay`; later requests are covered by it. With a non-zero `batch_size`,
/// the request that brings the pending count to `batch_size` flushes
/// synchronously and cancels the timer.
///
/// A failed background flush is logged and handed to the next caller of
/// [`flush`](Flusher::flush) as [`JournalError::FlushFailed`].
#[derive(Debug)]
pub struct DelayedFlusher {
    delay: Duration,
    batch_size: usize,
    handle: Handle,
    state: Arc<Mutex<DelayedState>>,
}

impl DelayedFlusher {
    /// Create a flusher scheduling on `handle`.
    #[must_use]
    pub fn new(delay: Duration, batch_size: usize, handle: Handle) -> Self {
        Self {
            delay,
            batch_size,
            handle,
            state: Arc::new(Mutex::new(DelayedState::default())),
        }
    }

    /// Delay between the first pending request and the flush.
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Pending requests not yet covered by a completed flush.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.state.lock().map(|state| state.pending).unwrap_or(0)
    }

    /// Returns `true` if a timer is armed.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        self.state
            .lock()
            .map(|state| state.scheduled.is_some())
            .unwrap_or(false)
    }

    fn schedule(&self, journal: &SegmentedJournal) -> JoinHandle<()> {
        let journal = journal.clone();
        let shared = Arc::clone(&self.state);
        let delay = self.delay;

        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;

            let covered = match shared.lock() {
                Ok(mut state) => {
                    state.scheduled = None;
                    std::mem::take(&mut state.pending)
                }
                Err(_) => return,
            };

            // The blocking flush outlives an abort of this task, so it
            // records its own failure.
            let blocking = Arc::clone(&shared);
            let outcome = tokio::task::spawn_blocking(move || {
                let result = journal.flush();
                if let Err(e) = &result {
                    record_failure(&blocking, e.to_string(), covered);
                }
                result
            })
            .await;

            match outcome {
                Ok(Ok(())) => debug!(covered, "delayed journal flush completed"),
                Ok(Err(_)) => {}
                Err(e) => record_failure(&shared, format!("flush task failed: {e}"), covered),
            }
        })
    }
}

fn record_failure(state: &Mutex<DelayedState>, message: String, covered: usize) {
    error!(error = %message, covered, "delayed journal flush failed");
    if let Ok(mut state) = state.lock() {
        state.failure = Some(message);
    }
}

impl Flusher for DelayedFlusher {
    fn flush(&self, journal: &SegmentedJournal) -> Result<(), JournalError> {
        let mut state = self.state.lock().map_err(|_| JournalError::LockPoisoned)?;

        if let Some(message) = state.failure.take() {
            return Err(JournalError::FlushFailed { message });
        }
        if state.closed {
            drop(state);
            return journal.flush();
        }

        state.pending += 1;
        if self.batch_size > 0 && state.pending >= self.batch_size {
            trace!(pending = state.pending, "batch threshold reached, flushing");
            state.pending = 0;
            if let Some(task) = state.scheduled.take() {
                task.abort();
            }
            drop(state);
            return journal.flush();
        }

        if state.scheduled.is_none() {
            state.scheduled = Some(self.schedule(journal));
        }
        Ok(())
    }

    fn is_direct(&self) -> bool {
        false
    }

    fn close(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.closed = true;
            state.pending = 0;
            if let Some(task) = state.scheduled.take() {
                task.abort();
            }
        }
    }
}

/// Creates flushers bound to a scheduling context.
pub trait FlusherFactory: Send + Sync {
    /// Build a flusher that may schedule work on `handle`.
    fn create_flusher(&self, handle: &Handle) -> Arc<dyn Flusher>;
}

impl<F> FlusherFactory for F
where
    F: Fn(&Handle) -> Arc<dyn Flusher> + Send + Sync,
{
    fn create_flusher(&self, handle: &Handle) -> Arc<dyn Flusher> {
        self(handle)
    }
}

impl FlusherFactory for FlushStrategy {
    fn create_flusher(&self, handle: &Handle) -> Arc<dyn Flusher> {
        match *self {
            FlushStrategy::Direct => Arc::new(DIRECT),
            FlushStrategy::NoOp => Arc::new(NOOP),
            FlushStrategy::Delayed {
                delay_ms,
                batch_size,
            } => Arc::new(DelayedFlusher::new(
                Duration::from_millis(delay_ms),
                batch_size,
                handle.clone(),
            )),
        }
    }
}

/// Factory ignoring its context and returning [`DIRECT`].
pub fn direct_factory() -> impl FlusherFactory {
    |_: &Handle| -> Arc<dyn Flusher> { Arc::new(DIRECT) }
}

/// Factory ignoring its context and returning [`NOOP`].
pub fn noop_factory() -> impl FlusherFactory {
    |_: &Handle| -> Arc<dyn Flusher> { Arc::new(NOOP) }
}

/// Factory for [`DelayedFlusher`]s with the given settings.
pub fn delayed_factory(delay: Duration, batch_size: usize) -> impl FlusherFactory {
    move |handle: &Handle| -> Arc<dyn Flusher> {
        Arc::new(DelayedFlusher::new(delay, batch_size, handle.clone()))
    }
}
