//! Timers used by the write pipeline.
//!
//! The batching window, the jitter stage and the retry policy each take their timers from a
//! [`Scheduler`], so that tests can replace wall-clock time with a [`ManualScheduler`].

use std::{fmt::Debug, sync::Arc, time::Duration};

use futures::{FutureExt, future::BoxFuture};
use parking_lot::Mutex;
use tokio::sync::oneshot;

/// A source of timers
pub trait Scheduler: Debug + Send + Sync + 'static {
    /// A future that completes once `delay` has elapsed on this scheduler's clock
    ///
    /// The timer is registered when this is called, not when the future is first polled.
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()>;
}

/// Wall-clock timers from the tokio runtime
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        tokio::time::sleep(delay).boxed()
    }
}

/// Timers that complete immediately, whatever the delay
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn sleep(&self, _delay: Duration) -> BoxFuture<'static, ()> {
        futures::future::ready(()).boxed()
    }
}

/// A virtual clock; timers only complete when [`advance`](Self::advance) moves the clock past
/// their deadline
#[derive(Debug, Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

#[derive(Debug, Default)]
struct ManualState {
    now: Duration,
    timers: Vec<(Duration, oneshot::Sender<()>)>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Time elapsed on the virtual clock
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    /// Number of timers that are still waiting for their deadline
    pub fn pending(&self) -> usize {
        self.state
            .lock()
            .timers
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }

    /// Move the clock forward by `by` and complete every timer whose deadline has been reached
    pub fn advance(&self, by: Duration) {
        let due = {
            let mut state = self.state.lock();
            state.now += by;
            let now = state.now;
            let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.timers)
                .into_iter()
                .partition(|(deadline, _)| *deadline <= now);
            state.timers = waiting;
            due
        };

        for (_, tx) in due {
            // the sleeping future may have been dropped
            let _ = tx.send(());
        }
    }
}

impl Scheduler for ManualScheduler {
    fn sleep(&self, delay: Duration) -> BoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state.lock();
            let deadline = state.now + delay;
            state.timers.push((deadline, tx));
        }
        async move {
            if rx.await.is_err() {
                // the scheduler went away, so this timer can never fire
                futures::future::pending::<()>().await;
            }
        }
        .boxed()
    }
}

/// The schedulers used for each timer role of the write pipeline
#[derive(Debug, Clone)]
pub struct Schedulers {
    /// Batching window timeouts
    pub batch: Arc<dyn Scheduler>,
    /// Jitter delays before a batch is written
    pub jitter: Arc<dyn Scheduler>,
    /// Delays before a failed write is retried
    pub retry: Arc<dyn Scheduler>,
}

impl Default for Schedulers {
    fn default() -> Self {
        Self::all(Arc::new(TokioScheduler))
    }
}

impl Schedulers {
    /// Use `scheduler` for every role
    pub fn all(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            batch: Arc::clone(&scheduler),
            jitter: Arc::clone(&scheduler),
            retry: scheduler,
        }
    }
}
