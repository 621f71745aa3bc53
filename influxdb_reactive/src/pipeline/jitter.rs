use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use rand::Rng;

use crate::scheduler::Scheduler;

/// A uniformly distributed duration in `[0, max)`; zero when `max` is zero
pub(crate) fn random_delay(max: Duration) -> Duration {
    if max.is_zero() {
        Duration::ZERO
    } else {
        rand::thread_rng().gen_range(Duration::ZERO..max)
    }
}

/// Spreads flushes over a random delay so that clients started together do not write together
#[derive(Debug)]
pub(crate) struct Jitter {
    interval: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl Jitter {
    pub(crate) fn new(interval: Duration, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            interval,
            scheduler,
        }
    }

    /// The delay for a batch closed now, or `None` when jitter is disabled
    ///
    /// The timer starts when this is called, so delays of consecutive batches overlap rather than
    /// add up.
    pub(crate) fn delay(&self) -> Option<BoxFuture<'static, ()>> {
        (!self.interval.is_zero()).then(|| self.scheduler.sleep(random_delay(self.interval)))
    }
}
