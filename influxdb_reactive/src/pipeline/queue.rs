//! The bounded buffer between producers and the batching window.

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{DataPoint, Error, OverflowStrategy, Result};

/// Accepts points from any number of producers without blocking them
///
/// When the buffer is full the [`OverflowStrategy`] decides which point is lost. Dropped points
/// are counted and handed to the drain task along with the buffered points, so that a burst of
/// overflow is reported once rather than once per point.
#[derive(Debug)]
pub(crate) struct IngestionQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    limit: usize,
    strategy: OverflowStrategy,
}

#[derive(Debug, Default)]
struct QueueState {
    points: VecDeque<DataPoint>,
    dropped: usize,
    closed: bool,
}

/// Everything taken from the queue by one [`IngestionQueue::drain`]
#[derive(Debug, Default)]
pub(crate) struct Drained {
    pub(crate) points: Vec<DataPoint>,
    /// Points lost to overflow since the previous drain
    pub(crate) dropped: usize,
    /// The queue was closed; no more points will arrive
    pub(crate) closed: bool,
}

impl IngestionQueue {
    pub(crate) fn new(limit: usize, strategy: OverflowStrategy) -> Self {
        Self {
            state: Default::default(),
            notify: Notify::new(),
            // a zero sized buffer still has to hand points over one at a time
            capacity: limit.max(1),
            limit,
            strategy,
        }
    }

    pub(crate) fn push(&self, point: DataPoint) -> Result<()> {
        self.push_all(std::iter::once(point))
    }

    /// Enqueue `points` in order
    ///
    /// With [`OverflowStrategy::Error`] the points ahead of the one that overflowed stay queued.
    pub(crate) fn push_all(&self, points: impl IntoIterator<Item = DataPoint>) -> Result<()> {
        let result = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(Error::Closed);
            }
            points
                .into_iter()
                .try_for_each(|point| self.push_locked(&mut state, point))
        };
        self.notify.notify_one();
        result
    }

    fn push_locked(&self, state: &mut QueueState, point: DataPoint) -> Result<()> {
        if state.points.len() >= self.capacity {
            match self.strategy {
                OverflowStrategy::DropOldest => {
                    state.points.pop_front();
                    state.dropped += 1;
                }
                OverflowStrategy::DropLatest => {
                    state.dropped += 1;
                    return Ok(());
                }
                OverflowStrategy::Error => {
                    return Err(Error::BufferOverflow { limit: self.limit });
                }
            }
        }
        state.points.push_back(point);
        Ok(())
    }

    /// Take every buffered point
    pub(crate) fn drain(&self) -> Drained {
        let mut state = self.state.lock();
        Drained {
            points: state.points.drain(..).collect(),
            dropped: std::mem::take(&mut state.dropped),
            closed: state.closed,
        }
    }

    /// Refuse further points and wake the drain task so that it can flush
    pub(crate) fn close(&self) {
        self.state.lock().closed = true;
        self.notify.notify_one();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Wait until points were pushed or the queue was closed since the previous wake up
    pub(crate) async fn notified(&self) {
        self.notify.notified().await
    }
}
