//! Count-or-timeout batching.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;

use crate::{DataPoint, scheduler::Scheduler};

/// Collects points into batches of at most `batch_size` points
///
/// A batch is closed when it is full or when `flush_interval` has elapsed since its first point,
/// whichever happens first. The timer of a window is only armed once the window has a point, so
/// an idle pipeline never produces an empty batch.
pub(crate) struct BatchWindow {
    batch_size: usize,
    flush_interval: Duration,
    scheduler: Arc<dyn Scheduler>,
    points: Vec<DataPoint>,
    timer: Option<BoxFuture<'static, ()>>,
}

impl std::fmt::Debug for BatchWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchWindow")
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("n_points", &self.points.len())
            .field("armed", &self.timer.is_some())
            .finish()
    }
}

impl BatchWindow {
    pub(crate) fn new(
        batch_size: usize,
        flush_interval: Duration,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        Self {
            batch_size,
            flush_interval,
            scheduler,
            points: Vec::with_capacity(batch_size.min(1024)),
            timer: None,
        }
    }

    /// Add a point, returning the batch it completed, if any
    pub(crate) fn push(&mut self, point: DataPoint) -> Option<Vec<DataPoint>> {
        if self.points.is_empty() {
            self.timer = Some(self.scheduler.sleep(self.flush_interval));
        }
        self.points.push(point);
        (self.points.len() >= self.batch_size).then(|| self.take())
    }

    /// Close the current window early; `None` when it has no points
    pub(crate) fn flush(&mut self) -> Option<Vec<DataPoint>> {
        (!self.points.is_empty()).then(|| self.take())
    }

    /// Completes when the flush interval of the current window has elapsed; never completes
    /// while the window is empty
    ///
    /// Cancel safe: dropping the returned future keeps the timer armed.
    pub(crate) async fn expired(&mut self) {
        match self.timer.as_mut() {
            Some(timer) => timer.await,
            None => futures::future::pending().await,
        }
    }

    fn take(&mut self) -> Vec<DataPoint> {
        self.timer = None;
        std::mem::replace(
            &mut self.points,
            Vec::with_capacity(self.batch_size.min(1024)),
        )
    }
}
