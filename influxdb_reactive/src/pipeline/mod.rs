//! The write pipeline.
//!
//! Points flow through these stages, each owned by one task:
//!
//! ```text
//! producers -> IngestionQueue -> [drain task: BatchWindow, Jitter] -> [dispatch task: Dispatcher]
//!                                                                          -> WriteExecutor
//! ```
//!
//! The drain task wakes whenever points are pushed, moves them into the batching window and sends
//! every closed batch, together with its jitter delay, to the dispatch task. The dispatch task
//! waits out the delay, splits the batch by destination and writes each group.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    BatchOptions, DataPoint, Event, EventBus, Result, scheduler::Schedulers, transport::Transport,
};

mod executor;
mod grouper;
mod jitter;
mod queue;
mod window;

use executor::WriteExecutor;
use grouper::Dispatcher;
use jitter::Jitter;
use queue::{Drained, IngestionQueue};
use window::BatchWindow;

/// A closed batch on its way to the dispatch task
struct PendingBatch {
    points: Vec<DataPoint>,
    jitter: Option<BoxFuture<'static, ()>>,
}

/// Handle to the tasks of a running write pipeline
#[derive(Debug)]
pub(crate) struct Pipeline {
    queue: Arc<IngestionQueue>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Pipeline {
    /// Start the pipeline tasks on the current tokio runtime
    pub(crate) fn spawn(
        options: BatchOptions,
        transport: Arc<dyn Transport>,
        events: EventBus,
        schedulers: Schedulers,
    ) -> Self {
        let queue = Arc::new(IngestionQueue::new(
            options.get_buffer_limit(),
            options.get_overflow_strategy(),
        ));
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();

        let window = BatchWindow::new(
            options.get_batch_size(),
            options.get_flush_interval(),
            Arc::clone(&schedulers.batch),
        );
        let jitter = Jitter::new(options.get_jitter_interval(), Arc::clone(&schedulers.jitter));
        let executor = Arc::new(WriteExecutor::new(
            transport,
            events.clone(),
            Arc::clone(&schedulers.retry),
            options.get_retry_interval(),
            options.get_jitter_interval(),
            shutdown.clone(),
        ));
        let dispatcher = Dispatcher::new(executor, options.get_write_concurrency(), tasks.clone());

        let (batch_tx, batch_rx) = mpsc::unbounded_channel();
        tasks.spawn(drain(Arc::clone(&queue), window, jitter, batch_tx, events));
        tasks.spawn(dispatch(batch_rx, dispatcher, shutdown.clone()));

        info!(
            batch_size = options.get_batch_size(),
            flush_interval = ?options.get_flush_interval(),
            jitter_interval = ?options.get_jitter_interval(),
            retry_interval = ?options.get_retry_interval(),
            buffer_limit = options.get_buffer_limit(),
            overflow_strategy = ?options.get_overflow_strategy(),
            write_concurrency = ?options.get_write_concurrency(),
            "write pipeline started"
        );

        Self {
            queue,
            shutdown,
            tasks,
        }
    }

    pub(crate) fn push(&self, point: DataPoint) -> Result<()> {
        self.queue.push(point)
    }

    pub(crate) fn push_all(&self, points: impl IntoIterator<Item = DataPoint>) -> Result<()> {
        self.queue.push_all(points)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Stop accepting points and tell the tasks to wind down: the pending window is flushed once,
    /// jitter delays are skipped and pending retries are abandoned
    pub(crate) fn shutdown(&self) {
        self.queue.close();
        self.shutdown.cancel();
        self.tasks.close();
    }

    /// [`shutdown`](Self::shutdown) and wait for the tasks to finish
    pub(crate) async fn close(&self) {
        self.shutdown();
        self.tasks.wait().await;
        info!("write pipeline stopped");
    }
}

async fn drain(
    queue: Arc<IngestionQueue>,
    mut window: BatchWindow,
    jitter: Jitter,
    batches: mpsc::UnboundedSender<PendingBatch>,
    events: EventBus,
) {
    let emit = |points: Vec<DataPoint>| {
        let batch = PendingBatch {
            points,
            jitter: jitter.delay(),
        };
        if batches.send(batch).is_err() {
            warn!("dispatch task stopped, dropping batch");
        }
    };

    loop {
        let Drained {
            points,
            dropped,
            closed,
        } = queue.drain();

        if dropped > 0 {
            events.publish(Event::Backpressure { dropped });
        }
        for point in points {
            if let Some(batch) = window.push(point) {
                emit(batch);
            }
        }

        if closed {
            if let Some(batch) = window.flush() {
                debug!(n_points = batch.len(), "flushing pending points on close");
                emit(batch);
            }
            break;
        }

        tokio::select! {
            _ = queue.notified() => {}
            _ = window.expired() => {
                if let Some(batch) = window.flush() {
                    emit(batch);
                }
            }
        }
    }
}

async fn dispatch(
    mut batches: mpsc::UnboundedReceiver<PendingBatch>,
    mut dispatcher: Dispatcher,
    shutdown: CancellationToken,
) {
    while let Some(PendingBatch { points, jitter }) = batches.recv().await {
        if let Some(delay) = jitter {
            tokio::select! {
                _ = delay => {}
                _ = shutdown.cancelled() => {}
            }
        }
        dispatcher.dispatch(points).await;
    }
    dispatcher.close();
}
