//! Splits batches by destination and hands the groups to the executor.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use indexmap::IndexMap;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{trace, warn};

use crate::{DataPoint, WriteConcurrency, WriteOptions};

use super::executor::WriteExecutor;

/// Partition `points` by their [`WriteOptions`]
///
/// Groups are returned in the order their destination was first seen, and every group keeps the
/// relative order of its points.
pub(crate) fn group_by_destination(
    points: Vec<DataPoint>,
) -> IndexMap<WriteOptions, Vec<DataPoint>> {
    let mut groups: IndexMap<WriteOptions, Vec<DataPoint>> = IndexMap::new();
    for point in points {
        match groups.get_mut(point.options()) {
            Some(group) => group.push(point),
            None => {
                groups.insert(point.options().clone(), vec![point]);
            }
        }
    }
    groups
}

/// Routes the groups of each batch to the [`WriteExecutor`]
#[derive(Debug)]
pub(crate) struct Dispatcher {
    executor: Arc<WriteExecutor>,
    concurrency: WriteConcurrency,
    /// One FIFO worker per destination with writes in flight, only used with
    /// [`WriteConcurrency::Concurrent`]
    workers: HashMap<WriteOptions, Worker>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub(crate) fn new(
        executor: Arc<WriteExecutor>,
        concurrency: WriteConcurrency,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            executor,
            concurrency,
            workers: HashMap::new(),
            tasks,
        }
    }

    pub(crate) async fn dispatch(&mut self, batch: Vec<DataPoint>) {
        if self.concurrency == WriteConcurrency::Concurrent {
            // a worker with nothing in flight is parked on its channel
            self.workers.retain(|_, worker| !worker.is_idle());
        }
        for (options, points) in group_by_destination(batch) {
            match self.concurrency {
                WriteConcurrency::Inline => {
                    let n_points = points.len();
                    let outcome = self.executor.execute(options, points).await;
                    trace!(n_points, ?outcome, "write attempt finished");
                }
                WriteConcurrency::Concurrent => {
                    let worker = self
                        .workers
                        .entry(options)
                        .or_insert_with_key(|options| {
                            Worker::spawn(&self.tasks, Arc::clone(&self.executor), options.clone())
                        });
                    worker.send(points);
                }
            }
        }
    }

    /// Let the destination workers finish what they were handed, then stop
    pub(crate) fn close(&mut self) {
        self.workers.clear();
    }
}

/// Writes the groups of one destination in the order they were dispatched
#[derive(Debug)]
struct Worker {
    tx: mpsc::UnboundedSender<Vec<DataPoint>>,
    /// Groups sent and not yet written
    in_flight: Arc<AtomicUsize>,
}

impl Worker {
    fn spawn(tasks: &TaskTracker, executor: Arc<WriteExecutor>, options: WriteOptions) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<DataPoint>>();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let pending = Arc::clone(&in_flight);
        tasks.spawn(async move {
            trace!(database = options.database_name(), "destination worker started");
            while let Some(points) = rx.recv().await {
                let n_points = points.len();
                let outcome = executor.execute(options.clone(), points).await;
                trace!(n_points, ?outcome, "write attempt finished");
                pending.fetch_sub(1, Ordering::AcqRel);
            }
            trace!(database = options.database_name(), "destination worker stopped");
        });
        Self { tx, in_flight }
    }

    fn send(&self, points: Vec<DataPoint>) {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(points).is_err() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            warn!("destination worker stopped, dropping points");
        }
    }

    fn is_idle(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) == 0
    }
}
