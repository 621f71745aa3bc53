//! Serializes one destination group, writes it and applies the retry policy.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    DataPoint, Error, Event, EventBus, ServerErrorKind, WriteOptions, scheduler::Scheduler,
    transport::Transport,
};

use super::jitter::random_delay;

/// The terminal state of a write attempt
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
    /// No point of the group could be serialized, nothing was sent
    Skipped,
    Success,
    Partial,
    /// Rejected by the server for good, or failed in transport
    Failed,
    /// Handed to the UDP socket
    Udp,
    /// A retry was pending when the pipeline shut down
    Abandoned,
}

#[derive(Debug)]
pub(crate) struct WriteExecutor {
    transport: Arc<dyn Transport>,
    events: EventBus,
    scheduler: Arc<dyn Scheduler>,
    retry_interval: Duration,
    jitter_interval: Duration,
    shutdown: CancellationToken,
}

impl WriteExecutor {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        events: EventBus,
        scheduler: Arc<dyn Scheduler>,
        retry_interval: Duration,
        jitter_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            transport,
            events,
            scheduler,
            retry_interval,
            jitter_interval,
            shutdown,
        }
    }

    /// Write the points of one destination, retrying for as long as the server reports a
    /// retry-worth error
    ///
    /// Every retry resubmits the body serialized for the first attempt.
    pub(crate) async fn execute(
        &self,
        options: WriteOptions,
        points: Vec<DataPoint>,
    ) -> AttemptOutcome {
        let Some((points, body)) = self.serialize(points) else {
            debug!(
                database = options.database_name(),
                "no point of the batch could be serialized, skipping write"
            );
            return AttemptOutcome::Skipped;
        };

        if let Some(port) = options.udp_port() {
            return match self.transport.write_udp(port, body).await {
                Ok(()) => {
                    self.events.publish(Event::WriteUdp { points, options });
                    AttemptOutcome::Udp
                }
                Err(error) => {
                    self.events.publish(Event::Unhandled { error, points });
                    AttemptOutcome::Failed
                }
            };
        }

        let mut attempt = 1;
        loop {
            let error = match self.transport.write(&options, body.clone()).await {
                Ok(()) => {
                    self.events.publish(Event::WriteSuccess { points, options });
                    return AttemptOutcome::Success;
                }
                Err(Error::Server(error)) => error,
                Err(error) => {
                    self.events.publish(Event::Unhandled { error, points });
                    return AttemptOutcome::Failed;
                }
            };

            let kind = error.kind();
            if kind == ServerErrorKind::PartialWrite {
                self.events.publish(Event::WritePartial {
                    points,
                    options,
                    error,
                });
                return AttemptOutcome::Partial;
            }

            self.events.publish(Event::WriteError {
                points: Arc::clone(&points),
                options: options.clone(),
                error,
            });
            if kind == ServerErrorKind::Fatal {
                return AttemptOutcome::Failed;
            }

            let delay = self.retry_interval + random_delay(self.jitter_interval);
            debug!(
                attempt,
                n_points = points.len(),
                database = options.database_name(),
                ?delay,
                "scheduling write retry"
            );
            tokio::select! {
                _ = self.scheduler.sleep(delay) => {}
                _ = self.shutdown.cancelled() => {
                    warn!(
                        attempt,
                        n_points = points.len(),
                        database = options.database_name(),
                        "client closed, abandoning write retry"
                    );
                    return AttemptOutcome::Abandoned;
                }
            }
            attempt += 1;
        }
    }

    /// Render the lines of `points`, reporting and leaving out the points that fail; `None` when
    /// no point is left
    fn serialize(&self, points: Vec<DataPoint>) -> Option<(Arc<[DataPoint]>, Bytes)> {
        let mut body = String::new();
        let mut written = Vec::with_capacity(points.len());
        for point in points {
            match point.line_protocol() {
                Ok(line) => {
                    if !written.is_empty() {
                        body.push('\n');
                    }
                    body.push_str(&line);
                    written.push(point);
                }
                Err(error) => self.events.publish(Event::Unhandled {
                    error,
                    points: vec![point].into(),
                }),
            }
        }
        (!written.is_empty()).then(|| (written.into(), Bytes::from(body)))
    }
}
