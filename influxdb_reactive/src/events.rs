//! Notifications published by the write pipeline and the query reader.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tracing::{debug, error, trace, warn};

use crate::{DataPoint, Error, QueryResult, ServerError, WriteOptions};

/// Number of events a listener may fall behind before it starts missing them
pub(crate) const EVENT_BUS_CAPACITY: usize = 1024;

/// Something that happened to data written or read through the client
#[derive(Debug)]
pub enum Event {
    /// The server accepted every line of a write
    WriteSuccess {
        points: Arc<[DataPoint]>,
        options: WriteOptions,
    },
    /// The server rejected a write; when the error is retry-worth the same write is resubmitted
    WriteError {
        points: Arc<[DataPoint]>,
        options: WriteOptions,
        error: ServerError,
    },
    /// The server rejected some lines of a write and stored the others
    WritePartial {
        points: Arc<[DataPoint]>,
        options: WriteOptions,
        error: ServerError,
    },
    /// A write was handed to the UDP socket
    WriteUdp {
        points: Arc<[DataPoint]>,
        options: WriteOptions,
    },
    /// `dropped` points were discarded because the write buffer was full
    Backpressure { dropped: usize },
    /// An error that could not be attributed to a server response, e.g. a point that could not
    /// be serialized or a failed connection; `points` are the points lost to it
    Unhandled {
        error: Error,
        points: Arc<[DataPoint]>,
    },
    /// One chunk of a chunked query response was decoded
    QueryChunkParsed {
        chunk: Bytes,
        result: Arc<QueryResult>,
    },
}

/// The kind of an [`Event`], used to filter listeners
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    WriteSuccess,
    WriteError,
    WritePartial,
    WriteUdp,
    Backpressure,
    Unhandled,
    QueryChunkParsed,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::WriteSuccess { .. } => EventKind::WriteSuccess,
            Self::WriteError { .. } => EventKind::WriteError,
            Self::WritePartial { .. } => EventKind::WritePartial,
            Self::WriteUdp { .. } => EventKind::WriteUdp,
            Self::Backpressure { .. } => EventKind::Backpressure,
            Self::Unhandled { .. } => EventKind::Unhandled,
            Self::QueryChunkParsed { .. } => EventKind::QueryChunkParsed,
        }
    }

    /// The points a write event refers to; empty for the other events
    pub fn points(&self) -> &[DataPoint] {
        match self {
            Self::WriteSuccess { points, .. }
            | Self::WriteError { points, .. }
            | Self::WritePartial { points, .. }
            | Self::WriteUdp { points, .. }
            | Self::Unhandled { points, .. } => points,
            _ => &[],
        }
    }

    fn log(&self) {
        match self {
            Self::WriteSuccess { points, options } => debug!(
                n_points = points.len(),
                database = options.database_name(),
                "write succeeded"
            ),
            Self::WriteError {
                points,
                options,
                error,
            } => error!(
                n_points = points.len(),
                database = options.database_name(),
                status = ?error.status(),
                %error,
                retry = error.is_retry_worth(),
                "write failed"
            ),
            Self::WritePartial {
                points,
                options,
                error,
            } => warn!(
                n_points = points.len(),
                database = options.database_name(),
                %error,
                "partial write"
            ),
            Self::WriteUdp { points, options } => debug!(
                n_points = points.len(),
                port = options.udp_port(),
                "udp write sent"
            ),
            Self::Backpressure { dropped } => {
                warn!(dropped, "write buffer is full, points were dropped")
            }
            Self::Unhandled { error, points } => {
                error!(%error, n_points = points.len(), "unhandled error")
            }
            Self::QueryChunkParsed { chunk, .. } => {
                trace!(n_bytes = chunk.len(), "query chunk parsed")
            }
        }
    }
}

/// Multi-producer, multi-consumer broadcast of [`Event`]s
///
/// Publishing never blocks. A listener that falls more than a fixed number of events behind skips
/// the oldest ones.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Arc<Event>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_BUS_CAPACITY)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Log `event` and hand it to every current listener
    pub fn publish(&self, event: Event) {
        event.log();
        // no listeners is not an error
        let _ = self.tx.send(Arc::new(event));
    }

    /// Listen to every event published from now on
    pub fn subscribe(&self) -> EventListener {
        EventListener {
            rx: self.tx.subscribe(),
            kind: None,
        }
    }

    /// Listen to the events of one kind published from now on
    pub fn subscribe_kind(&self, kind: EventKind) -> EventListener {
        EventListener {
            rx: self.tx.subscribe(),
            kind: Some(kind),
        }
    }
}

/// A subscription to the [`EventBus`]
#[derive(Debug)]
pub struct EventListener {
    rx: broadcast::Receiver<Arc<Event>>,
    kind: Option<EventKind>,
}

impl EventListener {
    /// Wait for the next matching event; `None` once the bus is gone
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener is lagging, events were skipped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// The next matching event if one has already been published
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener is lagging, events were skipped");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, event: &Event) -> bool {
        self.kind.is_none_or(|kind| event.kind() == kind)
    }
}
