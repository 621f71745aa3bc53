//! A non-blocking write and chunked query client for time series databases that speak line
//! protocol over HTTP or UDP.
//!
//! Points written through the [`Client`] enter an in-memory buffer and are written by a background
//! pipeline:
//!
//! - the [ingestion queue](BatchOptions::buffer_limit) bounds the buffer and applies the
//!   [`OverflowStrategy`] when producers outpace the server,
//! - the batching window closes a batch after [`BatchOptions::batch_size`] points or
//!   [`BatchOptions::flush_interval`], whichever comes first,
//! - an optional random [jitter](BatchOptions::jitter_interval) spreads flushes of many clients,
//! - every batch is split by destination ([`WriteOptions`]) and each group is written as one
//!   request, and retried after [`BatchOptions::retry_interval`] when the server reports a
//!   transient error.
//!
//! Nothing in the write path fails back to the caller once a point was accepted; outcomes are
//! published as [`Event`]s.
//!
//! Queries are requested chunked and decoded incrementally by a [`QueryStream`].

mod client;
mod data_point;
mod error;
mod events;
mod measurement;
mod options;
pub mod point;
mod pipeline;
mod query;
pub mod scheduler;
pub mod transport;

pub use client::{Client, ClientBuilder};
pub use data_point::{DataPoint, Payload};
pub use error::{BoxError, Error, Result, ServerError, ServerErrorKind};
pub use events::{Event, EventBus, EventKind, EventListener};
pub use measurement::Measurement;
pub use options::{
    BatchOptions, ClientOptions, ConsistencyLevel, DEFAULT_RETENTION_POLICY, OverflowStrategy,
    Precision, QueryOptions, WriteConcurrency, WriteOptions,
};
pub use point::{FieldValue, Point, PointBuilder};
pub use query::{ByteStream, Query, QueryResult, QueryStream, Series, StatementResult};
pub use transport::{HttpTransport, Pong, Transport};
