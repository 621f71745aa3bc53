//! Immutable, validated configuration values for the client, writes, batching and queries.

use std::{fmt::Display, num::NonZeroUsize, time::Duration};

use secrecy::Secret;
use url::Url;

use crate::{Error, Result};

/// The retention policy used when none is given
pub const DEFAULT_RETENTION_POLICY: &str = "autogen";

const DEFAULT_BATCH_SIZE: NonZeroUsize = NonZeroUsize::new(1_000).unwrap();
const DEFAULT_CHUNK_SIZE: NonZeroUsize = NonZeroUsize::new(10_000).unwrap();

/// Time precision of point timestamps
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Precision {
    #[default]
    Nanosecond,
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
}

impl Precision {
    /// The value of the `precision` / `epoch` URL parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nanosecond => "n",
            Self::Microsecond => "u",
            Self::Millisecond => "ms",
            Self::Second => "s",
            Self::Minute => "m",
            Self::Hour => "h",
        }
    }

    fn nanos(&self) -> i128 {
        match self {
            Self::Nanosecond => 1,
            Self::Microsecond => 1_000,
            Self::Millisecond => 1_000_000,
            Self::Second => 1_000_000_000,
            Self::Minute => 60_000_000_000,
            Self::Hour => 3_600_000_000_000,
        }
    }

    /// Convert `value`, expressed in `from`, into this precision
    ///
    /// Converting to a coarser precision truncates, converting to a finer one saturates.
    pub fn convert(&self, value: i64, from: Self) -> i64 {
        let nanos = i128::from(value) * from.nanos();
        let converted = nanos / self.nanos();
        converted.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

impl Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Write consistency level, relevant for clustered servers
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ConsistencyLevel {
    All,
    Any,
    #[default]
    One,
    Quorum,
}

impl ConsistencyLevel {
    /// The value of the `consistency` URL parameter
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Any => "any",
            Self::One => "one",
            Self::Quorum => "quorum",
        }
    }
}

impl Display for ConsistencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The destination of a write
///
/// Two [`WriteOptions`] are equal iff all of their fields are equal; the write pipeline groups
/// points by this value, so points with different options never share a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WriteOptions {
    database: Option<String>,
    retention_policy: String,
    consistency_level: ConsistencyLevel,
    precision: Precision,
    udp_port: Option<u16>,
}

impl WriteOptions {
    /// Options writing to `database` over HTTP with the default retention policy, consistency
    /// level and precision
    pub fn new(database: impl Into<String>) -> Result<Self> {
        let database = database.into();
        if database.is_empty() {
            return Err(Error::invalid_option("database", "expecting a non-empty string"));
        }
        Ok(Self {
            database: Some(database),
            retention_policy: DEFAULT_RETENTION_POLICY.to_string(),
            consistency_level: ConsistencyLevel::default(),
            precision: Precision::default(),
            udp_port: None,
        })
    }

    /// Options writing through UDP to `port` on the server host; the database is configured on
    /// the server side of the UDP listener
    pub fn udp(port: u16) -> Self {
        Self {
            database: None,
            retention_policy: DEFAULT_RETENTION_POLICY.to_string(),
            consistency_level: ConsistencyLevel::default(),
            precision: Precision::default(),
            udp_port: Some(port),
        }
    }

    /// Set the retention policy
    pub fn retention_policy(mut self, retention_policy: impl Into<String>) -> Result<Self> {
        let retention_policy = retention_policy.into();
        if retention_policy.is_empty() {
            return Err(Error::invalid_option(
                "retention_policy",
                "expecting a non-empty string",
            ));
        }
        self.retention_policy = retention_policy;
        Ok(self)
    }

    /// Set the consistency level
    pub fn consistency_level(mut self, consistency_level: ConsistencyLevel) -> Self {
        self.consistency_level = consistency_level;
        self
    }

    /// Set the precision timestamps are written with
    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn database_name(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn retention_policy_name(&self) -> &str {
        &self.retention_policy
    }

    pub fn consistency(&self) -> ConsistencyLevel {
        self.consistency_level
    }

    pub fn time_precision(&self) -> Precision {
        self.precision
    }

    pub fn udp_port(&self) -> Option<u16> {
        self.udp_port
    }

    pub fn is_udp(&self) -> bool {
        self.udp_port.is_some()
    }
}

/// What the ingestion queue does with a point that arrives while its buffer is full
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum OverflowStrategy {
    /// Evict the oldest buffered point to make room
    #[default]
    DropOldest,
    /// Discard the arriving point
    DropLatest,
    /// Reject the arriving point with [`Error::BufferOverflow`]
    Error,
}

/// How the per-destination writes of one batch are executed
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum WriteConcurrency {
    /// Groups are written one after another on the dispatching task; a retrying group holds
    /// back the groups and batches behind it
    #[default]
    Inline,
    /// Each destination gets its own worker; destinations progress independently while every
    /// destination stays FIFO
    Concurrent,
}

/// Batching, buffering and retry behaviour of the write pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    batch_size: NonZeroUsize,
    flush_interval: Duration,
    jitter_interval: Duration,
    retry_interval: Duration,
    buffer_limit: usize,
    overflow_strategy: OverflowStrategy,
    write_concurrency: WriteConcurrency,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: Duration::from_millis(1_000),
            jitter_interval: Duration::ZERO,
            retry_interval: Duration::from_millis(1_000),
            buffer_limit: 10_000,
            overflow_strategy: OverflowStrategy::default(),
            write_concurrency: WriteConcurrency::default(),
        }
    }
}

impl BatchOptions {
    /// Batching disabled: every point is written as soon as it is drained from the buffer and
    /// destinations are written concurrently
    pub fn disabled() -> Self {
        Self {
            batch_size: NonZeroUsize::MIN,
            write_concurrency: WriteConcurrency::Concurrent,
            ..Default::default()
        }
    }

    /// Maximum number of points in one batch
    pub fn batch_size(mut self, batch_size: usize) -> Result<Self> {
        self.batch_size = NonZeroUsize::new(batch_size)
            .ok_or_else(|| Error::invalid_option("batch_size", "expecting a positive number"))?;
        Ok(self)
    }

    /// Maximum time a point waits in an open batch
    pub fn flush_interval(mut self, flush_interval: Duration) -> Result<Self> {
        self.flush_interval = positive("flush_interval", flush_interval)?;
        Ok(self)
    }

    /// Upper bound of the random delay added to each flush and retry; zero disables jitter
    pub fn jitter_interval(mut self, jitter_interval: Duration) -> Self {
        self.jitter_interval = jitter_interval;
        self
    }

    /// Base delay before a retryable write is resubmitted
    pub fn retry_interval(mut self, retry_interval: Duration) -> Result<Self> {
        self.retry_interval = positive("retry_interval", retry_interval)?;
        Ok(self)
    }

    /// Number of points buffered ahead of the batching window
    pub fn buffer_limit(mut self, buffer_limit: usize) -> Self {
        self.buffer_limit = buffer_limit;
        self
    }

    pub fn overflow_strategy(mut self, overflow_strategy: OverflowStrategy) -> Self {
        self.overflow_strategy = overflow_strategy;
        self
    }

    pub fn write_concurrency(mut self, write_concurrency: WriteConcurrency) -> Self {
        self.write_concurrency = write_concurrency;
        self
    }

    pub fn get_batch_size(&self) -> usize {
        self.batch_size.get()
    }

    pub fn get_flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn get_jitter_interval(&self) -> Duration {
        self.jitter_interval
    }

    pub fn get_retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn get_buffer_limit(&self) -> usize {
        self.buffer_limit
    }

    pub fn get_overflow_strategy(&self) -> OverflowStrategy {
        self.overflow_strategy
    }

    pub fn get_write_concurrency(&self) -> WriteConcurrency {
        self.write_concurrency
    }
}

fn positive(name: &'static str, d: Duration) -> Result<Duration> {
    if d.is_zero() {
        Err(Error::invalid_option(name, "expecting a positive duration"))
    } else {
        Ok(d)
    }
}

/// Options of a chunked query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryOptions {
    chunk_size: NonZeroUsize,
    precision: Precision,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            precision: Precision::default(),
        }
    }
}

impl QueryOptions {
    /// Number of rows the server puts in each chunk of the response
    pub fn chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        self.chunk_size = NonZeroUsize::new(chunk_size)
            .ok_or_else(|| Error::invalid_option("chunk_size", "expecting a positive number"))?;
        Ok(self)
    }

    /// Precision of the timestamps in the response
    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn get_chunk_size(&self) -> usize {
        self.chunk_size.get()
    }

    pub fn get_precision(&self) -> Precision {
        self.precision
    }
}

/// Connection level options of the [`Client`][crate::Client]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    url: Url,
    username: Option<String>,
    password: Option<Secret<String>>,
    database: Option<String>,
    retention_policy: String,
    consistency_level: ConsistencyLevel,
    precision: Precision,
}

impl ClientOptions {
    /// Options for a server at `url`, e.g. `http://localhost:8086`
    pub fn new(url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();
        if url.is_empty() {
            return Err(Error::invalid_option("url", "expecting a non-empty string"));
        }
        Ok(Self {
            url: Url::parse(url).map_err(Error::BaseUrl)?,
            username: None,
            password: None,
            database: None,
            retention_policy: DEFAULT_RETENTION_POLICY.to_string(),
            consistency_level: ConsistencyLevel::default(),
            precision: Precision::default(),
        })
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(Secret::new(password.into()));
        self
    }

    /// The database used by the write methods that do not take [`WriteOptions`]
    pub fn database(mut self, database: impl Into<String>) -> Result<Self> {
        let database = database.into();
        if database.is_empty() {
            return Err(Error::invalid_option("database", "expecting a non-empty string"));
        }
        self.database = Some(database);
        Ok(self)
    }

    pub fn retention_policy(mut self, retention_policy: impl Into<String>) -> Self {
        let retention_policy = retention_policy.into();
        if !retention_policy.is_empty() {
            self.retention_policy = retention_policy;
        }
        self
    }

    pub fn consistency_level(mut self, consistency_level: ConsistencyLevel) -> Self {
        self.consistency_level = consistency_level;
        self
    }

    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn get_username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn get_password(&self) -> Option<&Secret<String>> {
        self.password.as_ref()
    }

    pub fn get_database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// The [`WriteOptions`] derived from the default database, if one is configured
    pub fn default_write_options(&self) -> Option<WriteOptions> {
        self.database.as_ref().map(|database| WriteOptions {
            database: Some(database.clone()),
            retention_policy: self.retention_policy.clone(),
            consistency_level: self.consistency_level,
            precision: self.precision,
            udp_port: None,
        })
    }
}
