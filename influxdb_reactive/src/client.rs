use std::sync::Arc;

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::{
    BatchOptions, ClientOptions, DataPoint, Error, EventBus, EventKind, EventListener,
    Measurement, Payload, Point, Query, QueryOptions, QueryStream, Result, WriteOptions,
    pipeline::Pipeline,
    scheduler::Schedulers,
    transport::{HttpTransport, Pong, Transport},
};

/// Builds a [`Client`]; create this via [`Client::builder`]
#[derive(Debug)]
pub struct ClientBuilder {
    options: ClientOptions,
    batch_options: BatchOptions,
    transport: Option<Arc<dyn Transport>>,
    schedulers: Schedulers,
    event_capacity: usize,
}

impl ClientBuilder {
    /// Batching behaviour of the write pipeline, [`BatchOptions::default`] if not set
    pub fn batch_options(mut self, batch_options: BatchOptions) -> Self {
        self.batch_options = batch_options;
        self
    }

    /// Make the network calls through `transport` instead of an [`HttpTransport`]
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Take the pipeline timers from `schedulers` instead of the tokio clock
    pub fn schedulers(mut self, schedulers: Schedulers) -> Self {
        self.schedulers = schedulers;
        self
    }

    /// Number of events a listener may fall behind before it misses events
    pub fn event_capacity(mut self, event_capacity: usize) -> Self {
        self.event_capacity = event_capacity;
        self
    }

    /// Create the client and start its write pipeline
    ///
    /// # Panics
    ///
    /// When called outside of a tokio runtime.
    pub fn build(self) -> Client {
        let Self {
            options,
            batch_options,
            transport,
            schedulers,
            event_capacity,
        } = self;

        let transport = transport.unwrap_or_else(|| Arc::new(HttpTransport::new(&options)));
        let events = EventBus::new(event_capacity);
        let pipeline = Pipeline::spawn(
            batch_options,
            Arc::clone(&transport),
            events.clone(),
            schedulers,
        );

        Client {
            default_write_options: options.default_write_options(),
            options,
            transport,
            events,
            pipeline,
        }
    }
}

/// Client for writing and querying a time series database
///
/// Writes are accepted without blocking and are batched, grouped by destination and retried by a
/// background pipeline. Their outcome is reported through [`events`](Self::events) rather than
/// to the caller. Queries stream their result chunk by chunk.
///
/// ```no_run
/// # use influxdb_reactive::{Client, ClientOptions, Point, Precision};
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
/// let options = ClientOptions::new("http://localhost:8086")?.database("weather")?;
/// let client = Client::new(options);
///
/// client.write_point(
///     Point::builder("h2o_feet")
///         .tag("location", "coyote_creek")
///         .field("water_level", 2.927)
///         .timestamp(1_440_046_800, Precision::Second)
///         .build()?,
/// )?;
///
/// client.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    options: ClientOptions,
    default_write_options: Option<WriteOptions>,
    transport: Arc<dyn Transport>,
    events: EventBus,
    pipeline: Pipeline,
}

impl Client {
    /// Create a client with the default [`BatchOptions`]
    ///
    /// # Panics
    ///
    /// When called outside of a tokio runtime.
    pub fn new(options: ClientOptions) -> Self {
        Self::builder(options).build()
    }

    pub fn builder(options: ClientOptions) -> ClientBuilder {
        ClientBuilder {
            options,
            batch_options: BatchOptions::default(),
            transport: None,
            schedulers: Schedulers::default(),
            event_capacity: crate::events::EVENT_BUS_CAPACITY,
        }
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    fn default_write_options(&self) -> Result<&WriteOptions> {
        self.default_write_options
            .as_ref()
            .ok_or(Error::MissingWriteOptions)
    }

    /// Queue a [`DataPoint`] for writing
    pub fn write(&self, point: DataPoint) -> Result<()> {
        self.pipeline.push(point)
    }

    /// Queue several [`DataPoint`]s for writing, in order
    pub fn write_all(&self, points: impl IntoIterator<Item = DataPoint>) -> Result<()> {
        self.pipeline.push_all(points)
    }

    /// Queue a point for the default database
    pub fn write_point(&self, point: Point) -> Result<()> {
        let options = self.default_write_options()?;
        self.write_point_with(options, point)
    }

    pub fn write_point_with(&self, options: &WriteOptions, point: Point) -> Result<()> {
        self.write(DataPoint::new(point, options.clone()))
    }

    /// Queue points for the default database
    pub fn write_points(&self, points: impl IntoIterator<Item = Point>) -> Result<()> {
        let options = self.default_write_options()?;
        self.write_points_with(options, points)
    }

    pub fn write_points_with(
        &self,
        options: &WriteOptions,
        points: impl IntoIterator<Item = Point>,
    ) -> Result<()> {
        self.write_all(
            points
                .into_iter()
                .map(|point| DataPoint::new(point, options.clone())),
        )
    }

    /// Queue a line of line protocol for the default database
    pub fn write_record(&self, record: impl Into<String>) -> Result<()> {
        let options = self.default_write_options()?;
        self.write_record_with(options, record)
    }

    pub fn write_record_with(&self, options: &WriteOptions, record: impl Into<String>) -> Result<()> {
        let record: String = record.into();
        self.write(DataPoint::new(record, options.clone()))
    }

    /// Queue lines of line protocol for the default database
    pub fn write_records<R: Into<String>>(&self, records: impl IntoIterator<Item = R>) -> Result<()> {
        let options = self.default_write_options()?;
        self.write_records_with(options, records)
    }

    pub fn write_records_with<R: Into<String>>(
        &self,
        options: &WriteOptions,
        records: impl IntoIterator<Item = R>,
    ) -> Result<()> {
        self.write_all(records.into_iter().map(|record| {
            let record: String = record.into();
            DataPoint::new(record, options.clone())
        }))
    }

    /// Queue a [`Measurement`] for the default database
    pub fn write_measurement(&self, measurement: impl Measurement) -> Result<()> {
        let options = self.default_write_options()?;
        self.write_measurement_with(options, measurement)
    }

    pub fn write_measurement_with(
        &self,
        options: &WriteOptions,
        measurement: impl Measurement,
    ) -> Result<()> {
        let measurement: Arc<dyn Measurement> = Arc::new(measurement);
        self.write(DataPoint::new(measurement, options.clone()))
    }

    /// Queue [`Measurement`]s for the default database
    pub fn write_measurements<M: Measurement>(
        &self,
        measurements: impl IntoIterator<Item = M>,
    ) -> Result<()> {
        let options = self.default_write_options()?;
        self.write_measurements_with(options, measurements)
    }

    pub fn write_measurements_with<M: Measurement>(
        &self,
        options: &WriteOptions,
        measurements: impl IntoIterator<Item = M>,
    ) -> Result<()> {
        self.write_all(measurements.into_iter().map(|measurement| {
            let measurement: Arc<dyn Measurement> = Arc::new(measurement);
            DataPoint::new(measurement, options.clone())
        }))
    }

    /// Queue every payload of `stream` for the default database as it arrives
    ///
    /// Completes when the stream ends, or with the first error of the write queue.
    pub async fn write_stream<S>(&self, stream: S) -> Result<()>
    where
        S: Stream + Send,
        S::Item: Into<Payload> + Send,
    {
        let options = self.default_write_options()?.clone();
        self.write_stream_with(&options, stream).await
    }

    pub async fn write_stream_with<S>(&self, options: &WriteOptions, stream: S) -> Result<()>
    where
        S: Stream + Send,
        S::Item: Into<Payload> + Send,
    {
        let mut stream = std::pin::pin!(stream);
        let mut n_points = 0_usize;
        while let Some(payload) = stream.next().await {
            self.write(DataPoint::new(payload, options.clone()))?;
            n_points += 1;
        }
        debug!(n_points, database = options.database_name(), "write stream completed");
        Ok(())
    }

    /// Run a chunked query with the default [`QueryOptions`]
    pub async fn query(&self, query: &Query) -> Result<QueryStream> {
        self.query_with(query, &QueryOptions::default()).await
    }

    /// Run a chunked query; the returned stream yields each chunk as soon as it is received
    pub async fn query_with(&self, query: &Query, options: &QueryOptions) -> Result<QueryStream> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        debug!(
            query = query.command(),
            database = query.database_name(),
            chunk_size = options.get_chunk_size(),
            "starting chunked query"
        );
        let body = self.transport.query(query, options).await?;
        Ok(QueryStream::new(body, self.events.clone()))
    }

    pub async fn ping(&self) -> Result<Pong> {
        self.transport.ping().await
    }

    /// The version the server reports
    pub async fn version(&self) -> Result<String> {
        Ok(self.ping().await?.version)
    }

    /// Listen to every event published from now on
    pub fn events(&self) -> EventListener {
        self.events.subscribe()
    }

    /// Listen to the events of `kind` published from now on
    pub fn listen_events(&self, kind: EventKind) -> EventListener {
        self.events.subscribe_kind(kind)
    }

    /// Flush the pending points and stop the write pipeline
    ///
    /// Writes already accepted are sent, but a write waiting for a retry is abandoned. Further
    /// writes fail with [`Error::Closed`].
    pub async fn close(&self) {
        self.pipeline.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.pipeline.is_closed()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.pipeline.shutdown();
    }
}
