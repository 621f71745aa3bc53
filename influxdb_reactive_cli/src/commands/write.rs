use std::path::PathBuf;

use clap::Parser;
use influxdb_reactive::{
    BatchOptions, Client, Event, EventListener, OverflowStrategy, WriteConcurrency, WriteOptions,
};
use tokio::{
    fs::File,
    io::{self, AsyncBufReadExt, AsyncRead, BufReader},
    sync::oneshot,
};
use tracing::info;

use super::common::{ConsistencyArg, InfluxDbConfig};

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Client(#[from] influxdb_reactive::Error),

    #[error("error reading input: {0}")]
    Io(#[from] io::Error),

    #[error("{failed} points could not be written")]
    Incomplete { failed: usize },
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Parser)]
#[clap(visible_alias = "w")]
pub(crate) struct Config {
    #[clap(flatten)]
    influxdb_config: InfluxDbConfig,

    /// File path to load line protocol from, stdin if not given
    #[clap(short = 'f', long = "file")]
    file_path: Option<PathBuf>,

    /// Retention policy of the written points
    #[clap(long = "retention-policy", env = "INFLUXDB_RETENTION_POLICY")]
    retention_policy: Option<String>,

    /// Write consistency: all, any, one or quorum
    #[clap(long = "consistency", env = "INFLUXDB_CONSISTENCY", default_value = "one")]
    consistency: ConsistencyArg,

    /// Number of points that close a batch
    #[clap(long = "batch-size", env = "INFLUXDB_BATCH_SIZE", default_value = "1000")]
    batch_size: usize,

    /// Time after which a batch is closed even if it is not full
    #[clap(long = "flush-interval", env = "INFLUXDB_FLUSH_INTERVAL", default_value = "1s")]
    flush_interval: humantime::Duration,

    /// Upper bound of the random delay added to every flush
    #[clap(long = "jitter-interval", env = "INFLUXDB_JITTER_INTERVAL", default_value = "0s")]
    jitter_interval: humantime::Duration,

    /// Time to wait before retrying a write the server could not take
    #[clap(long = "retry-interval", env = "INFLUXDB_RETRY_INTERVAL", default_value = "1s")]
    retry_interval: humantime::Duration,

    /// Number of points buffered before the oldest are dropped
    #[clap(long = "buffer-limit", env = "INFLUXDB_BUFFER_LIMIT", default_value = "10000")]
    buffer_limit: usize,

    /// Write the destinations of a batch concurrently
    #[clap(long = "concurrent", default_value_t = false)]
    concurrent: bool,
}

impl Config {
    fn batch_options(&self) -> Result<BatchOptions> {
        let concurrency = if self.concurrent {
            WriteConcurrency::Concurrent
        } else {
            WriteConcurrency::Inline
        };
        Ok(BatchOptions::default()
            .batch_size(self.batch_size)?
            .flush_interval(self.flush_interval.into())?
            .jitter_interval(self.jitter_interval.into())
            .retry_interval(self.retry_interval.into())?
            .buffer_limit(self.buffer_limit)
            .overflow_strategy(OverflowStrategy::DropOldest)
            .write_concurrency(concurrency))
    }

    fn write_options(&self) -> Result<WriteOptions> {
        let mut options = WriteOptions::new(&self.influxdb_config.database_name)?
            .consistency_level(self.consistency.0)
            .precision(self.influxdb_config.precision.0);
        if let Some(retention_policy) = &self.retention_policy {
            options = options.retention_policy(retention_policy)?;
        }
        Ok(options)
    }
}

/// What happened to the points of one run
#[derive(Debug, Default, Clone, Copy)]
struct Summary {
    written: usize,
    failed: usize,
    dropped: usize,
}

impl Summary {
    fn record(&mut self, event: &Event) {
        match event {
            Event::WriteSuccess { points, .. } | Event::WriteUdp { points, .. } => {
                self.written += points.len()
            }
            // retried until it succeeds or the client closes
            Event::WriteError { error, .. } if error.is_retry_worth() => {}
            Event::WriteError { points, .. }
            | Event::WritePartial { points, .. }
            | Event::Unhandled { points, .. } => self.failed += points.len(),
            Event::Backpressure { dropped } => self.dropped += dropped,
            Event::QueryChunkParsed { .. } => {}
        }
    }
}

/// Count outcomes until `stop` fires and nothing is left to receive
async fn summarize(mut events: EventListener, mut stop: oneshot::Receiver<()>) -> Summary {
    let mut summary = Summary::default();
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Some(event) => summary.record(&event),
                None => break,
            },
            _ = &mut stop => {
                while let Some(event) = events.try_recv() {
                    summary.record(&event);
                }
                break;
            }
        }
    }
    summary
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let client = Client::builder(config.influxdb_config.client_options()?)
        .batch_options(config.batch_options()?)
        .build();
    let write_options = config.write_options()?;

    let (stop_tx, stop_rx) = oneshot::channel();
    let summary = tokio::spawn(summarize(client.events(), stop_rx));

    let n_lines = match &config.file_path {
        Some(path) => write_lines(&client, &write_options, File::open(path).await?).await,
        None => write_lines(&client, &write_options, io::stdin()).await,
    };
    client.close().await;
    let _ = stop_tx.send(());
    let n_lines = n_lines?;

    let summary = summary.await.unwrap_or_default();
    info!(
        n_lines,
        written = summary.written,
        failed = summary.failed,
        dropped = summary.dropped,
        "write completed"
    );
    println!(
        "wrote {} of {n_lines} points, {} failed, {} dropped",
        summary.written, summary.failed, summary.dropped
    );

    match summary.failed + summary.dropped {
        0 => Ok(()),
        failed => Err(Error::Incomplete { failed }),
    }
}

/// Queue every non-empty, non-comment line of `input`
async fn write_lines(
    client: &Client,
    options: &WriteOptions,
    input: impl AsyncRead + Unpin + Send,
) -> Result<usize> {
    let mut lines = BufReader::new(input).lines();
    let mut n_lines = 0;
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        client.write_record_with(options, line)?;
        n_lines += 1;
    }
    Ok(n_lines)
}
