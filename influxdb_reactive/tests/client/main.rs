use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use influxdb_reactive::{
    BatchOptions, ByteStream, Client, ClientOptions, Error, Event, EventKind, EventListener, Pong,
    Query, QueryOptions, Result, ServerError, Transport, WriteOptions,
    scheduler::{ManualScheduler, Schedulers},
};
use parking_lot::Mutex;
use reqwest::StatusCode;

mod write;

/// One request observed by the [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    pub options: WriteOptions,
    pub body: String,
}

impl WriteCall {
    pub fn lines(&self) -> Vec<&str> {
        self.body.lines().collect()
    }
}

/// An in-memory [`Transport`] that records writes and answers them from a script
#[derive(Debug, Default)]
pub struct MockTransport {
    calls: Mutex<Vec<WriteCall>>,
    udp_calls: Mutex<Vec<(u16, String)>>,
    /// Scripted answers per database, writes succeed once a script is exhausted
    responses: Mutex<HashMap<Option<String>, VecDeque<ServerError>>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail the next writes to `database` with `errors`, in order
    pub fn fail_next(&self, database: &str, errors: impl IntoIterator<Item = ServerError>) {
        self.responses
            .lock()
            .entry(Some(database.to_string()))
            .or_default()
            .extend(errors);
    }

    pub fn calls(&self) -> Vec<WriteCall> {
        self.calls.lock().clone()
    }

    pub fn n_calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn udp_calls(&self) -> Vec<(u16, String)> {
        self.udp_calls.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(&self, options: &WriteOptions, body: Bytes) -> Result<()> {
        self.calls.lock().push(WriteCall {
            options: options.clone(),
            body: String::from_utf8(body.to_vec()).expect("line protocol is utf8"),
        });
        let key = options.database_name().map(ToOwned::to_owned);
        match self
            .responses
            .lock()
            .get_mut(&key)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(Error::Server(error)),
            None => Ok(()),
        }
    }

    async fn write_udp(&self, port: u16, body: Bytes) -> Result<()> {
        self.udp_calls
            .lock()
            .push((port, String::from_utf8(body.to_vec()).expect("utf8")));
        Ok(())
    }

    async fn query(&self, _query: &Query, _options: &QueryOptions) -> Result<ByteStream> {
        unimplemented!("queries are tested against an HTTP server")
    }

    async fn ping(&self) -> Result<Pong> {
        Ok(Pong {
            version: "mock".to_string(),
            response_time: Duration::ZERO,
        })
    }
}

pub fn retryable() -> ServerError {
    ServerError::new(
        Some(StatusCode::INTERNAL_SERVER_ERROR),
        "engine: cache-max-memory-size exceeded: (1073741832/1073741824)",
    )
}

pub fn client_options() -> ClientOptions {
    ClientOptions::new("http://localhost:8086")
        .unwrap()
        .database("my_db")
        .unwrap()
}

/// A client writing to `transport` whose timers all run on `scheduler`
pub fn mock_client(
    batch_options: BatchOptions,
    transport: &Arc<MockTransport>,
    scheduler: &Arc<ManualScheduler>,
) -> Client {
    Client::builder(client_options())
        .batch_options(batch_options)
        .transport(Arc::clone(transport) as _)
        .schedulers(Schedulers::all(Arc::clone(scheduler) as _))
        .build()
}

/// Poll `condition` until it holds, failing the test after a few seconds
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition was not met in time");
}

/// Give the pipeline tasks a chance to run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Every event received so far
pub fn drain_events(listener: &mut EventListener) -> Vec<Arc<Event>> {
    std::iter::from_fn(|| listener.try_recv()).collect()
}

pub fn kinds(events: &[Arc<Event>]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind()).collect()
}
