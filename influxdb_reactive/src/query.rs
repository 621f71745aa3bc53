//! Queries and the incremental reader of chunked query responses.

use std::{
    collections::BTreeMap,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt, stream::BoxStream};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Event, EventBus, Result, error::is_eof};

/// A query and its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    command: String,
    database: Option<String>,
    params: serde_json::Map<String, serde_json::Value>,
}

impl Query {
    /// A query that is not bound to a database
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            database: None,
            params: Default::default(),
        }
    }

    /// Run the query against `database`
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Bind the `$name` placeholder of the query to `value`
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn database_name(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// The bound parameters, encoded the way the `params` URL parameter expects them; `None` when
    /// nothing is bound
    pub fn params_json(&self) -> Option<String> {
        (!self.params.is_empty()).then(|| serde_json::Value::Object(self.params.clone()).to_string())
    }
}

/// One self-contained object of a query response
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct QueryResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub results: Vec<StatementResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// The result of one statement of a query
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct StatementResult {
    #[serde(default)]
    pub statement_id: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub series: Vec<Series>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// More chunks follow for this statement
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

/// Rows of one series
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Series {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

// marks the end of a chunked response
const DONE: &str = "DONE";

/// The byte stream of a response body
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// The decoded chunks of a chunked query response
///
/// Each chunk is yielded as soon as it has been received in full, and published on the event bus
/// as an [`Event::QueryChunkParsed`].
pub struct QueryStream {
    inner: BoxStream<'static, Result<Arc<QueryResult>>>,
}

impl std::fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream").finish_non_exhaustive()
    }
}

impl QueryStream {
    pub(crate) fn new(body: ByteStream, events: EventBus) -> Self {
        let decoder = ChunkDecoder {
            body,
            buf: BytesMut::new(),
            scanned: 0,
            ended: false,
            done: false,
            events,
        };
        let inner = futures::stream::unfold(decoder, |mut decoder| async move {
            decoder.next_chunk().await.map(|item| (item, decoder))
        })
        .boxed();
        Self { inner }
    }
}

impl Stream for QueryStream {
    type Item = Result<Arc<QueryResult>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

/// Splits the response body into newline terminated chunks and decodes them
///
/// Bytes are searched for a line end once; a chunk is parsed when its line is complete, so the
/// cost of decoding stays linear in the size of the response however it is framed.
struct ChunkDecoder {
    body: ByteStream,
    buf: BytesMut,
    /// `buf[..scanned]` holds no line end that completes a chunk
    scanned: usize,
    /// The body has no more bytes to give
    ended: bool,
    done: bool,
    events: EventBus,
}

enum Step {
    Chunk(Bytes, QueryResult),
    NeedMore,
    Finished,
}

impl ChunkDecoder {
    async fn next_chunk(&mut self) -> Option<Result<Arc<QueryResult>>> {
        while !self.done {
            match self.next_frame() {
                Ok(Step::Chunk(chunk, result)) => {
                    if result.error.as_deref() == Some(DONE) {
                        self.done = true;
                        break;
                    }
                    let result = Arc::new(result);
                    self.events.publish(Event::QueryChunkParsed {
                        chunk,
                        result: Arc::clone(&result),
                    });
                    return Some(Ok(result));
                }
                Ok(Step::NeedMore) => {}
                Ok(Step::Finished) => {
                    self.done = true;
                    break;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }

            match self.body.next().await {
                Some(Ok(bytes)) => self.buf.extend_from_slice(&bytes),
                Some(Err(e)) if is_eof(&e) => {
                    debug!(%e, "query response closed by the server");
                    self.ended = true;
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => self.ended = true,
            }
        }
        None
    }

    /// Take the next complete chunk off the buffer
    ///
    /// Once the body has ended, whatever is left is decoded as the last chunk.
    fn next_frame(&mut self) -> Result<Step> {
        loop {
            let end = match self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
                Some(pos) => self.scanned + pos + 1,
                None if self.ended => self.buf.len(),
                None => {
                    self.scanned = self.buf.len();
                    return Ok(Step::NeedMore);
                }
            };

            let frame = &self.buf[..end];
            if frame.iter().all(u8::is_ascii_whitespace) {
                if end == 0 {
                    return Ok(Step::Finished);
                }
                self.buf.advance(end);
                self.scanned = 0;
                continue;
            }

            match serde_json::from_slice::<QueryResult>(frame) {
                Ok(result) => {
                    let chunk = self.buf.split_to(end).freeze();
                    self.scanned = 0;
                    return Ok(Step::Chunk(chunk, result));
                }
                // the object continues on the next line
                Err(e) if e.is_eof() && (!self.ended || end < self.buf.len()) => {
                    self.scanned = end;
                }
                Err(e) if e.is_eof() => {
                    debug!(
                        n_bytes = self.buf.len(),
                        "query response ended inside a chunk, ignoring the tail"
                    );
                    self.buf.clear();
                    return Ok(Step::Finished);
                }
                Err(e) => return Err(Error::QueryDecode(e)),
            }
        }
    }
}
