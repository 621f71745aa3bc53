//! The network calls made by the client.

use std::{
    fmt::Debug,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use reqwest::{
    Method, Response, StatusCode,
    header::{CONTENT_TYPE, HeaderMap},
};
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use tokio::net::UdpSocket;
use tracing::trace;
use url::{Host, Url};

use crate::{
    ClientOptions, Error, Query, QueryOptions, Result, ServerError, WriteOptions, query::ByteStream,
};

/// Headers the server may carry its error message in
const ERROR_HEADERS: &[&str] = &["X-Influxdb-Error", "X-Influx-Error"];

const VERSION_HEADER: &str = "X-Influxdb-Version";

/// The answer to a ping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pong {
    pub version: String,
    pub response_time: Duration,
}

impl Pong {
    /// `false` when the server did not report its version
    pub fn is_good(&self) -> bool {
        !self.version.eq_ignore_ascii_case("unknown")
    }
}

/// The calls the write pipeline and the query reader make to the server
///
/// A write rejected by the server fails with [`Error::Server`], so that the pipeline can classify
/// it; any other error is treated as a transport failure.
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// Write a line protocol body over HTTP
    async fn write(&self, options: &WriteOptions, body: Bytes) -> Result<()>;

    /// Send a line protocol body as one UDP datagram to `port` on the server host
    async fn write_udp(&self, port: u16, body: Bytes) -> Result<()>;

    /// Start a chunked query; the returned stream yields the raw response body
    async fn query(&self, query: &Query, options: &QueryOptions) -> Result<ByteStream>;

    /// Check that the server is up and report its version
    async fn ping(&self) -> Result<Pong>;
}

/// [`Transport`] over the HTTP API of the server
#[derive(Debug, Clone)]
pub struct HttpTransport {
    /// The base URL for making requests to a running server
    base_url: Url,
    username: Option<String>,
    password: Option<Secret<String>>,
    /// A [`reqwest::Client`] for handling HTTP requests
    http_client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport for the server described by `options`
    pub fn new(options: &ClientOptions) -> Self {
        Self::with_http_client(options, reqwest::Client::new())
    }

    /// Create a transport that makes its requests with `http_client`, e.g. one configured with
    /// timeouts or a proxy
    pub fn with_http_client(options: &ClientOptions, http_client: reqwest::Client) -> Self {
        Self {
            base_url: options.url().clone(),
            username: options.get_username().map(ToOwned::to_owned),
            password: options.get_password().cloned(),
            http_client,
        }
    }

    async fn udp_target(&self, port: u16) -> std::io::Result<SocketAddr> {
        match self.base_url.host() {
            Some(Host::Ipv4(ip)) => Ok((ip, port).into()),
            Some(Host::Ipv6(ip)) => Ok((ip, port).into()),
            Some(Host::Domain(domain)) => tokio::net::lookup_host((domain, port))
                .await?
                .next()
                .ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no address found for {domain}"),
                    )
                }),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no host", self.base_url),
            )),
        }
    }
}

#[derive(Debug, Serialize)]
struct WriteParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    u: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<&'a str>,
    rp: &'a str,
    precision: &'static str,
    consistency: &'static str,
}

#[derive(Debug, Serialize)]
struct QueryParams<'a> {
    chunked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    u: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    p: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<&'a str>,
    epoch: &'static str,
    chunk_size: usize,
    q: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<String>,
}

#[async_trait]
impl Transport for HttpTransport {
    async fn write(&self, options: &WriteOptions, body: Bytes) -> Result<()> {
        let url = self.base_url.join("/write")?;
        let params = WriteParams {
            u: self.username.as_deref(),
            p: self.password.as_ref().map(|p| p.expose_secret().as_str()),
            db: options.database_name(),
            rp: options.retention_policy_name(),
            precision: options.time_precision().as_str(),
            consistency: options.consistency().as_str(),
        };
        trace!(n_bytes = body.len(), database = params.db, "sending write");
        let resp = self
            .http_client
            .post(url)
            .query(&params)
            .header(CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|src| Error::request_send(Method::POST, "/write", src))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(server_error(resp).await?.into())
        }
    }

    async fn write_udp(&self, port: u16, body: Bytes) -> Result<()> {
        let udp = |source| Error::Udp { port, source };
        let target = self.udp_target(port).await.map_err(udp)?;
        let bind: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind).await.map_err(udp)?;
        socket.send_to(&body, target).await.map_err(udp)?;
        Ok(())
    }

    async fn query(&self, query: &Query, options: &QueryOptions) -> Result<ByteStream> {
        let url = self.base_url.join("/query")?;
        let params = QueryParams {
            chunked: true,
            u: self.username.as_deref(),
            p: self.password.as_ref().map(|p| p.expose_secret().as_str()),
            db: query.database_name(),
            epoch: options.get_precision().as_str(),
            chunk_size: options.get_chunk_size(),
            q: query.command(),
            params: query.params_json(),
        };
        let resp = self
            .http_client
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(|src| Error::request_send(Method::GET, "/query", src))?;

        if !resp.status().is_success() {
            return Err(server_error(resp).await?.into());
        }

        Ok(resp
            .bytes_stream()
            .map_err(|e| Error::QueryStream(Box::new(e)))
            .boxed())
    }

    async fn ping(&self) -> Result<Pong> {
        let url = self.base_url.join("/ping")?;
        let started = Instant::now();
        let resp = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|src| Error::request_send(Method::GET, "/ping", src))?;
        let response_time = started.elapsed();

        if !resp.status().is_success() {
            return Err(server_error(resp).await?.into());
        }

        let version = resp
            .headers()
            .get(VERSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();
        Ok(Pong {
            version,
            response_time,
        })
    }
}

fn error_header(headers: &HeaderMap) -> Option<String> {
    ERROR_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name))
        .find_map(|v| v.to_str().ok())
        .map(ToOwned::to_owned)
}

async fn server_error(resp: Response) -> Result<ServerError> {
    let status: StatusCode = resp.status();
    let header = error_header(resp.headers());
    let body = resp.text().await.map_err(Error::ResponseBody)?;
    Ok(ServerError::from_response(status, header.as_deref(), &body))
}
