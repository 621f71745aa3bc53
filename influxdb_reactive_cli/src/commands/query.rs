use std::io::Write;

use clap::Parser;
use futures::TryStreamExt;
use influxdb_reactive::{Client, Query, QueryOptions};
use tracing::debug;

use super::common::InfluxDbConfig;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Client(#[from] influxdb_reactive::Error),

    #[error("error writing output: {0}")]
    Output(#[from] std::io::Error),

    #[error("error encoding chunk: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Parser)]
#[clap(visible_alias = "q", trailing_var_arg = true)]
pub(crate) struct Config {
    #[clap(flatten)]
    influxdb_config: InfluxDbConfig,

    /// Number of rows per chunk the server is asked for
    #[clap(long = "chunk-size", env = "INFLUXDB_CHUNK_SIZE", default_value = "10000")]
    chunk_size: usize,

    /// Bind parameter of the query as `name=value`, may be repeated
    #[clap(long = "param", value_parser = parse_param)]
    params: Vec<(String, serde_json::Value)>,

    /// The query to run
    #[clap(required = true, num_args = 1..)]
    query: Vec<String>,
}

/// A `name=value` pair, `value` read as JSON if it parses as JSON and as a string otherwise
fn parse_param(s: &str) -> std::result::Result<(String, serde_json::Value), anyhow::Error> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("expected name=value, got '{s}'"))?;
    if name.is_empty() {
        anyhow::bail!("parameter name is empty in '{s}'");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| value.into());
    Ok((name.to_string(), value))
}

pub(crate) async fn command(config: Config) -> Result<()> {
    let options = QueryOptions::default()
        .chunk_size(config.chunk_size)?
        .precision(config.influxdb_config.precision.0);
    let mut query =
        Query::new(config.query.join(" ")).database(&config.influxdb_config.database_name);
    for (name, value) in config.params {
        query = query.bind(name, value);
    }

    let client = Client::new(config.influxdb_config.client_options()?);
    let mut chunks = client.query_with(&query, &options).await?;

    let mut stdout = std::io::stdout();
    let mut n_chunks = 0_usize;
    while let Some(chunk) = chunks.try_next().await? {
        serde_json::to_writer(&mut stdout, &*chunk)?;
        writeln!(stdout)?;
        n_chunks += 1;
    }
    debug!(n_chunks, "query completed");

    client.close().await;
    Ok(())
}
