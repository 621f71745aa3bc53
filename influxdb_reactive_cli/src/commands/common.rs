use std::str::FromStr;

use clap::Parser;
use influxdb_reactive::{ClientOptions, ConsistencyLevel, Precision};
use secrecy::{ExposeSecret, Secret};
use url::Url;

#[derive(Debug, Parser)]
pub(crate) struct InfluxDbConfig {
    /// The host URL of the running InfluxDB server
    #[clap(
        short = 'H',
        long = "host",
        env = "INFLUXDB_HOST_URL",
        default_value = "http://127.0.0.1:8086"
    )]
    pub(crate) host_url: Url,

    /// The name of the database to operate on
    #[clap(short = 'd', long = "database", env = "INFLUXDB_DATABASE_NAME")]
    pub(crate) database_name: String,

    #[clap(short = 'u', long = "username", env = "INFLUXDB_USERNAME")]
    pub(crate) username: Option<String>,

    #[clap(short = 'p', long = "password", env = "INFLUXDB_PASSWORD")]
    pub(crate) password: Option<Secret<String>>,

    /// Precision of the timestamps written or returned: n, u, ms, s, m or h
    #[clap(long = "precision", env = "INFLUXDB_PRECISION", default_value = "n")]
    pub(crate) precision: PrecisionArg,
}

impl InfluxDbConfig {
    pub(crate) fn client_options(&self) -> Result<ClientOptions, influxdb_reactive::Error> {
        let mut options = ClientOptions::new(self.host_url.as_str())?
            .database(&self.database_name)?
            .precision(self.precision.0);
        if let Some(username) = &self.username {
            options = options.username(username);
        }
        if let Some(password) = &self.password {
            options = options.password(password.expose_secret());
        }
        Ok(options)
    }
}

/// A [`Precision`] given by its line protocol abbreviation
#[derive(Debug, Clone, Copy)]
pub(crate) struct PrecisionArg(pub(crate) Precision);

impl FromStr for PrecisionArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let precision = match s {
            "n" | "ns" => Precision::Nanosecond,
            "u" | "us" => Precision::Microsecond,
            "ms" => Precision::Millisecond,
            "s" => Precision::Second,
            "m" => Precision::Minute,
            "h" => Precision::Hour,
            _ => anyhow::bail!("unknown precision '{s}', expected one of n, u, ms, s, m or h"),
        };
        Ok(Self(precision))
    }
}

/// A [`ConsistencyLevel`] given by name
#[derive(Debug, Clone, Copy)]
pub(crate) struct ConsistencyArg(pub(crate) ConsistencyLevel);

impl FromStr for ConsistencyArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.to_ascii_lowercase().as_str() {
            "all" => ConsistencyLevel::All,
            "any" => ConsistencyLevel::Any,
            "one" => ConsistencyLevel::One,
            "quorum" => ConsistencyLevel::Quorum,
            _ => anyhow::bail!("unknown consistency level '{s}'"),
        };
        Ok(Self(level))
    }
}
