//! Entrypoint of the influxdb_reactive binary

use tracing_subscriber::{EnvFilter, fmt};

mod commands {
    pub(crate) mod common;
    pub(crate) mod query;
    pub(crate) mod write;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "influxdb_reactive",
    about = "Write line protocol through a batching pipeline and run chunked queries",
    long_about = r#"Write line protocol through a batching pipeline and run chunked queries

Examples:
    # Write the line protocol of a file to the `weather` database
    influxdb_reactive write -d weather -f h2o_feet.lp

    # Write line protocol from stdin, flushing every 200 points or 100ms
    generate_points | influxdb_reactive write -d weather --batch-size 200 --flush-interval 100ms

    # Run a query and print every chunk as one line of JSON
    influxdb_reactive query -d weather "SELECT * FROM h2o_feet"
"#
)]
struct Config {
    /// Logs: filter directives, e.g. `info,influxdb_reactive=debug`
    #[clap(long = "log-filter", env = "RUST_LOG", default_value = "info", global = true)]
    log_filter: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Write line protocol from a file or stdin
    Write(commands::write::Config),

    /// Run a chunked query and print the chunks as JSON lines
    Query(commands::query::Config),
}

#[tokio::main]
async fn main() {
    let config: Config = clap::Parser::parse();

    if let Err(e) = init_logs(&config.log_filter) {
        eprintln!("Initializing logs failed: {e}");
        std::process::exit(ReturnCode::Failure as _);
    }

    match config.command {
        Command::Write(config) => {
            if let Err(e) = commands::write::command(config).await {
                eprintln!("Write command failed: {e}");
                std::process::exit(ReturnCode::Failure as _)
            }
        }
        Command::Query(config) => {
            if let Err(e) = commands::query::command(config).await {
                eprintln!("Query command failed: {e}");
                std::process::exit(ReturnCode::Failure as _)
            }
        }
    }
}

fn init_logs(filter: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_new(filter)?;
    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}
