//! Entry point for the wirestream binary.
//!
//! Two modes share one set of connection options:
//! - `serve` runs an echo server speaking the packet framing through
//!   `tokio-util`'s `Framed`
//! - `ping` drives a `Stream` against such a server and reconnects
//!   whenever the transport fails, without rebuilding the stream

use crate::client::PingLimits;
use crate::error::AppError;
use clap::{Parser, Subcommand};
use log::info;
use std::time::Duration;
use wirestream_core::StreamConfig;

mod client;
mod error;
mod server;

#[derive(Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    /// Optional `.env` file path for loading environment variables.
    #[clap(short, long, value_name = "ENV_FILE")]
    env_file: Option<String>,

    /// Host to bind to (serve) or to connect to (ping).
    #[clap(
        short = 's',
        long,
        value_name = "HOST",
        env = "WIRESTREAM_HOST",
        default_value = "127.0.0.1"
    )]
    host: String,

    /// Port to bind to (serve) or to connect to (ping).
    #[clap(
        short = 'p',
        long,
        value_name = "PORT",
        env = "WIRESTREAM_PORT",
        default_value = "5000"
    )]
    port: u16,

    /// Optional log level.
    #[clap(
        short = 'l',
        long,
        value_name = "LOG_LEVEL",
        env = "WIRESTREAM_LOG_LEVEL",
        default_value = "info"
    )]
    log_level: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Answer every `ping` packet with `pong` and echo everything else.
    Serve,
    /// Send ping packets and wait for the replies.
    Ping {
        /// Number of pings to send.
        #[clap(short = 'c', long, default_value = "5")]
        count: usize,

        /// Interval between pings in milliseconds.
        #[clap(short = 'i', long, default_value = "1000")]
        interval: u64,

        /// Capacity of the incoming and outgoing packet queues.
        #[clap(
            long,
            value_name = "CHANNEL_BUFFER_SIZE",
            env = "WIRESTREAM_CHANNEL_BUFFER_SIZE",
            default_value = "1024"
        )]
        channel_buffer_size: usize,

        /// Interval between redial attempts in milliseconds.
        #[clap(
            long,
            value_name = "RETRY_INTERVAL",
            env = "WIRESTREAM_RETRY_INTERVAL",
            default_value = "1000"
        )]
        retry_interval: u64,

        /// Global timeout in seconds for establishing a connection.
        #[clap(
            long,
            value_name = "GLOBAL_TIMEOUT",
            env = "WIRESTREAM_GLOBAL_TIMEOUT",
            default_value = "10"
        )]
        global_timeout: u64,

        /// Maximum number of redial attempts before failing.
        #[clap(
            long,
            value_name = "MAX_RETRIES",
            env = "WIRESTREAM_MAX_RETRIES",
            default_value = "5"
        )]
        max_retries: usize,
    },
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();
    if let Some(env_file) = cli.env_file.clone() {
        dotenvy::from_filename(env_file)?;
        cli = Cli::parse();
    }

    env_logger::Builder::new()
        .parse_filters(&format!(
            "wirestream={0},wirestream_core={0},info",
            cli.log_level
        ))
        .format_timestamp_millis()
        .init();

    match cli.command {
        Command::Serve => server::serve(&cli.host, cli.port).await,
        Command::Ping {
            count,
            interval,
            channel_buffer_size,
            retry_interval,
            global_timeout,
            max_retries,
        } => {
            let addr = format!("{}:{}", cli.host, cli.port);
            info!("Pinging {addr} {count} times");

            let stream_config = StreamConfig::new(channel_buffer_size);
            let limits = PingLimits {
                count,
                interval: Duration::from_millis(interval),
                max_retries,
                retry_interval: Duration::from_millis(retry_interval),
                global_timeout: Duration::from_secs(global_timeout),
            };
            client::ping(&addr, stream_config, limits).await
        }
    }
}
