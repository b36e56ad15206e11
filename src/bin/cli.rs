//! NetRemote CLI - command-line client
//!
//! Sends a single request to a running server and prints the response.

use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use netremote_core::cli::{CliResult, ExitCodes};
use netremote_core::core::transport::DEFAULT_PORT;
use netremote_core::{Response, Verb};
use std::process::ExitCode;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

/// Longest line accepted from the server
const MAX_LINE_LEN: usize = 64 * 1024;

/// NetRemote CLI
#[derive(Parser, Debug)]
#[command(
    name = "netremote-cli",
    version,
    about = "Query and control a NetRemote server",
    long_about = None
)]
struct Cli {
    /// Server address
    #[arg(short = 'H', long, default_value = "127.0.0.1", global = true)]
    host: String,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT, global = true)]
    port: u16,

    /// Response timeout (seconds)
    #[arg(short, long, default_value = "5", global = true)]
    timeout: u64,

    /// Print the server greeting
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a property
    Get {
        /// Method name, e.g. audiogain
        method: String,
    },

    /// Write a property
    Set {
        /// Method name, e.g. squelchthreshold
        method: String,
        /// JSON value; bare words are sent as strings
        value: String,
    },

    /// Run an action (start, stop, close)
    Exe {
        /// Action name
        method: String,
    },

    /// Send text verbatim
    Raw {
        /// Request text
        text: String,
    },
}

impl Commands {
    fn request(&self) -> String {
        let envelope = match self {
            Self::Get { method } => envelope(Verb::Get, method, None),
            Self::Set { method, value } => {
                let value = serde_json::from_str(value)
                    .unwrap_or_else(|_| serde_json::Value::String(value.clone()));
                envelope(Verb::Set, method, Some(value))
            }
            Self::Exe { method } => envelope(Verb::Exe, method, None),
            Self::Raw { text } => return text.clone(),
        };
        envelope.to_string()
    }
}

fn envelope(verb: Verb, method: &str, value: Option<serde_json::Value>) -> serde_json::Value {
    let mut request = serde_json::json!({
        "command": verb.as_str(),
        "method": method,
    });
    if let Some(value) = value {
        request["value"] = value;
    }
    request
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let result = run(&cli).await?;

    match &result {
        CliResult::Success(Some(message)) => println!("{message}"),
        CliResult::Error(_, message) => eprintln!("Error: {message}"),
        CliResult::Success(None) => {}
    }
    Ok(result.to_exit_code())
}

async fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    let timeout = Duration::from_secs(cli.timeout);
    let addr = format!("{}:{}", cli.host, cli.port);

    let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => return Ok(CliResult::from(err)),
        Err(_) => return Ok(timed_out(&addr)),
    };
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));

    let greeting = match next_line(&mut framed, timeout).await {
        Ok(Some(line)) => line,
        Ok(None) => {
            return Ok(CliResult::error(
                ExitCodes::CONNECTION_FAILED,
                format!("{addr} closed the connection without a greeting"),
            ))
        }
        Err(result) => return Ok(result),
    };
    if cli.verbose {
        eprintln!("{greeting}");
    }

    let request = cli.command.request();
    if let Err(err) = framed.send(request).await {
        return Ok(codec_error(err));
    }

    let line = match next_line(&mut framed, timeout).await {
        Ok(Some(line)) => line,
        Ok(None) => return Ok(CliResult::success_with_message("Session closed")),
        Err(result) => return Ok(result),
    };

    match serde_json::from_str::<Response>(&line) {
        Ok(Response::Error { kind, message }) => {
            println!("{line}");
            Ok(CliResult::protocol_error(format!("{kind}: {message}")))
        }
        Ok(Response::Ok { .. }) => Ok(CliResult::success_with_message(line)),
        Err(_) => Ok(CliResult::protocol_error(format!("unexpected reply: {line}"))),
    }
}

async fn next_line(
    framed: &mut Framed<TcpStream, LinesCodec>,
    timeout: Duration,
) -> Result<Option<String>, CliResult> {
    match tokio::time::timeout(timeout, framed.next()).await {
        Ok(Some(Ok(line))) => Ok(Some(line)),
        Ok(Some(Err(err))) => Err(codec_error(err)),
        Ok(None) => Ok(None),
        Err(_) => Err(CliResult::error(ExitCodes::TIMEOUT, "no response from server")),
    }
}

fn timed_out(addr: &str) -> CliResult {
    CliResult::error(ExitCodes::TIMEOUT, format!("timed out connecting to {addr}"))
}

fn codec_error(err: LinesCodecError) -> CliResult {
    match err {
        LinesCodecError::Io(err) => CliResult::from(err),
        LinesCodecError::MaxLineLengthExceeded => {
            CliResult::protocol_error("reply exceeds maximum line length")
        }
    }
}
