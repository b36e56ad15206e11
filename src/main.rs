//! NetRemote - remote control daemon
//!
//! Serves the remote control protocol over TCP and/or a serial port until
//! Ctrl+C, or until every enabled transport has failed.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use netremote_core::cli::{print_exit_codes, CliResult, ExitCodes};
use netremote_core::config::log_dir;
use netremote_core::core::logger;
use netremote_core::core::transport::list_ports;
use netremote_core::{
    AppConfig, CommandRegistry, Controller, ProtocolEngine, SimulatedDevice, TransportEvent,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

/// NetRemote daemon
#[derive(Parser, Debug)]
#[command(
    name = "netremote",
    version,
    about = "Remote control server for a software radio receiver",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "NETREMOTE_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "netremote_core=trace"
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve clients (default)
    Serve(ServeArgs),

    /// List available serial ports
    ListPorts,

    /// Show version and effective configuration
    Info(ServeArgs),

    /// List process exit codes
    ExitCodes,
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum concurrent TCP clients
    #[arg(long)]
    max_clients: Option<usize>,

    /// Serve this serial port as well
    #[arg(short, long)]
    serial: Option<String>,

    /// Do not start the TCP listener
    #[arg(long)]
    no_tcp: bool,

    /// Also write daily log files (to the platform log directory unless configured)
    #[arg(long)]
    log_file: bool,
}

impl ServeArgs {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(port) = self.port {
            config.tcp.port = port;
        }
        if let Some(max) = self.max_clients {
            config.tcp.max_clients = max;
        }
        if let Some(serial) = &self.serial {
            config.serial.enabled = true;
            config.serial.port = Some(serial.clone());
        }
        if self.no_tcp {
            config.tcp.enabled = false;
        }
        if self.log_file && config.logging.directory.is_none() {
            config.logging.directory = log_dir();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let result = match &cli.command {
        Some(Commands::ListPorts) => run_list_ports(),
        Some(Commands::ExitCodes) => {
            print_exit_codes();
            CliResult::success()
        }
        Some(Commands::Info(args)) => show_info(&cli, args)?,
        Some(Commands::Serve(args)) => serve(&cli, args).await?,
        None => serve(&cli, &ServeArgs::default()).await?,
    };

    match &result {
        CliResult::Success(Some(message)) => println!("{message}"),
        CliResult::Error(_, message) => eprintln!("Error: {message}"),
        CliResult::Success(None) => {}
    }
    Ok(result.to_exit_code())
}

fn config_path(cli: &Cli) -> Option<PathBuf> {
    cli.config.clone().or_else(|| AppConfig::default_path().ok())
}

fn load_config(cli: &Cli, args: &ServeArgs) -> Result<AppConfig, CliResult> {
    let mut config = match config_path(cli) {
        Some(path) => AppConfig::load(&path).map_err(|e| CliResult::from(&e))?,
        None => AppConfig::default(),
    };
    args.apply(&mut config);
    config.validate().map_err(|e| CliResult::from(&e))?;
    Ok(config)
}

fn run_list_ports() -> CliResult {
    match list_ports() {
        Ok(ports) if ports.is_empty() => CliResult::success_with_message("No serial ports found."),
        Ok(ports) => {
            for port in ports {
                println!("{port}");
            }
            CliResult::success()
        }
        Err(err) => CliResult::from(&err),
    }
}

fn show_info(cli: &Cli, args: &ServeArgs) -> anyhow::Result<CliResult> {
    let config = match load_config(cli, args) {
        Ok(config) => config,
        Err(err) => return Ok(err),
    };

    println!("{} v{}", netremote_core::APP_TITLE, netremote_core::VERSION);
    println!("Platform: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    if let Some(path) = config_path(cli) {
        println!("Config: {}", path.display());
    }
    let registry = CommandRegistry::with_limits(&config.limits)
        .context("invalid method limits")?;
    println!("Methods: {}", registry.methods().join(", "));
    println!();
    println!(
        "{}",
        toml::to_string_pretty(&config).context("could not render configuration")?
    );
    Ok(CliResult::success())
}

async fn serve(cli: &Cli, args: &ServeArgs) -> anyhow::Result<CliResult> {
    let config = match load_config(cli, args) {
        Ok(config) => config,
        Err(err) => return Ok(err),
    };
    if !config.tcp.enabled && !config.serial.enabled {
        return Ok(CliResult::error(ExitCodes::CONFIG_ERROR, "no transport enabled"));
    }

    let _log_guard = match logger::init(&config.logging, cli.log_level.as_deref()) {
        Ok(guard) => guard,
        Err(err) => return Ok(CliResult::error(ExitCodes::CONFIG_ERROR, err.to_string())),
    };
    info!("Starting {} v{}", netremote_core::APP_TITLE, netremote_core::VERSION);

    let registry = CommandRegistry::with_limits(&config.limits)
        .context("invalid method limits")?;
    let engine = Arc::new(ProtocolEngine::new(registry, Arc::new(SimulatedDevice::new())));

    let (mut controller, mut events) = Controller::new(config, engine);
    let failures = controller.start().await;
    let mut outcome = failures.first().map(|(_, err)| CliResult::from(err));

    while let Ok(event) = events.try_recv() {
        report(&mut controller, &event);
    }

    loop {
        if !controller.is_running() {
            break;
        }
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    warn!(error = %err, "could not listen for Ctrl+C");
                }
                info!("interrupted, shutting down");
                break;
            }
            Some(event) = events.recv() => {
                if report(&mut controller, &event) && outcome.is_none() {
                    outcome = Some(CliResult::error(
                        ExitCodes::TRANSPORT_FAILED,
                        format!("{} transport failed", event.transport()),
                    ));
                }
            }
        }
    }

    controller.shutdown().await;
    Ok(outcome.unwrap_or_else(CliResult::success))
}

/// Returns whether the event was a failure
fn report(controller: &mut Controller, event: &TransportEvent) -> bool {
    match controller.handle_event(event) {
        Some(diagnostic) => {
            eprintln!("{diagnostic}");
            true
        }
        None => false,
    }
}
