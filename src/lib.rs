//! # NetRemote Core Library
//!
//! Remote control server for a software radio receiver. Clients query and
//! change the receiver state with JSON requests over:
//! - TCP (up to N concurrent clients, default port 3382)
//! - A serial line at 115200 baud (one session)
//!
//! ## Features
//!
//! - Typed command registry with per-method bounds
//! - Brace-balance or line-terminated request framing
//! - Dead session pruning for TCP
//! - Transport failure events for the owner
//!
//! ## Example
//!
//! ```rust,no_run
//! use netremote_core::{AppConfig, CommandRegistry, Controller, ProtocolEngine, SimulatedDevice};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = Arc::new(ProtocolEngine::new(
//!         CommandRegistry::new(),
//!         Arc::new(SimulatedDevice::new()),
//!     ));
//!     let (mut controller, mut events) = Controller::new(AppConfig::default(), engine);
//!     controller.start().await;
//!
//!     while let Some(event) = events.recv().await {
//!         if let Some(diagnostic) = controller.handle_event(&event) {
//!             eprintln!("{diagnostic}");
//!         }
//!         if !controller.is_running() {
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::{CliResult, ExitCodes};
pub use crate::config::{AppConfig, ConfigError};
pub use crate::core::controller::Controller;
pub use crate::core::device::{
    ControlledDevice, DetectorType, DeviceError, DeviceState, SimulatedDevice, WindowType,
};
pub use crate::core::engine::{Outcome, ProtocolEngine};
pub use crate::core::protocol::framing::{Frame, FramingPolicy, RemoteCodec};
pub use crate::core::protocol::{Greeting, ProtocolError, Request, Response, Verb};
pub use crate::core::registry::{CommandRegistry, MethodLimits, MethodValue};
pub use crate::core::session::{Session, SessionEnd};
pub use crate::core::transport::{
    SerialServer, SerialServerConfig, TcpServer, TcpServerConfig, Transport, TransportError,
    TransportEvent, TransportType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Name announced in the greeting
pub const APP_TITLE: &str = "NetRemote";
