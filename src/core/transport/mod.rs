//! Transport layer for the remote control server
//!
//! Supports:
//! - TCP listener serving up to N concurrent sessions
//! - A single session bound to a serial port

mod serial;
mod tcp;

pub use serial::{list_ports, SerialServer, SerialServerConfig, DEFAULT_BAUD_RATE};
pub use tcp::{
    LivenessMonitor, SessionInfo, SessionTable, TcpServer, TcpServerConfig, DEFAULT_MAX_CLIENTS,
    DEFAULT_PORT,
};

use crate::core::device::DeviceError;
use async_trait::async_trait;
use std::fmt;
use std::net::SocketAddr;
use thiserror::Error;

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// TCP listener
    Tcp,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Tcp => write!(f, "TCP"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Listening socket could not be bound
    #[error("Could not listen on {addr}: {source}")]
    Bind {
        /// Requested address
        addr: SocketAddr,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Serial port could not be opened
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected controlled device failure
    #[error(transparent)]
    DeviceFault(#[from] DeviceError),
}

impl TransportError {
    /// Whether the error happened while opening the transport
    pub fn is_open_failure(&self) -> bool {
        matches!(
            self,
            Self::Bind { .. }
                | Self::PortNotFound(_)
                | Self::PermissionDenied(_)
                | Self::ConnectionFailed(_)
                | Self::InvalidConfiguration(_)
        )
    }
}

/// Lifecycle notifications sent to the owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Transport is serving
    Started(TransportType),
    /// Transport stopped normally
    Stopped(TransportType),
    /// Transport ended with an error
    Failed {
        /// Which transport
        transport: TransportType,
        /// Diagnostic text
        message: String,
    },
}

impl TransportEvent {
    /// Transport the event is about
    pub fn transport(&self) -> TransportType {
        match self {
            Self::Started(t) | Self::Stopped(t) => *t,
            Self::Failed { transport, .. } => *transport,
        }
    }
}

/// A running server transport
#[async_trait]
pub trait Transport: Send {
    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Serve until cancelled or failed
    async fn run(&mut self) -> Result<(), TransportError>;
}
