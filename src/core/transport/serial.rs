//! Serial transport
//!
//! Binds exactly one [`Session`] to a serial port. The greeting is pushed as
//! soon as the port is open; the session then runs until cancelled, until the
//! client sends `exe close`, or until the port fails.

use super::{Transport, TransportError, TransportType};
use crate::core::engine::ProtocolEngine;
use crate::core::protocol::framing::FramingPolicy;
use crate::core::session::Session;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// The only supported baud rate
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial transport configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialServerConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Request framing
    pub framing: FramingPolicy,
}

impl SerialServerConfig {
    /// Create a new serial configuration at 115200 baud
    pub fn new(port: &str) -> Self {
        Self {
            port: port.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            framing: FramingPolicy::default(),
        }
    }

    /// Set framing policy
    #[must_use]
    pub fn framing(mut self, framing: FramingPolicy) -> Self {
        self.framing = framing;
        self
    }

    fn validate(&self) -> Result<(), TransportError> {
        if self.port.trim().is_empty() {
            return Err(TransportError::InvalidConfiguration(
                "no serial port selected".into(),
            ));
        }
        if self.baud_rate != DEFAULT_BAUD_RATE {
            return Err(TransportError::InvalidConfiguration(format!(
                "unsupported baud rate {}, expected {DEFAULT_BAUD_RATE}",
                self.baud_rate
            )));
        }
        Ok(())
    }
}

/// Serial port transport serving one session
pub struct SerialServer {
    config: SerialServerConfig,
    stream: Option<SerialStream>,
    engine: Arc<ProtocolEngine>,
    cancel: CancellationToken,
}

impl SerialServer {
    /// Open the port
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(
        config: SerialServerConfig,
        engine: Arc<ProtocolEngine>,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        config.validate()?;

        let stream = tokio_serial::new(&config.port, config.baud_rate)
            .open_native_async()
            .map_err(|e| match e.kind() {
                tokio_serial::ErrorKind::NoDevice => TransportError::PortNotFound(config.port.clone()),
                tokio_serial::ErrorKind::Io(io_kind) => match io_kind {
                    std::io::ErrorKind::PermissionDenied => {
                        TransportError::PermissionDenied(config.port.clone())
                    }
                    std::io::ErrorKind::NotFound => TransportError::PortNotFound(config.port.clone()),
                    _ => TransportError::ConnectionFailed(e.to_string()),
                },
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;
        info!(port = %config.port, baud = config.baud_rate, "serial port open");

        Ok(Self {
            config,
            stream: Some(stream),
            engine,
            cancel,
        })
    }

    /// Stop signal
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve the port until cancelled
    ///
    /// A client `exe close` ends the session and the transport stops
    /// normally. The port is closed on return.
    pub async fn serve(&mut self) -> Result<(), TransportError> {
        let stream = self.stream.take().ok_or_else(|| {
            TransportError::InvalidConfiguration("serial port already served".into())
        })?;

        serve_port(
            &self.config,
            stream,
            Arc::clone(&self.engine),
            self.cancel.clone(),
        )
        .await
    }
}

/// Run the single session of a serial transport over `stream`
async fn serve_port<S>(
    config: &SerialServerConfig,
    stream: S,
    engine: Arc<ProtocolEngine>,
    cancel: CancellationToken,
) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let session = Session::new(config.port.clone(), stream, engine, config.framing);
    match session.run(cancel).await {
        Ok(end) => {
            info!(port = %config.port, reason = ?end, "serial port closed");
            Ok(())
        }
        Err(err) => {
            error!(port = %config.port, error = %err, "serial transport failed");
            Err(err)
        }
    }
}

#[async_trait]
impl Transport for SerialServer {
    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        format!("{} @ {} baud", self.config.port, self.config.baud_rate)
    }

    async fn run(&mut self) -> Result<(), TransportError> {
        self.serve().await
    }
}

/// List available serial port names, sorted
pub fn list_ports() -> Result<Vec<String>, TransportError> {
    let mut names: Vec<String> = serialport::available_ports()
        .map_err(|e| TransportError::Io(e.into()))?
        .into_iter()
        .map(|info| info.port_name)
        .collect();
    names.sort();
    Ok(names)
}
