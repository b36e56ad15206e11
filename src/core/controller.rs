//! Transport owner
//!
//! The [`Controller`] starts the transports enabled in the configuration, runs
//! each on its own task and reports their lifecycle as [`TransportEvent`]s.
//! When a transport fails, [`Controller::handle_event`] disables that channel
//! and hands back a diagnostic for the user. The controller never ends the
//! process itself.

use crate::config::AppConfig;
use crate::core::engine::ProtocolEngine;
use crate::core::transport::{
    SerialServer, SessionTable, TcpServer, Transport, TransportError, TransportEvent,
    TransportType,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct TransportHandle {
    cancel: CancellationToken,
    /// Raised by the task before it reports its final event
    finished: CancellationToken,
    task: JoinHandle<()>,
    info: String,
}

impl TransportHandle {
    fn is_running(&self) -> bool {
        !self.finished.is_cancelled() && !self.task.is_finished()
    }
}

/// Starts, stops and supervises the transports
pub struct Controller {
    config: AppConfig,
    engine: Arc<ProtocolEngine>,
    events: mpsc::UnboundedSender<TransportEvent>,
    tcp: Option<TransportHandle>,
    tcp_addr: Option<SocketAddr>,
    tcp_sessions: Option<SessionTable>,
    serial: Option<TransportHandle>,
}

impl Controller {
    /// Create a controller and the receiver for its transport events
    pub fn new(
        config: AppConfig,
        engine: Arc<ProtocolEngine>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                engine,
                events,
                tcp: None,
                tcp_addr: None,
                tcp_sessions: None,
                serial: None,
            },
            rx,
        )
    }

    /// Effective configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Start every enabled transport
    ///
    /// Each failure is also reported as [`TransportEvent::Failed`].
    pub async fn start(&mut self) -> Vec<(TransportType, TransportError)> {
        let mut failures = Vec::new();
        if self.config.tcp.enabled {
            if let Err(err) = self.start_tcp().await {
                failures.push((TransportType::Tcp, err));
            }
        }
        if self.config.serial.enabled {
            if let Err(err) = self.start_serial() {
                failures.push((TransportType::Serial, err));
            }
        }
        failures
    }

    /// Bind the TCP listener and serve it on a new task
    pub async fn start_tcp(&mut self) -> Result<SocketAddr, TransportError> {
        if self.tcp.as_ref().is_some_and(TransportHandle::is_running) {
            if let Some(addr) = self.tcp_addr {
                return Ok(addr);
            }
        }

        let cancel = CancellationToken::new();
        let server = TcpServer::bind(
            self.config.tcp.server_config(),
            Arc::clone(&self.engine),
            cancel.clone(),
        )
        .await
        .map_err(|err| self.report_failure(TransportType::Tcp, err))?;

        let addr = server.local_addr();
        self.tcp_addr = Some(addr);
        self.tcp_sessions = Some(server.sessions());
        self.tcp = Some(self.spawn(server, cancel));
        Ok(addr)
    }

    /// Open the configured serial port and serve it on a new task
    pub fn start_serial(&mut self) -> Result<(), TransportError> {
        if self.serial.as_ref().is_some_and(TransportHandle::is_running) {
            return Ok(());
        }

        let config = self.config.serial.server_config().ok_or_else(|| {
            self.report_failure(
                TransportType::Serial,
                TransportError::InvalidConfiguration("no serial port selected".into()),
            )
        })?;

        let cancel = CancellationToken::new();
        let server = SerialServer::open(config, Arc::clone(&self.engine), cancel.clone())
            .map_err(|err| self.report_failure(TransportType::Serial, err))?;
        self.serial = Some(self.spawn(server, cancel));
        Ok(())
    }

    fn spawn<T>(&self, mut transport: T, cancel: CancellationToken) -> TransportHandle
    where
        T: Transport + 'static,
    {
        let events = self.events.clone();
        let info = transport.connection_info();
        let finished = CancellationToken::new();
        let done = finished.clone();
        let task = tokio::spawn(async move {
            let kind = transport.transport_type();
            events.send(TransportEvent::Started(kind)).ok();
            let event = match transport.run().await {
                Ok(()) => TransportEvent::Stopped(kind),
                Err(err) => TransportEvent::Failed {
                    transport: kind,
                    message: err.to_string(),
                },
            };
            done.cancel();
            events.send(event).ok();
        });
        info!(transport = %info, "transport started");
        TransportHandle {
            cancel,
            finished,
            task,
            info,
        }
    }

    fn report_failure(&self, transport: TransportType, err: TransportError) -> TransportError {
        error!(%transport, error = %err, "transport could not start");
        self.events
            .send(TransportEvent::Failed {
                transport,
                message: err.to_string(),
            })
            .ok();
        err
    }

    /// Stop the TCP listener, closing every session
    pub async fn stop_tcp(&mut self) -> bool {
        self.tcp_addr = None;
        self.tcp_sessions = None;
        let handle = self.tcp.take();
        self.join(handle).await
    }

    /// Stop the serial transport, closing the port
    pub async fn stop_serial(&mut self) -> bool {
        let handle = self.serial.take();
        self.join(handle).await
    }

    /// Stop everything
    pub async fn shutdown(&mut self) {
        self.stop_tcp().await;
        self.stop_serial().await;
    }

    /// Cancel and wait up to the join timeout; returns whether a transport was running
    async fn join(&self, handle: Option<TransportHandle>) -> bool {
        let Some(mut handle) = handle else {
            return false;
        };
        handle.cancel.cancel();

        let timeout = self.config.shutdown.join_timeout();
        if tokio::time::timeout(timeout, &mut handle.task).await.is_err() {
            warn!(transport = %handle.info, ?timeout, "transport did not stop in time");
            handle.task.abort();
        } else {
            info!(transport = %handle.info, "transport stopped");
        }
        true
    }

    /// React to a transport event
    ///
    /// A failed transport is disabled in the configuration; the returned text
    /// is meant for the user.
    pub fn handle_event(&mut self, event: &TransportEvent) -> Option<String> {
        match event {
            TransportEvent::Started(_) => None,
            TransportEvent::Stopped(transport) => {
                self.forget_finished(*transport);
                None
            }
            TransportEvent::Failed { transport, message } => {
                match transport {
                    TransportType::Tcp => self.config.tcp.enabled = false,
                    TransportType::Serial => self.config.serial.enabled = false,
                }
                self.forget_finished(*transport);
                let diagnostic = format!("{transport} transport disabled: {message}");
                warn!("{diagnostic}");
                Some(diagnostic)
            }
        }
    }

    fn forget_finished(&mut self, transport: TransportType) {
        let finished = match transport {
            TransportType::Tcp => self.tcp.as_ref(),
            TransportType::Serial => self.serial.as_ref(),
        }
        .map_or(true, |handle| !handle.is_running());
        if finished {
            self.forget(transport);
        }
    }

    fn forget(&mut self, transport: TransportType) {
        match transport {
            TransportType::Tcp => {
                self.tcp = None;
                self.tcp_addr = None;
                self.tcp_sessions = None;
            }
            TransportType::Serial => self.serial = None,
        }
    }

    /// Whether any transport task is alive
    pub fn is_running(&self) -> bool {
        self.tcp.as_ref().is_some_and(TransportHandle::is_running)
            || self.serial.as_ref().is_some_and(TransportHandle::is_running)
    }

    /// Bound TCP address while the listener runs
    pub fn tcp_addr(&self) -> Option<SocketAddr> {
        self.tcp_addr
    }

    /// TCP session table while the listener runs
    pub fn tcp_sessions(&self) -> Option<SessionTable> {
        self.tcp_sessions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::{DeviceError, MockControlledDevice, SimulatedDevice};
    use crate::core::registry::CommandRegistry;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    /// Transport that stops as soon as it runs
    struct OneShot;

    #[async_trait::async_trait]
    impl Transport for OneShot {
        fn transport_type(&self) -> TransportType {
            TransportType::Serial
        }

        fn connection_info(&self) -> String {
            "one-shot".into()
        }

        async fn run(&mut self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn loopback_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.tcp.bind_address = IpAddr::V4(Ipv4Addr::LOCALHOST);
        config.tcp.port = 0;
        config
    }

    fn engine() -> Arc<ProtocolEngine> {
        Arc::new(ProtocolEngine::new(
            CommandRegistry::new(),
            Arc::new(SimulatedDevice::new()),
        ))
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<TransportEvent>) -> TransportEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_and_stop_tcp() {
        let (mut controller, mut rx) = Controller::new(loopback_config(), engine());
        assert!(controller.start().await.is_empty());
        assert_eq!(next_event(&mut rx).await, TransportEvent::Started(TransportType::Tcp));
        assert!(controller.is_running());

        let addr = controller.tcp_addr().unwrap();
        let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
        let mut greeting = String::new();
        client.read_line(&mut greeting).await.unwrap();
        assert!(greeting.contains("\"Version\""));

        assert!(controller.stop_tcp().await);
        assert_eq!(next_event(&mut rx).await, TransportEvent::Stopped(TransportType::Tcp));
        assert!(!controller.is_running());
        assert!(controller.tcp_addr().is_none());
    }

    #[tokio::test]
    async fn test_bind_failure_disables_tcp() {
        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut config = loopback_config();
        config.tcp.port = occupied.local_addr().unwrap().port();

        let (mut controller, mut rx) = Controller::new(config, engine());
        let failures = controller.start().await;
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].1, TransportError::Bind { .. }));

        let event = next_event(&mut rx).await;
        assert!(matches!(event, TransportEvent::Failed { transport: TransportType::Tcp, .. }));
        let diagnostic = controller.handle_event(&event).unwrap();
        assert!(diagnostic.starts_with("TCP transport disabled"));
        assert!(!controller.config().tcp.enabled);
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_serial_open_failure_disables_serial() {
        let mut config = loopback_config();
        config.tcp.enabled = false;
        config.serial.enabled = true;
        config.serial.port = Some("/dev/netremote-missing-port".into());

        let (mut controller, mut rx) = Controller::new(config, engine());
        let failures = controller.start().await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].1.is_open_failure());

        let event = next_event(&mut rx).await;
        assert_eq!(event.transport(), TransportType::Serial);
        assert!(controller.handle_event(&event).is_some());
        assert!(!controller.config().serial.enabled);
    }

    #[tokio::test]
    async fn test_device_fault_fails_tcp() {
        let mut device = MockControlledDevice::new();
        device
            .expect_start()
            .returning(|| Err(DeviceError::Fault("driver crashed".into())));
        let engine = Arc::new(ProtocolEngine::new(CommandRegistry::new(), Arc::new(device)));

        let (mut controller, mut rx) = Controller::new(loopback_config(), engine);
        let addr = controller.start_tcp().await.unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Started(TransportType::Tcp));

        let mut client = BufReader::new(TcpStream::connect(addr).await.unwrap());
        let mut line = String::new();
        client.read_line(&mut line).await.unwrap();
        client
            .get_mut()
            .write_all(b"{\"command\":\"exe\",\"method\":\"start\"}")
            .await
            .unwrap();

        let event = next_event(&mut rx).await;
        assert_eq!(
            event,
            TransportEvent::Failed {
                transport: TransportType::Tcp,
                message: "Device fault: driver crashed".into(),
            }
        );
        controller.handle_event(&event);
        assert!(!controller.is_running());
        assert!(!controller.config().tcp.enabled);
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let (mut controller, _rx) = Controller::new(loopback_config(), engine());
        assert!(!controller.stop_tcp().await);
        assert!(!controller.stop_serial().await);
    }

    #[tokio::test]
    async fn test_transport_ending_on_its_own_is_forgotten() {
        let mut config = loopback_config();
        config.tcp.enabled = false;
        let (mut controller, mut rx) = Controller::new(config, engine());
        controller.serial = Some(controller.spawn(OneShot, CancellationToken::new()));

        assert_eq!(next_event(&mut rx).await, TransportEvent::Started(TransportType::Serial));
        let event = next_event(&mut rx).await;
        assert_eq!(event, TransportEvent::Stopped(TransportType::Serial));

        assert_eq!(controller.handle_event(&event), None);
        assert!(controller.serial.is_none());
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_stale_stop_keeps_restarted_listener() {
        let (mut controller, mut rx) = Controller::new(loopback_config(), engine());
        controller.start_tcp().await.unwrap();
        assert_eq!(next_event(&mut rx).await, TransportEvent::Started(TransportType::Tcp));
        controller.stop_tcp().await;
        let stale = next_event(&mut rx).await;

        controller.start_tcp().await.unwrap();
        assert_eq!(controller.handle_event(&stale), None);
        assert!(controller.is_running());
        assert!(controller.tcp_addr().is_some());
        controller.shutdown().await;
    }
}
