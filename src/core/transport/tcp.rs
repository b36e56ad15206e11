//! TCP listener
//!
//! Accepts connections until cancelled and runs one [`Session`] task per
//! client. The number of live sessions is capped; a connection beyond the cap
//! is accepted and immediately closed without a greeting. A [`LivenessMonitor`]
//! periodically prunes sessions whose peer has gone away.

use super::{Transport, TransportError, TransportType};
use crate::core::engine::ProtocolEngine;
use crate::core::protocol::framing::FramingPolicy;
use crate::core::session::{Session, SessionEnd};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Shutdown, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default listening port
pub const DEFAULT_PORT: u16 = 3382;

/// Default concurrent session cap
pub const DEFAULT_MAX_CLIENTS: usize = 4;

const MIN_LIVENESS_INTERVAL: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// TCP listener configuration
#[derive(Debug, Clone)]
pub struct TcpServerConfig {
    /// Address to bind
    pub bind_address: IpAddr,
    /// Port number, 0 picks an ephemeral port
    pub port: u16,
    /// Concurrent session cap
    pub max_clients: usize,
    /// Period of the dead session sweep
    pub liveness_interval: Duration,
    /// Request framing
    pub framing: FramingPolicy,
}

impl TcpServerConfig {
    /// Create a new TCP configuration listening on all interfaces
    pub fn new(port: u16) -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port,
            max_clients: DEFAULT_MAX_CLIENTS,
            liveness_interval: Duration::from_secs(1),
            framing: FramingPolicy::default(),
        }
    }

    /// Set bind address
    #[must_use]
    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.bind_address = address;
        self
    }

    /// Set session cap
    #[must_use]
    pub fn max_clients(mut self, max: usize) -> Self {
        self.max_clients = max;
        self
    }

    /// Set sweep period
    #[must_use]
    pub fn liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    /// Set framing policy
    #[must_use]
    pub fn framing(mut self, framing: FramingPolicy) -> Self {
        self.framing = framing;
        self
    }

    /// Socket address to bind
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

impl Default for TcpServerConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

/// Public view of a connected client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionInfo {
    /// Session id
    pub id: Uuid,
    /// Remote address
    pub peer: SocketAddr,
    /// Accept time
    pub connected_at: DateTime<Utc>,
}

pub(crate) struct SessionEntry {
    info: SessionInfo,
    probe: std::net::TcpStream,
    cancel: CancellationToken,
}

impl SessionEntry {
    /// `probe` must be a clone of the session's socket
    pub(crate) fn new(
        info: SessionInfo,
        probe: std::net::TcpStream,
        cancel: CancellationToken,
    ) -> io::Result<Self> {
        probe.set_nonblocking(true)?;
        Ok(Self {
            info,
            probe,
            cancel,
        })
    }

    fn is_alive(&self) -> bool {
        let mut buf = [0u8; 1];
        match self.probe.peek(&mut buf) {
            Ok(0) => false,
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }

    fn close(&self) {
        self.cancel.cancel();
        // Already closed sockets are fine
        self.probe.shutdown(Shutdown::Both).ok();
    }
}

/// Active session set shared by the accept loop, the session tasks and the
/// liveness monitor
#[derive(Clone, Default)]
pub struct SessionTable {
    inner: Arc<Mutex<HashMap<Uuid, SessionEntry>>>,
}

impl SessionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless `cap` sessions are already active; hands the entry back on refusal
    pub(crate) fn try_insert(&self, entry: SessionEntry, cap: usize) -> Result<(), SessionEntry> {
        let mut sessions = self.inner.lock();
        if sessions.len() >= cap {
            return Err(entry);
        }
        sessions.insert(entry.info.id, entry);
        Ok(())
    }

    pub(crate) fn remove(&self, id: &Uuid) -> bool {
        self.inner.lock().remove(id).is_some()
    }

    /// Number of active sessions
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether no session is active
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Active sessions, oldest first
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut list: Vec<SessionInfo> = self
            .inner
            .lock()
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        list.sort_by_key(|info| info.connected_at);
        list
    }

    /// Close and remove every session whose peer is gone
    pub fn sweep(&self) -> Vec<SessionInfo> {
        let mut sessions = self.inner.lock();
        let dead: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, entry)| !entry.is_alive())
            .map(|(id, _)| *id)
            .collect();

        dead.iter()
            .filter_map(|id| sessions.remove(id))
            .map(|entry| {
                entry.close();
                entry.info
            })
            .collect()
    }

    /// Close and remove every session
    pub fn close_all(&self) -> usize {
        let mut sessions = self.inner.lock();
        let count = sessions.len();
        for (_, entry) in sessions.drain() {
            entry.close();
        }
        count
    }
}

impl std::fmt::Debug for SessionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}

/// Periodic sweep of dead TCP sessions
#[derive(Debug)]
pub struct LivenessMonitor {
    sessions: SessionTable,
    interval: Duration,
}

impl LivenessMonitor {
    /// Create a monitor over `sessions`
    pub fn new(sessions: SessionTable, interval: Duration) -> Self {
        Self {
            sessions,
            interval: interval.max(MIN_LIVENESS_INTERVAL),
        }
    }

    /// Run the monitor on its own task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    /// Sweep every interval until cancelled
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let pruned = self.sessions.sweep();
                    for info in &pruned {
                        warn!(session = %info.id, peer = %info.peer, "pruned dead session");
                    }
                }
            }
        }
    }
}

type SessionResult = Result<SessionEnd, TransportError>;

/// TCP listener serving the remote control protocol
pub struct TcpServer {
    config: TcpServerConfig,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    engine: Arc<ProtocolEngine>,
    sessions: SessionTable,
    cancel: CancellationToken,
}

impl TcpServer {
    /// Bind the listening socket
    pub async fn bind(
        config: TcpServerConfig,
        engine: Arc<ProtocolEngine>,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        if config.max_clients == 0 {
            return Err(TransportError::InvalidConfiguration(
                "max_clients must be at least 1".into(),
            ));
        }

        let addr = config.addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, max_clients = config.max_clients, "listening");

        Ok(Self {
            config,
            listener: Some(listener),
            local_addr,
            engine,
            sessions: SessionTable::new(),
            cancel,
        })
    }

    /// Bound address
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Active session table
    pub fn sessions(&self) -> SessionTable {
        self.sessions.clone()
    }

    /// Stop signal
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Accept and serve until cancelled
    ///
    /// Returns an error only for a device fault or a crashed session task.
    /// All sessions are closed and the listening socket released on return.
    pub async fn serve(&mut self) -> Result<(), TransportError> {
        let listener = self.listener.take().ok_or_else(|| {
            TransportError::InvalidConfiguration("listener already served".into())
        })?;

        let monitor_cancel = self.cancel.child_token();
        let monitor = LivenessMonitor::new(self.sessions.clone(), self.config.liveness_interval)
            .spawn(monitor_cancel.clone());
        let mut tasks: JoinSet<SessionResult> = JoinSet::new();

        let result = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break Ok(()),
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer, &mut tasks),
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(err) = reap(joined) {
                        break Err(err);
                    }
                }
            }
        };

        drop(listener);
        monitor_cancel.cancel();
        monitor.await.ok();

        let closed = self.sessions.close_all();
        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = reap(joined) {
                debug!(error = %err, "session error during shutdown");
            }
        }

        match &result {
            Ok(()) => info!(local_addr = %self.local_addr, closed, "listener stopped"),
            Err(err) => error!(local_addr = %self.local_addr, error = %err, "listener failed"),
        }
        result
    }

    fn admit(&self, stream: TcpStream, peer: SocketAddr, tasks: &mut JoinSet<SessionResult>) {
        let (stream, probe) = match split_probe(stream) {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%peer, error = %err, "could not prepare connection");
                return;
            }
        };
        stream.set_nodelay(true).ok();

        let id = Uuid::new_v4();
        let cancel = self.cancel.child_token();
        let info = SessionInfo {
            id,
            peer,
            connected_at: Utc::now(),
        };
        let entry = match SessionEntry::new(info, probe, cancel.clone()) {
            Ok(entry) => entry,
            Err(err) => {
                warn!(%peer, error = %err, "could not prepare connection");
                return;
            }
        };

        if let Err(entry) = self.sessions.try_insert(entry, self.config.max_clients) {
            warn!(%peer, max_clients = self.config.max_clients, "session limit reached, closing connection");
            entry.close();
            return;
        }
        info!(session = %id, %peer, "client connected");

        let sessions = self.sessions.clone();
        let session = Session::with_id(
            id,
            peer.to_string(),
            stream,
            Arc::clone(&self.engine),
            self.config.framing,
        );
        tasks.spawn(async move {
            let result = session.run(cancel).await;
            sessions.remove(&id);
            result
        });
    }
}

/// Keep a std handle to the socket for liveness probing
fn split_probe(stream: TcpStream) -> io::Result<(TcpStream, std::net::TcpStream)> {
    let std_stream = stream.into_std()?;
    let probe = std_stream.try_clone()?;
    Ok((TcpStream::from_std(std_stream)?, probe))
}

/// Only a device fault or a crashed session fails the listener
fn reap(joined: Result<SessionResult, JoinError>) -> Result<(), TransportError> {
    match joined {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(TransportError::DeviceFault(fault))) => Err(TransportError::DeviceFault(fault)),
        Ok(Err(err)) => {
            debug!(error = %err, "session ended with error");
            Ok(())
        }
        Err(err) if err.is_cancelled() => Ok(()),
        Err(err) => Err(TransportError::Io(io::Error::other(format!(
            "session task failed: {err}"
        )))),
    }
}

#[async_trait]
impl Transport for TcpServer {
    fn transport_type(&self) -> TransportType {
        TransportType::Tcp
    }

    fn connection_info(&self) -> String {
        format!(
            "TCP {} ({}/{} clients)",
            self.local_addr,
            self.sessions.len(),
            self.config.max_clients
        )
    }

    async fn run(&mut self) -> Result<(), TransportError> {
        self.serve().await
    }
}
