//! Session management
//!
//! A Session is the framing and dispatch state bound to one TCP connection or
//! to the open serial port. It runs as a single task: greet, then read, frame,
//! dispatch and write in a loop. A new frame is only read after the previous
//! response has been written, so requests on one session are answered in order.

use crate::core::engine::{Outcome, ProtocolEngine};
use crate::core::protocol::framing::{Frame, FramingPolicy, RemoteCodec};
use crate::core::protocol::ProtocolError;
use crate::core::transport::TransportError;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why a session ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The peer closed the stream
    PeerClosed,
    /// The client sent `exe close`
    CloseRequested,
    /// The owner cancelled the session
    Cancelled,
}

/// One client connection
pub struct Session<S> {
    id: Uuid,
    label: String,
    framed: Framed<S, RemoteCodec>,
    engine: Arc<ProtocolEngine>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Create a session over `stream`
    pub fn new(
        label: impl Into<String>,
        stream: S,
        engine: Arc<ProtocolEngine>,
        framing: FramingPolicy,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), label, stream, engine, framing)
    }

    /// Create a session with a caller-chosen id
    pub fn with_id(
        id: Uuid,
        label: impl Into<String>,
        stream: S,
        engine: Arc<ProtocolEngine>,
        framing: FramingPolicy,
    ) -> Self {
        Self {
            id,
            label: label.into(),
            framed: Framed::new(stream, RemoteCodec::new(framing)),
            engine,
        }
    }

    /// Serve the session until it ends
    ///
    /// I/O errors end the session with `TransportError::Io`; a device fault
    /// ends it with `TransportError::DeviceFault` so the transport can fail.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SessionEnd, TransportError> {
        let result = self.serve(&cancel).await;

        // Close-time errors are of no interest
        self.framed.get_mut().shutdown().await.ok();

        match &result {
            Ok(end) => info!(session = %self.id, peer = %self.label, reason = ?end, "session closed"),
            Err(err) => warn!(session = %self.id, peer = %self.label, error = %err, "session failed"),
        }
        result
    }

    async fn serve(&mut self, cancel: &CancellationToken) -> Result<SessionEnd, TransportError> {
        self.framed.send(self.engine.greeting()).await?;
        debug!(session = %self.id, peer = %self.label, "greeting sent");

        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                frame = self.framed.next() => frame,
            };

            let frame = match frame {
                Some(Ok(Frame::Request(text))) => text,
                Some(Ok(Frame::Overflow(limit))) => {
                    warn!(session = %self.id, peer = %self.label, limit, "oversized request dropped");
                    let err = ProtocolError::Syntax(format!("Request exceeds {limit} bytes"));
                    self.framed.send(err.to_response()).await?;
                    continue;
                }
                Some(Err(err)) => return Err(TransportError::Io(err)),
                None => return Ok(SessionEnd::PeerClosed),
            };

            match self.engine.handle_frame(&frame)? {
                Outcome::Reply(response) => self.framed.send(response).await?,
                Outcome::Silent => {}
                Outcome::Close => return Ok(SessionEnd::CloseRequested),
            }
        }
    }
}
