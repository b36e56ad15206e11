//! Request framing
//!
//! Clients do not length-prefix their requests, so the server decides when the
//! accumulated input forms a complete envelope. Two policies exist:
//!
//! - **Brace balance** (default): the buffer is complete once it holds as many
//!   `{` as `}`. Embedded newlines are harmless, but a string value containing
//!   an unbalanced brace stalls the frame until the client balances it again.
//!   Input without any braces is complete immediately, so stray text surfaces
//!   as a syntax error instead of hanging.
//! - **Line terminated**: the buffer is complete once it holds `\n` or `\r`.
//!
//! In both cases the *whole* buffer becomes the frame and the buffer is reset.
//! Two envelopes arriving in one read are therefore one (invalid) frame.
//!
//! Input that grows past the frame limit without completing is discarded and
//! surfaces as [`Frame::Overflow`]; the session answers it like any other
//! malformed request.

use super::{encode_line, Greeting, Response};
use bytes::{BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Default upper bound on an incomplete frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024;

/// When the accumulated input counts as one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingPolicy {
    /// Equal count of `{` and `}`
    #[default]
    BraceBalance,
    /// Any `\n` or `\r` seen
    LineTerminated,
}

impl FramingPolicy {
    /// Get name of framing policy
    pub fn name(&self) -> &'static str {
        match self {
            FramingPolicy::BraceBalance => "Brace balance",
            FramingPolicy::LineTerminated => "Line terminated",
        }
    }

    /// Whether `data` forms a complete frame under this policy
    pub fn is_complete(&self, data: &[u8]) -> bool {
        match self {
            FramingPolicy::BraceBalance => {
                let opens = data.iter().filter(|&&b| b == b'{').count();
                let closes = data.iter().filter(|&&b| b == b'}').count();
                opens == closes
            }
            FramingPolicy::LineTerminated => data.iter().any(|&b| b == b'\n' || b == b'\r'),
        }
    }
}

/// One unit cut from the input stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Complete request text
    Request(String),
    /// Input dropped after exceeding this many bytes
    Overflow(usize),
}

/// Codec turning the byte stream into request frames and responses into CRLF records
#[derive(Debug, Clone)]
pub struct RemoteCodec {
    policy: FramingPolicy,
    max_frame_len: usize,
}

impl RemoteCodec {
    /// Create a codec using the given policy
    pub fn new(policy: FramingPolicy) -> Self {
        Self {
            policy,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Set the incomplete frame limit
    #[must_use]
    pub fn max_frame_len(mut self, len: usize) -> Self {
        self.max_frame_len = len;
        self
    }
}

impl Default for RemoteCodec {
    fn default() -> Self {
        Self::new(FramingPolicy::default())
    }
}

impl Decoder for RemoteCodec {
    type Item = Frame;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if !self.policy.is_complete(src) {
            if src.len() > self.max_frame_len {
                src.clear();
                return Ok(Some(Frame::Overflow(self.max_frame_len)));
            }
            return Ok(None);
        }

        let frame = src.split();
        Ok(Some(Frame::Request(String::from_utf8_lossy(&frame).into_owned())))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // A partial envelope at EOF can never complete
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None => {
                src.clear();
                Ok(None)
            }
        }
    }
}

impl Encoder<Response> for RemoteCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Response, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = encode_line(&item)?;
        dst.put_slice(line.as_bytes());
        Ok(())
    }
}

impl Encoder<Greeting> for RemoteCodec {
    type Error = io::Error;

    fn encode(&mut self, item: Greeting, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let line = encode_line(&item)?;
        dst.put_slice(line.as_bytes());
        Ok(())
    }
}
