//! Remote control wire protocol
//!
//! Requests are JSON envelopes `{"command": .., "method": .., "value": ..}`.
//! Every reply is a single JSON object terminated by CRLF. This module is
//! transport independent; see [`framing`] for how envelopes are cut out of a
//! byte stream.

pub mod framing;

use crate::core::device::DeviceError;
use crate::core::registry::CommandRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Record terminator for everything the server sends
pub const LINE_END: &str = "\r\n";

/// Request verb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Read a property
    Get,
    /// Write a property
    Set,
    /// Run an action
    Exe,
}

impl Verb {
    /// Parse a lower-case verb
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "get" => Some(Verb::Get),
            "set" => Some(Verb::Set),
            "exe" => Some(Verb::Exe),
            _ => None,
        }
    }

    /// Wire spelling
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "get",
            Verb::Set => "set",
            Verb::Exe => "exe",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated request envelope
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Verb
    pub verb: Verb,
    /// Lower-case method name, known to the registry
    pub method: String,
    /// Payload; always present for `set`
    pub value: Option<serde_json::Value>,
}

/// Per-request failures, reported back to the client as error responses
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Malformed or unknown verb
    #[error("{0}")]
    Command(String),

    /// Unknown method or verb not allowed on the method
    #[error("{0}")]
    Method(String),

    /// Missing, mistyped or out-of-range value
    #[error("{0}")]
    Value(String),

    /// The device lacks a required capability
    #[error("{0}")]
    Source(String),

    /// Input is not JSON; carries the sanitized request text
    #[error("{0}")]
    Syntax(String),

    /// The device refused a validated value
    #[error("Could not set value")]
    Set,
}

impl ProtocolError {
    /// Value of the `Type` field in the error response
    pub fn error_type(&self) -> &'static str {
        match self {
            ProtocolError::Command(_) => "Command error",
            ProtocolError::Method(_) => "Method error",
            ProtocolError::Value(_) => "Value error",
            ProtocolError::Source(_) => "Source error",
            ProtocolError::Syntax(_) => "Syntax error",
            ProtocolError::Set => "Set error",
        }
    }

    /// Convert into the response sent to the client
    pub fn to_response(&self) -> Response {
        Response::Error {
            kind: self.error_type().to_string(),
            message: self.to_string(),
        }
    }
}

/// Outcome of running a request against the device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Reported to the client, session continues
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Not reported to the client; fails the transport
    #[error(transparent)]
    Fault(DeviceError),
}

impl From<DeviceError> for DispatchError {
    fn from(err: DeviceError) -> Self {
        match err {
            DeviceError::Rejected(_) => DispatchError::Protocol(ProtocolError::Set),
            fault @ DeviceError::Fault(_) => DispatchError::Fault(fault),
        }
    }
}

/// Server reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "Result")]
pub enum Response {
    /// Success, with a value for `get`
    #[serde(rename = "OK")]
    Ok {
        /// Canonical method name
        #[serde(rename = "Method", default, skip_serializing_if = "Option::is_none")]
        method: Option<String>,
        /// Current value
        #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
        value: Option<serde_json::Value>,
    },
    /// Failure
    #[serde(rename = "Error")]
    Error {
        /// Error category, e.g. "Value error"
        #[serde(rename = "Type")]
        kind: String,
        /// Human readable detail
        #[serde(rename = "Message")]
        message: String,
    },
}

impl Response {
    /// Bare acknowledgement
    pub fn ok() -> Self {
        Response::Ok {
            method: None,
            value: None,
        }
    }

    /// Result of a `get`
    pub fn value(method: &str, value: serde_json::Value) -> Self {
        Response::Ok {
            method: Some(method.to_string()),
            value: Some(value),
        }
    }

    /// Whether this is an error response
    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}

/// Banner pushed to every new session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Greeting {
    /// Application title
    #[serde(rename = "Name")]
    pub name: String,
    /// Application version
    #[serde(rename = "Version")]
    pub version: String,
}

impl Default for Greeting {
    fn default() -> Self {
        Self {
            name: crate::APP_TITLE.to_string(),
            version: crate::VERSION.to_string(),
        }
    }
}

/// Serialize a message as one CRLF-terminated record
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push_str(LINE_END);
    Ok(line)
}

/// Drop everything outside U+0020..=U+007F and lower-case the rest
pub fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| ('\u{20}'..='\u{7f}').contains(c))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Decode one frame into a request
///
/// Returns `Ok(None)` when the frame carries nothing to answer: blank input or
/// a JSON `null`.
pub fn decode(raw: &str, registry: &CommandRegistry) -> Result<Option<Request>, ProtocolError> {
    let data = sanitize(raw);
    if data.trim().is_empty() {
        return Ok(None);
    }

    let parsed: serde_json::Value =
        serde_json::from_str(&data).map_err(|_| ProtocolError::Syntax(data.clone()))?;

    let mut object = match parsed {
        serde_json::Value::Null => return Ok(None),
        serde_json::Value::Object(map) => map,
        _ => return Err(ProtocolError::Syntax(data)),
    };

    let command = match object.remove("command") {
        Some(serde_json::Value::String(s)) => s,
        _ => return Err(ProtocolError::Command("Command should be a string".into())),
    };
    let method = match object.remove("method") {
        Some(serde_json::Value::String(s)) => s,
        _ => return Err(ProtocolError::Method("Method should be a string".into())),
    };

    let verb = Verb::parse(&command)
        .ok_or_else(|| ProtocolError::Command(format!("Unknown command: {command}")))?;

    if !registry.contains(&method) {
        return Err(ProtocolError::Method(format!("Unknown method: {method}")));
    }

    let value = object.remove("value").filter(|v| !v.is_null());
    if verb == Verb::Set && value.is_none() {
        return Err(ProtocolError::Value("Value missing".into()));
    }

    Ok(Some(Request {
        verb,
        method,
        value,
    }))
}
