//! Request dispatch
//!
//! [`ProtocolEngine`] ties the codec, the registry and the device together.
//! Sessions hand it one frame at a time and act on the returned [`Outcome`].

use crate::core::device::{ControlledDevice, DeviceError};
use crate::core::protocol::{self, DispatchError, Greeting, ProtocolError, Request, Response, Verb};
use crate::core::registry::{Action, CommandRegistry};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What a session should do after a frame
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Send this response
    Reply(Response),
    /// Nothing to send
    Silent,
    /// Close the session without a response
    Close,
}

/// Shared request handler
pub struct ProtocolEngine {
    registry: CommandRegistry,
    device: Arc<dyn ControlledDevice>,
    greeting: Greeting,
}

impl fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("methods", &self.registry.len())
            .field("greeting", &self.greeting)
            .finish_non_exhaustive()
    }
}

impl ProtocolEngine {
    /// Create an engine
    pub fn new(registry: CommandRegistry, device: Arc<dyn ControlledDevice>) -> Self {
        Self {
            registry,
            device,
            greeting: Greeting::default(),
        }
    }

    /// Override the banner sent on connect
    #[must_use]
    pub fn with_greeting(mut self, greeting: Greeting) -> Self {
        self.greeting = greeting;
        self
    }

    /// Banner sent on connect
    pub fn greeting(&self) -> Greeting {
        self.greeting.clone()
    }

    /// Method table
    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    /// Handle one frame
    ///
    /// Protocol errors become error responses. A device fault is returned as
    /// `Err` and must end the transport.
    pub fn handle_frame(&self, frame: &str) -> Result<Outcome, DeviceError> {
        let request = match protocol::decode(frame, &self.registry) {
            Ok(Some(request)) => request,
            Ok(None) => return Ok(Outcome::Silent),
            Err(err) => {
                debug!(error_type = err.error_type(), message = %err, "rejected request");
                return Ok(Outcome::Reply(err.to_response()));
            }
        };

        debug!(verb = %request.verb, method = %request.method, "request");
        match self.dispatch(&request) {
            Ok(outcome) => Ok(outcome),
            Err(DispatchError::Protocol(err)) => {
                debug!(error_type = err.error_type(), message = %err, "request failed");
                Ok(Outcome::Reply(err.to_response()))
            }
            Err(DispatchError::Fault(fault)) => Err(fault),
        }
    }

    fn dispatch(&self, request: &Request) -> Result<Outcome, DispatchError> {
        let device = self.device.as_ref();
        match request.verb {
            Verb::Get => {
                let (name, value) = self.registry.get(&request.method, device)?;
                Ok(Outcome::Reply(Response::value(name, value.to_json())))
            }
            Verb::Set => {
                let value = request
                    .value
                    .as_ref()
                    .ok_or_else(|| ProtocolError::Value("Value missing".into()))?;
                self.registry.set(&request.method, value, device)?;
                Ok(Outcome::Reply(Response::ok()))
            }
            Verb::Exe => match self.registry.action(&request.method)? {
                Action::Start => {
                    device.start()?;
                    Ok(Outcome::Reply(Response::ok()))
                }
                Action::Stop => {
                    device.stop()?;
                    Ok(Outcome::Reply(Response::ok()))
                }
                Action::Close => Ok(Outcome::Close),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::{MockControlledDevice, SimulatedDevice};
    use serde_json::json;

    fn engine() -> (ProtocolEngine, Arc<SimulatedDevice>) {
        let device = Arc::new(SimulatedDevice::new());
        let engine = ProtocolEngine::new(CommandRegistry::new(), device.clone());
        (engine, device)
    }

    fn reply(outcome: Outcome) -> serde_json::Value {
        match outcome {
            Outcome::Reply(response) => serde_json::to_value(response).unwrap(),
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    #[test]
    fn test_get_audio_gain() {
        let (engine, _) = engine();
        let outcome = engine
            .handle_frame("{\"command\":\"get\",\"method\":\"audiogain\"}\r\n")
            .unwrap();
        assert_eq!(
            reply(outcome),
            json!({"Result": "OK", "Method": "AudioGain", "Value": 30})
        );
    }

    #[test]
    fn test_set_then_get() {
        let (engine, device) = engine();
        let ack = engine
            .handle_frame(r#"{"command":"set","method":"SquelchThreshold","value":75}"#)
            .unwrap();
        assert_eq!(reply(ack), json!({"Result": "OK"}));
        assert_eq!(device.snapshot().squelch_threshold, 75);

        let got = engine
            .handle_frame(r#"{"command":"get","method":"squelchthreshold"}"#)
            .unwrap();
        assert_eq!(
            reply(got),
            json!({"Result": "OK", "Method": "SquelchThreshold", "Value": 75})
        );
    }

    #[test]
    fn test_set_is_idempotent() {
        let (engine, device) = engine();
        let frame = r#"{"command":"set","method":"detectortype","value":"NFM"}"#;
        engine.handle_frame(frame).unwrap();
        let once = device.snapshot();
        engine.handle_frame(frame).unwrap();
        assert_eq!(device.snapshot(), once);
    }

    #[test]
    fn test_not_tunable() {
        let (engine, device) = engine();
        device.set_tunable(false);
        let outcome = engine
            .handle_frame(r#"{"command":"set","method":"centrefrequency","value":100000000}"#)
            .unwrap();
        assert_eq!(
            reply(outcome),
            json!({"Result": "Error", "Type": "Source error", "Message": "Not tunable"})
        );
    }

    #[test]
    fn test_unknown_method_for_every_verb() {
        let (engine, _) = engine();
        for verb in ["get", "set", "exe"] {
            let frame = format!(r#"{{"command":"{verb}","method":"volume","value":1}}"#);
            assert_eq!(
                reply(engine.handle_frame(&frame).unwrap()),
                json!({"Result": "Error", "Type": "Method error", "Message": "Unknown method: volume"})
            );
        }
    }

    #[test]
    fn test_syntax_error() {
        let (engine, _) = engine();
        assert_eq!(
            reply(engine.handle_frame("not json").unwrap()),
            json!({"Result": "Error", "Type": "Syntax error", "Message": "not json"})
        );
    }

    #[test]
    fn test_exe_actions() {
        let (engine, device) = engine();

        let start = engine.handle_frame(r#"{"command":"exe","method":"start"}"#).unwrap();
        assert_eq!(reply(start), json!({"Result": "OK"}));
        assert!(device.snapshot().is_playing);

        let stop = engine
            .handle_frame(r#"{"command":"exe","method":"stop","value":"ignored"}"#)
            .unwrap();
        assert_eq!(reply(stop), json!({"Result": "OK"}));
        assert!(!device.snapshot().is_playing);

        assert_eq!(
            engine.handle_frame(r#"{"command":"exe","method":"close"}"#).unwrap(),
            Outcome::Close
        );
        assert_eq!(
            reply(engine.handle_frame(r#"{"command":"exe","method":"fmstereo"}"#).unwrap()),
            json!({"Result": "Error", "Type": "Method error", "Message": "Unknown Exe method: fmstereo"})
        );
    }

    #[test]
    fn test_blank_frame_is_silent() {
        let (engine, _) = engine();
        assert_eq!(engine.handle_frame("\r\n").unwrap(), Outcome::Silent);
    }

    #[test]
    fn test_device_fault_propagates() {
        let mut device = MockControlledDevice::new();
        device
            .expect_start()
            .returning(|| Err(DeviceError::Fault("driver crashed".into())));
        let engine = ProtocolEngine::new(CommandRegistry::new(), Arc::new(device));

        assert_eq!(
            engine.handle_frame(r#"{"command":"exe","method":"start"}"#),
            Err(DeviceError::Fault("driver crashed".into()))
        );
    }
}
