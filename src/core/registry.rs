//! Command registry
//!
//! A fixed table of the methods a client may address, keyed by lower-case
//! name. Each property is described by a [`MethodDescriptor`]: how to read it,
//! how to write it, what type of value it takes and which bounds apply. The
//! table is built once when the server starts and handed to every session.

use crate::core::device::{ControlledDevice, DetectorType, DeviceError, WindowType};
use crate::core::protocol::{DispatchError, ProtocolError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Runtime type a property accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// JSON boolean
    Bool,
    /// JSON integer fitting in 32 bits
    Int,
    /// Any JSON integer fitting in 64 bits
    Long,
    /// JSON string
    String,
    /// JSON string naming a variant, case-insensitive
    Enum,
}

impl ValueKind {
    fn mismatch(&self) -> ProtocolError {
        let msg = match self {
            ValueKind::Bool => "Expected a boolean",
            ValueKind::Int | ValueKind::Long => "Expected an integer",
            ValueKind::String | ValueKind::Enum => "Expected a string",
        };
        ProtocolError::Value(msg.into())
    }
}

/// A typed property value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodValue {
    /// Boolean
    Bool(bool),
    /// 32-bit integer
    Int(i32),
    /// 64-bit integer
    Long(i64),
    /// Free text
    String(String),
    /// Enum variant name
    Enum(&'static str),
}

impl MethodValue {
    /// JSON form sent in `get` responses
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MethodValue::Bool(b) => serde_json::Value::Bool(*b),
            MethodValue::Int(i) => serde_json::Value::from(*i),
            MethodValue::Long(l) => serde_json::Value::from(*l),
            MethodValue::String(s) => serde_json::Value::String(s.clone()),
            MethodValue::Enum(name) => serde_json::Value::String((*name).to_string()),
        }
    }

    /// Numeric view used for range checks
    fn as_i64(&self) -> Option<i64> {
        match self {
            MethodValue::Int(i) => Some(i64::from(*i)),
            MethodValue::Long(l) => Some(*l),
            _ => None,
        }
    }

    /// Convert a JSON value, checking it against the expected kind
    fn from_json(kind: ValueKind, value: &serde_json::Value) -> Result<Self, ProtocolError> {
        let converted = match kind {
            ValueKind::Bool => value.as_bool().map(MethodValue::Bool),
            ValueKind::Int => value
                .as_i64()
                .and_then(|i| i32::try_from(i).ok())
                .map(MethodValue::Int),
            ValueKind::Long => value.as_i64().map(MethodValue::Long),
            ValueKind::String | ValueKind::Enum => {
                value.as_str().map(|s| MethodValue::String(s.to_string()))
            }
        };
        converted.ok_or_else(|| kind.mismatch())
    }
}

impl fmt::Display for MethodValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodValue::Bool(b) => write!(f, "{b}"),
            MethodValue::Int(i) => write!(f, "{i}"),
            MethodValue::Long(l) => write!(f, "{l}"),
            MethodValue::String(s) => f.write_str(s),
            MethodValue::Enum(name) => f.write_str(name),
        }
    }
}

/// Inclusive numeric bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    /// Smallest accepted value
    pub min: i64,
    /// Largest accepted value
    pub max: i64,
}

impl Bounds {
    /// Create bounds
    pub const fn new(min: i64, max: i64) -> Self {
        Self { min, max }
    }

    fn check(&self, value: i64) -> Result<(), ProtocolError> {
        if value < self.min {
            return Err(ProtocolError::Value(format!("Smaller than {}", self.min)));
        }
        if value > self.max {
            return Err(ProtocolError::Value(format!("Greater than {}", self.max)));
        }
        Ok(())
    }
}

/// Per-method numeric bounds
///
/// These are receiver-specific settings, not part of the protocol, so the
/// owner may override them from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MethodLimits {
    /// AudioGain
    pub audio_gain: Bounds,
    /// CenterFrequency and Frequency, in Hz
    pub frequency: Bounds,
    /// SquelchThreshold
    pub squelch_threshold: Bounds,
    /// FilterType, as window discriminant
    pub filter_type: Bounds,
    /// FilterBandwidth, in Hz
    pub filter_bandwidth: Bounds,
    /// FilterOrder
    pub filter_order: Bounds,
}

impl Default for MethodLimits {
    fn default() -> Self {
        Self {
            audio_gain: Bounds::new(25, 60),
            frequency: Bounds::new(1, 999_999_999_999),
            squelch_threshold: Bounds::new(0, 100),
            filter_type: Bounds::new(1, i64::from(WindowType::MAX)),
            filter_bandwidth: Bounds::new(10, 250_000),
            filter_order: Bounds::new(10, 9_999),
        }
    }
}

/// Value constraint beyond the runtime type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    /// Any value of the right type
    None,
    /// Inclusive numeric range
    Range(Bounds),
    /// One of the named variants
    OneOf(Vec<&'static str>),
}

/// Device capability a write depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Source accepts frequency changes
    Tunable,
}

impl Capability {
    fn check(&self, device: &dyn ControlledDevice) -> Result<(), ProtocolError> {
        match self {
            Capability::Tunable if !device.source_is_tunable() => {
                Err(ProtocolError::Source("Not tunable".into()))
            }
            Capability::Tunable => Ok(()),
        }
    }
}

/// Reads a property from the device
pub type Reader = fn(&dyn ControlledDevice) -> MethodValue;

/// Writes a validated value to the device
pub type Writer = fn(&dyn ControlledDevice, MethodValue) -> Result<(), DeviceError>;

/// Description of one addressable property
#[derive(Debug, Clone)]
pub struct MethodDescriptor {
    /// Canonical name echoed in `get` responses
    pub name: &'static str,
    /// Type of value accepted by `set`
    pub kind: ValueKind,
    /// Bounds or enum universe
    pub constraint: Constraint,
    /// Capability required to write
    pub requires: Option<Capability>,
    read: Reader,
    write: Option<Writer>,
}

impl MethodDescriptor {
    /// Read-write property
    pub fn read_write(name: &'static str, kind: ValueKind, read: Reader, write: Writer) -> Self {
        Self {
            name,
            kind,
            constraint: Constraint::None,
            requires: None,
            read,
            write: Some(write),
        }
    }

    /// Read-only property
    pub fn read_only(name: &'static str, kind: ValueKind, read: Reader) -> Self {
        Self {
            name,
            kind,
            constraint: Constraint::None,
            requires: None,
            read,
            write: None,
        }
    }

    /// Restrict to an inclusive range
    #[must_use]
    pub fn range(mut self, bounds: Bounds) -> Self {
        self.constraint = Constraint::Range(bounds);
        self
    }

    /// Restrict to named variants
    #[must_use]
    pub fn one_of(mut self, names: Vec<&'static str>) -> Self {
        self.constraint = Constraint::OneOf(names);
        self
    }

    /// Require a device capability for writes
    #[must_use]
    pub fn requires(mut self, capability: Capability) -> Self {
        self.requires = Some(capability);
        self
    }

    /// Whether `set` is refused
    pub fn is_read_only(&self) -> bool {
        self.write.is_none()
    }

    /// Current value
    pub fn get(&self, device: &dyn ControlledDevice) -> MethodValue {
        (self.read)(device)
    }

    /// Validate `value` and write it to the device
    pub fn set(
        &self,
        device: &dyn ControlledDevice,
        value: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let write = self
            .write
            .ok_or_else(|| ProtocolError::Method("Read only".into()))?;
        if let Some(capability) = &self.requires {
            capability.check(device)?;
        }

        let mut value = MethodValue::from_json(self.kind, value)?;
        match &self.constraint {
            Constraint::None => {}
            Constraint::Range(bounds) => {
                if let Some(n) = value.as_i64() {
                    bounds.check(n)?;
                }
            }
            Constraint::OneOf(names) => {
                let text = value.to_string();
                let name = names
                    .iter()
                    .copied()
                    .find(|name| name.eq_ignore_ascii_case(&text))
                    .ok_or_else(|| {
                        ProtocolError::Value(format!("Expected one of {}", names.join(", ")))
                    })?;
                value = MethodValue::Enum(name);
            }
        }

        write(device, value)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let ok = match (&self.constraint, self.kind) {
            (Constraint::None, _) => true,
            (Constraint::Range(b), ValueKind::Int) => {
                b.min <= b.max && i32::try_from(b.min).is_ok() && i32::try_from(b.max).is_ok()
            }
            (Constraint::Range(b), ValueKind::Long) => b.min <= b.max,
            (Constraint::OneOf(names), ValueKind::Enum) => !names.is_empty(),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(RegistryError::InvalidDescriptor(self.name.to_string()))
        }
    }
}

/// Actions reachable through `exe`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Start the receiver
    Start,
    /// Stop the receiver
    Stop,
    /// End the calling session
    Close,
}

/// Registry entry
#[derive(Debug, Clone)]
pub enum Entry {
    /// Readable, possibly writable property
    Property(MethodDescriptor),
    /// Action for `exe`
    Action(Action),
}

/// Registry construction errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Constraint does not fit the value kind, or bounds are inverted
    #[error("Invalid descriptor for {0}")]
    InvalidDescriptor(String),

    /// Two entries share a key
    #[error("Duplicate method: {0}")]
    Duplicate(String),
}

/// Collects entries and construction problems
struct Builder {
    registry: CommandRegistry,
    problems: Vec<RegistryError>,
}

impl Builder {
    fn new() -> Self {
        Self {
            registry: CommandRegistry {
                entries: HashMap::new(),
            },
            problems: Vec::new(),
        }
    }

    fn property(&mut self, keys: &[&str], descriptor: MethodDescriptor) {
        if let Err(problem) = descriptor.validate() {
            self.problems.push(problem);
        }
        for key in keys {
            self.insert(key, Entry::Property(descriptor.clone()));
        }
    }

    fn action(&mut self, key: &str, action: Action) {
        self.insert(key, Entry::Action(action));
    }

    fn insert(&mut self, key: &str, entry: Entry) {
        let key = key.to_ascii_lowercase();
        if self.registry.entries.contains_key(&key) {
            self.problems.push(RegistryError::Duplicate(key));
            return;
        }
        self.registry.entries.insert(key, entry);
    }
}

/// Method table shared by every session
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    entries: HashMap<String, Entry>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandRegistry {
    /// Registry with the default per-method bounds
    pub fn new() -> Self {
        Self::build(&MethodLimits::default()).registry
    }

    /// Registry with custom per-method bounds
    ///
    /// Fails when a bound is inverted or does not fit the property's type.
    pub fn with_limits(limits: &MethodLimits) -> Result<Self, RegistryError> {
        let builder = Self::build(limits);
        match builder.problems.into_iter().next() {
            Some(problem) => Err(problem),
            None => Ok(builder.registry),
        }
    }

    fn build(limits: &MethodLimits) -> Builder {
        let mut registry = Builder::new();

        registry.property(
            &["audiogain"],
            MethodDescriptor::read_write(
                "AudioGain",
                ValueKind::Int,
                |d| MethodValue::Int(d.audio_gain()),
                |d, v| d.set_audio_gain(int(v)?),
            )
            .range(limits.audio_gain),
        );
        registry.property(
            &["audioismuted"],
            MethodDescriptor::read_write(
                "AudioIsMuted",
                ValueKind::Bool,
                |d| MethodValue::Bool(d.audio_is_muted()),
                |d, v| d.set_audio_is_muted(boolean(v)?),
            ),
        );
        registry.property(
            &["centrefrequency", "centerfrequency"],
            MethodDescriptor::read_write(
                "CenterFrequency",
                ValueKind::Long,
                |d| MethodValue::Long(d.center_frequency()),
                |d, v| d.set_center_frequency(long(v)?),
            )
            .range(limits.frequency)
            .requires(Capability::Tunable),
        );
        registry.property(
            &["frequency"],
            MethodDescriptor::read_write(
                "Frequency",
                ValueKind::Long,
                |d| MethodValue::Long(d.frequency()),
                |d, v| d.set_frequency(long(v)?),
            )
            .range(limits.frequency)
            .requires(Capability::Tunable),
        );
        registry.property(
            &["detectortype"],
            MethodDescriptor::read_write(
                "DetectorType",
                ValueKind::Enum,
                |d| MethodValue::Enum(d.detector_type().name()),
                |d, v| d.set_detector_type(detector(v)?),
            )
            .one_of(DetectorType::names()),
        );
        registry.property(
            &["isplaying"],
            MethodDescriptor::read_only("IsPlaying", ValueKind::Bool, |d| {
                MethodValue::Bool(d.is_playing())
            }),
        );
        registry.property(
            &["sourceistunable"],
            MethodDescriptor::read_only("SourceIsTunable", ValueKind::Bool, |d| {
                MethodValue::Bool(d.source_is_tunable())
            }),
        );
        registry.property(
            &["squelchenabled"],
            MethodDescriptor::read_write(
                "SquelchEnabled",
                ValueKind::Bool,
                |d| MethodValue::Bool(d.squelch_enabled()),
                |d, v| d.set_squelch_enabled(boolean(v)?),
            ),
        );
        registry.property(
            &["squelchthreshold"],
            MethodDescriptor::read_write(
                "SquelchThreshold",
                ValueKind::Int,
                |d| MethodValue::Int(d.squelch_threshold()),
                |d, v| d.set_squelch_threshold(int(v)?),
            )
            .range(limits.squelch_threshold),
        );
        registry.property(
            &["fmstereo"],
            MethodDescriptor::read_write(
                "FmStereo",
                ValueKind::Bool,
                |d| MethodValue::Bool(d.fm_stereo()),
                |d, v| d.set_fm_stereo(boolean(v)?),
            ),
        );
        registry.property(
            &["filtertype"],
            MethodDescriptor::read_write(
                "FilterType",
                ValueKind::Int,
                |d| MethodValue::Int(d.filter_type().discriminant()),
                |d, v| d.set_filter_type(window(v)?),
            )
            .range(limits.filter_type),
        );
        registry.property(
            &["filterbandwidth"],
            MethodDescriptor::read_write(
                "FilterBandwidth",
                ValueKind::Int,
                |d| MethodValue::Int(d.filter_bandwidth()),
                |d, v| d.set_filter_bandwidth(int(v)?),
            )
            .range(limits.filter_bandwidth),
        );
        registry.property(
            &["filterorder"],
            MethodDescriptor::read_write(
                "FilterOrder",
                ValueKind::Int,
                |d| MethodValue::Int(d.filter_order()),
                |d, v| d.set_filter_order(int(v)?),
            )
            .range(limits.filter_order),
        );

        registry.action("start", Action::Start);
        registry.action("stop", Action::Stop);
        registry.action("close", Action::Close);

        registry
    }

    /// Whether `method` is a known key
    pub fn contains(&self, method: &str) -> bool {
        self.entries.contains_key(method)
    }

    /// Look up an entry
    pub fn lookup(&self, method: &str) -> Option<&Entry> {
        self.entries.get(method)
    }

    /// All keys, sorted
    pub fn methods(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Number of keys, aliases included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn descriptor(&self, method: &str) -> Result<&MethodDescriptor, ProtocolError> {
        match self.entries.get(method) {
            Some(Entry::Property(descriptor)) => Ok(descriptor),
            Some(Entry::Action(_)) => Err(ProtocolError::Method("Exe only".into())),
            None => Err(ProtocolError::Method(format!("Unknown method: {method}"))),
        }
    }

    /// Handle `get`
    pub fn get(
        &self,
        method: &str,
        device: &dyn ControlledDevice,
    ) -> Result<(&'static str, MethodValue), ProtocolError> {
        let descriptor = self.descriptor(method)?;
        Ok((descriptor.name, descriptor.get(device)))
    }

    /// Handle `set`
    pub fn set(
        &self,
        method: &str,
        value: &serde_json::Value,
        device: &dyn ControlledDevice,
    ) -> Result<(), DispatchError> {
        self.descriptor(method)?.set(device, value)
    }

    /// Resolve an `exe` target
    pub fn action(&self, method: &str) -> Result<Action, ProtocolError> {
        match self.entries.get(method) {
            Some(Entry::Action(action)) => Ok(*action),
            _ => Err(ProtocolError::Method(format!("Unknown Exe method: {method}"))),
        }
    }
}

fn mistyped() -> DeviceError {
    DeviceError::Fault("value kind does not match descriptor".into())
}

fn int(value: MethodValue) -> Result<i32, DeviceError> {
    match value {
        MethodValue::Int(i) => Ok(i),
        _ => Err(mistyped()),
    }
}

fn long(value: MethodValue) -> Result<i64, DeviceError> {
    match value {
        MethodValue::Long(l) => Ok(l),
        MethodValue::Int(i) => Ok(i64::from(i)),
        _ => Err(mistyped()),
    }
}

fn boolean(value: MethodValue) -> Result<bool, DeviceError> {
    match value {
        MethodValue::Bool(b) => Ok(b),
        _ => Err(mistyped()),
    }
}

fn detector(value: MethodValue) -> Result<DetectorType, DeviceError> {
    match value {
        MethodValue::Enum(name) => name.parse().map_err(|()| mistyped()),
        _ => Err(mistyped()),
    }
}

fn window(value: MethodValue) -> Result<WindowType, DeviceError> {
    match value {
        MethodValue::Int(i) => WindowType::from_discriminant(i)
            .ok_or_else(|| DeviceError::Rejected(format!("no window type {i}"))),
        _ => Err(mistyped()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::{MockControlledDevice, SimulatedDevice};
    use serde_json::json;

    fn value_error(msg: &str) -> DispatchError {
        DispatchError::Protocol(ProtocolError::Value(msg.into()))
    }

    #[test]
    fn test_default_table_is_valid() {
        let registry = CommandRegistry::with_limits(&MethodLimits::default()).unwrap();
        assert_eq!(registry.len(), 17);
        assert!(registry.contains("centrefrequency"));
        assert!(registry.contains("centerfrequency"));
        assert!(registry.contains("close"));
        assert!(!registry.contains("AudioGain"));
    }

    #[test]
    fn test_methods_sorted_with_aliases() {
        let registry = CommandRegistry::new();
        let methods = registry.methods();
        assert_eq!(methods.len(), registry.len());
        assert!(methods.windows(2).all(|w| w[0] < w[1]));
        assert!(methods.contains(&"centerfrequency"));
        assert!(methods.contains(&"centrefrequency"));
        assert!(methods.contains(&"stop"));
    }

    #[test]
    fn test_inverted_limits_rejected() {
        let limits = MethodLimits {
            audio_gain: Bounds::new(60, 25),
            ..MethodLimits::default()
        };
        assert_eq!(
            CommandRegistry::with_limits(&limits).unwrap_err(),
            RegistryError::InvalidDescriptor("AudioGain".into())
        );
    }

    #[test]
    fn test_int_limits_must_fit_i32() {
        let limits = MethodLimits {
            squelch_threshold: Bounds::new(0, 1 << 40),
            ..MethodLimits::default()
        };
        assert!(CommandRegistry::with_limits(&limits).is_err());
    }

    #[test]
    fn test_get_values() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        assert_eq!(
            registry.get("audiogain", &device).unwrap(),
            ("AudioGain", MethodValue::Int(30))
        );
        assert_eq!(
            registry.get("centerfrequency", &device).unwrap(),
            ("CenterFrequency", MethodValue::Long(100_000_000))
        );
        assert_eq!(
            registry.get("detectortype", &device).unwrap(),
            ("DetectorType", MethodValue::Enum("WFM"))
        );
        assert_eq!(
            registry.get("filtertype", &device).unwrap(),
            ("FilterType", MethodValue::Int(3))
        );
    }

    #[test]
    fn test_set_round_trips_through_get() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        registry.set("audiogain", &json!(42), &device).unwrap();
        registry.set("frequency", &json!(145_500_000_000_i64), &device).unwrap();
        registry.set("detectortype", &json!("usb"), &device).unwrap();
        registry.set("fmstereo", &json!(false), &device).unwrap();

        assert_eq!(registry.get("audiogain", &device).unwrap().1.to_json(), json!(42));
        assert_eq!(
            registry.get("frequency", &device).unwrap().1.to_json(),
            json!(145_500_000_000_i64)
        );
        assert_eq!(registry.get("detectortype", &device).unwrap().1.to_json(), json!("USB"));
        assert_eq!(registry.get("fmstereo", &device).unwrap().1.to_json(), json!(false));
    }

    #[test]
    fn test_set_type_mismatch() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        assert_eq!(
            registry.set("fmstereo", &json!(1), &device).unwrap_err(),
            value_error("Expected a boolean")
        );
        assert_eq!(
            registry.set("audiogain", &json!("loud"), &device).unwrap_err(),
            value_error("Expected an integer")
        );
        assert_eq!(
            registry.set("audiogain", &json!(30.5), &device).unwrap_err(),
            value_error("Expected an integer")
        );
        assert_eq!(
            registry.set("audiogain", &json!(5_000_000_000_i64), &device).unwrap_err(),
            value_error("Expected an integer")
        );
        assert_eq!(
            registry.set("detectortype", &json!(2), &device).unwrap_err(),
            value_error("Expected a string")
        );
    }

    #[test]
    fn test_long_accepts_small_integers() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        registry.set("centrefrequency", &json!(7), &device).unwrap();
        assert_eq!(device.center_frequency(), 7);
    }

    #[test]
    fn test_set_out_of_range_leaves_state() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        assert_eq!(
            registry.set("audiogain", &json!(10), &device).unwrap_err(),
            value_error("Smaller than 25")
        );
        assert_eq!(
            registry.set("audiogain", &json!(61), &device).unwrap_err(),
            value_error("Greater than 60")
        );
        assert_eq!(
            registry.set("centrefrequency", &json!(0), &device).unwrap_err(),
            value_error("Smaller than 1")
        );
        assert_eq!(
            registry.set("centrefrequency", &json!(1_000_000_000_000_i64), &device).unwrap_err(),
            value_error("Greater than 999999999999")
        );
        assert_eq!(device.audio_gain(), 30);
        assert_eq!(device.center_frequency(), 100_000_000);
    }

    #[test]
    fn test_enum_universe() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        assert_eq!(
            registry.set("detectortype", &json!("fm"), &device).unwrap_err(),
            value_error("Expected one of NFM, WFM, AM, DSB, LSB, USB, CW, RAW")
        );
        assert_eq!(device.detector_type(), DetectorType::Wfm);
    }

    #[test]
    fn test_read_only() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        for method in ["isplaying", "sourceistunable"] {
            assert_eq!(
                registry.set(method, &json!(true), &device).unwrap_err(),
                DispatchError::Protocol(ProtocolError::Method("Read only".into()))
            );
        }
    }

    #[test]
    fn test_not_tunable_checked_before_value() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();
        device.set_tunable(false);

        for value in [json!(100_000_000), json!("nope")] {
            assert_eq!(
                registry.set("centrefrequency", &value, &device).unwrap_err(),
                DispatchError::Protocol(ProtocolError::Source("Not tunable".into()))
            );
        }
        assert_eq!(device.center_frequency(), 100_000_000);
    }

    #[test]
    fn test_actions() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        assert_eq!(registry.action("start"), Ok(Action::Start));
        assert_eq!(registry.action("close"), Ok(Action::Close));
        assert_eq!(
            registry.action("audiogain"),
            Err(ProtocolError::Method("Unknown Exe method: audiogain".into()))
        );
        assert_eq!(
            registry.get("start", &device).unwrap_err(),
            ProtocolError::Method("Exe only".into())
        );
    }

    #[test]
    fn test_rejected_values_never_reach_device() {
        let registry = CommandRegistry::new();
        let mut device = MockControlledDevice::new();
        device.expect_source_is_tunable().return_const(true);
        device.expect_set_audio_gain().never();
        device.expect_set_frequency().never();

        assert!(registry.set("audiogain", &json!(99), &device).is_err());
        assert!(registry.set("frequency", &json!(-5), &device).is_err());
    }

    #[test]
    fn test_device_rejection_maps_to_set_error() {
        let registry = CommandRegistry::new();
        let mut device = MockControlledDevice::new();
        device
            .expect_set_filter_order()
            .returning(|_| Err(DeviceError::Rejected("busy".into())));

        assert_eq!(
            registry.set("filterorder", &json!(100), &device).unwrap_err(),
            DispatchError::Protocol(ProtocolError::Set)
        );
    }

    #[test]
    fn test_custom_limits() {
        let limits = MethodLimits {
            audio_gain: Bounds::new(0, 40),
            ..MethodLimits::default()
        };
        let registry = CommandRegistry::with_limits(&limits).unwrap();
        let device = SimulatedDevice::new();

        registry.set("audiogain", &json!(0), &device).unwrap();
        assert_eq!(
            registry.set("audiogain", &json!(41), &device).unwrap_err(),
            value_error("Greater than 40")
        );
    }

    #[test]
    fn test_every_writable_method_reads_back() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        let table = [
            ("audiogain", json!(42), json!(42)),
            ("audioismuted", json!(true), json!(true)),
            ("centrefrequency", json!(7_000_000_000_i64), json!(7_000_000_000_i64)),
            ("centerfrequency", json!(433_920_000), json!(433_920_000)),
            ("frequency", json!(145_500_000_000_i64), json!(145_500_000_000_i64)),
            ("detectortype", json!("lsb"), json!("LSB")),
            ("squelchenabled", json!(true), json!(true)),
            ("squelchthreshold", json!(0), json!(0)),
            ("fmstereo", json!(false), json!(false)),
            ("filtertype", json!(6), json!(6)),
            ("filterbandwidth", json!(12_500), json!(12_500)),
            ("filterorder", json!(9_999), json!(9_999)),
        ];

        let mut writable: Vec<&str> = registry
            .entries
            .iter()
            .filter_map(|(key, entry)| match entry {
                Entry::Property(descriptor) if descriptor.write.is_some() => Some(key.as_str()),
                _ => None,
            })
            .collect();
        writable.sort_unstable();
        let mut covered: Vec<&str> = table.iter().map(|(key, _, _)| *key).collect();
        covered.sort_unstable();
        assert_eq!(writable, covered);

        for (key, sent, expected) in &table {
            registry.set(key, sent, &device).unwrap();
            let value = registry.get(key, &device).unwrap().1.to_json();
            assert_eq!(&value, expected, "{key}");
            assert_eq!(
                value.is_i64(),
                sent.is_i64(),
                "{key} changed JSON type on the way back"
            );
        }
    }

    #[test]
    fn test_frequency_aliases_share_state() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        registry.set("centerfrequency", &json!(88_500_000), &device).unwrap();
        assert_eq!(
            registry.get("centrefrequency", &device).unwrap(),
            ("CenterFrequency", MethodValue::Long(88_500_000))
        );
    }

    #[test]
    fn test_filter_type_maps_window() {
        let registry = CommandRegistry::new();
        let device = SimulatedDevice::new();

        registry.set("filtertype", &json!(1), &device).unwrap();
        assert_eq!(device.filter_type(), WindowType::Hamming);
        assert_eq!(
            registry.set("filtertype", &json!(7), &device).unwrap_err(),
            value_error("Greater than 6")
        );
        assert_eq!(
            registry.set("filtertype", &json!(0), &device).unwrap_err(),
            value_error("Smaller than 1")
        );
        assert_eq!(device.filter_type(), WindowType::Hamming);
    }

    #[test]
    fn test_filter_type_outside_window_universe() {
        let limits = MethodLimits {
            filter_type: Bounds::new(0, 9),
            ..MethodLimits::default()
        };
        let registry = CommandRegistry::with_limits(&limits).unwrap();
        let device = SimulatedDevice::new();

        registry.set("filtertype", &json!(0), &device).unwrap();
        assert_eq!(device.filter_type(), WindowType::None);
        assert_eq!(
            registry.set("filtertype", &json!(9), &device).unwrap_err(),
            DispatchError::Protocol(ProtocolError::Set)
        );
        assert_eq!(device.filter_type(), WindowType::None);
    }
}
