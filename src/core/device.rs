//! Controlled device interface
//!
//! The remote control core never talks to radio hardware directly. It reads and
//! writes the receiver through [`ControlledDevice`], which the host application
//! implements. [`SimulatedDevice`] is an in-memory implementation used when no
//! receiver is attached and throughout the tests.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors reported by a controlled device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The device refused a value that passed protocol validation
    #[error("Value rejected by device: {0}")]
    Rejected(String),

    /// Unexpected device failure; not recoverable per request
    #[error("Device fault: {0}")]
    Fault(String),
}

/// Demodulator selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DetectorType {
    /// Narrow FM
    Nfm,
    /// Wide FM
    #[default]
    Wfm,
    /// Amplitude modulation
    Am,
    /// Double sideband
    Dsb,
    /// Lower sideband
    Lsb,
    /// Upper sideband
    Usb,
    /// Continuous wave
    Cw,
    /// Raw IQ
    Raw,
}

impl DetectorType {
    /// All detector types in declaration order
    pub fn all() -> &'static [DetectorType] {
        &[
            DetectorType::Nfm,
            DetectorType::Wfm,
            DetectorType::Am,
            DetectorType::Dsb,
            DetectorType::Lsb,
            DetectorType::Usb,
            DetectorType::Cw,
            DetectorType::Raw,
        ]
    }

    /// Wire name
    pub fn name(&self) -> &'static str {
        match self {
            DetectorType::Nfm => "NFM",
            DetectorType::Wfm => "WFM",
            DetectorType::Am => "AM",
            DetectorType::Dsb => "DSB",
            DetectorType::Lsb => "LSB",
            DetectorType::Usb => "USB",
            DetectorType::Cw => "CW",
            DetectorType::Raw => "RAW",
        }
    }

    /// Wire names of every variant
    pub fn names() -> Vec<&'static str> {
        Self::all().iter().map(DetectorType::name).collect()
    }
}

impl fmt::Display for DetectorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DetectorType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or(())
    }
}

/// Filter window function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum WindowType {
    /// No window
    None = 0,
    /// Hamming
    Hamming = 1,
    /// Blackman
    Blackman = 2,
    /// 4-term Blackman-Harris
    #[default]
    BlackmanHarris4 = 3,
    /// 7-term Blackman-Harris
    BlackmanHarris7 = 4,
    /// Hann-Poisson
    HannPoisson = 5,
    /// Youssef
    Youssef = 6,
}

impl WindowType {
    /// Highest discriminant in use
    pub const MAX: i32 = WindowType::Youssef as i32;

    /// Convert a wire discriminant back into a window type
    pub fn from_discriminant(value: i32) -> Option<Self> {
        match value {
            0 => Some(WindowType::None),
            1 => Some(WindowType::Hamming),
            2 => Some(WindowType::Blackman),
            3 => Some(WindowType::BlackmanHarris4),
            4 => Some(WindowType::BlackmanHarris7),
            5 => Some(WindowType::HannPoisson),
            6 => Some(WindowType::Youssef),
            _ => None,
        }
    }

    /// Wire discriminant
    pub fn discriminant(self) -> i32 {
        self as i32
    }
}

/// Capability interface of the receiver under remote control
///
/// Reads never fail. Writes return [`DeviceError::Rejected`] when the device
/// refuses a value and [`DeviceError::Fault`] when something is actually broken.
#[cfg_attr(test, mockall::automock)]
pub trait ControlledDevice: Send + Sync {
    /// Audio gain
    fn audio_gain(&self) -> i32;
    /// Set audio gain
    fn set_audio_gain(&self, gain: i32) -> Result<(), DeviceError>;

    /// Audio mute state
    fn audio_is_muted(&self) -> bool;
    /// Set audio mute state
    fn set_audio_is_muted(&self, muted: bool) -> Result<(), DeviceError>;

    /// Center frequency in Hz
    fn center_frequency(&self) -> i64;
    /// Set center frequency in Hz
    fn set_center_frequency(&self, hz: i64) -> Result<(), DeviceError>;

    /// Tuned frequency in Hz
    fn frequency(&self) -> i64;
    /// Set tuned frequency in Hz
    fn set_frequency(&self, hz: i64) -> Result<(), DeviceError>;

    /// Active demodulator
    fn detector_type(&self) -> DetectorType;
    /// Select demodulator
    fn set_detector_type(&self, detector: DetectorType) -> Result<(), DeviceError>;

    /// Whether the receiver is running
    fn is_playing(&self) -> bool;

    /// Whether the signal source accepts frequency changes
    fn source_is_tunable(&self) -> bool;

    /// Squelch enabled
    fn squelch_enabled(&self) -> bool;
    /// Enable or disable squelch
    fn set_squelch_enabled(&self, enabled: bool) -> Result<(), DeviceError>;

    /// Squelch threshold
    fn squelch_threshold(&self) -> i32;
    /// Set squelch threshold
    fn set_squelch_threshold(&self, threshold: i32) -> Result<(), DeviceError>;

    /// FM stereo decoding
    fn fm_stereo(&self) -> bool;
    /// Enable or disable FM stereo decoding
    fn set_fm_stereo(&self, stereo: bool) -> Result<(), DeviceError>;

    /// Filter window
    fn filter_type(&self) -> WindowType;
    /// Set filter window
    fn set_filter_type(&self, window: WindowType) -> Result<(), DeviceError>;

    /// Filter bandwidth in Hz
    fn filter_bandwidth(&self) -> i32;
    /// Set filter bandwidth in Hz
    fn set_filter_bandwidth(&self, hz: i32) -> Result<(), DeviceError>;

    /// Filter order
    fn filter_order(&self) -> i32;
    /// Set filter order
    fn set_filter_order(&self, order: i32) -> Result<(), DeviceError>;

    /// Start the receiver
    fn start(&self) -> Result<(), DeviceError>;
    /// Stop the receiver
    fn stop(&self) -> Result<(), DeviceError>;
}

/// Snapshot of the simulated receiver state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Audio gain
    pub audio_gain: i32,
    /// Audio muted
    pub audio_is_muted: bool,
    /// Center frequency in Hz
    pub center_frequency: i64,
    /// Tuned frequency in Hz
    pub frequency: i64,
    /// Demodulator
    pub detector_type: DetectorType,
    /// Receiver running
    pub is_playing: bool,
    /// Source accepts frequency changes
    pub source_is_tunable: bool,
    /// Squelch on
    pub squelch_enabled: bool,
    /// Squelch threshold
    pub squelch_threshold: i32,
    /// FM stereo decoding
    pub fm_stereo: bool,
    /// Filter window
    pub filter_type: WindowType,
    /// Filter bandwidth in Hz
    pub filter_bandwidth: i32,
    /// Filter order
    pub filter_order: i32,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            audio_gain: 30,
            audio_is_muted: false,
            center_frequency: 100_000_000,
            frequency: 100_000_000,
            detector_type: DetectorType::Wfm,
            is_playing: false,
            source_is_tunable: true,
            squelch_enabled: false,
            squelch_threshold: 50,
            fm_stereo: true,
            filter_type: WindowType::BlackmanHarris4,
            filter_bandwidth: 200_000,
            filter_order: 400,
        }
    }
}

/// In-memory receiver
#[derive(Debug, Default)]
pub struct SimulatedDevice {
    state: RwLock<DeviceState>,
}

impl SimulatedDevice {
    /// Create a simulated receiver with default state
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle whether the source accepts frequency changes
    pub fn set_tunable(&self, tunable: bool) {
        self.state.write().source_is_tunable = tunable;
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> DeviceState {
        self.state.read().clone()
    }

    fn update(&self, f: impl FnOnce(&mut DeviceState)) -> Result<(), DeviceError> {
        f(&mut self.state.write());
        Ok(())
    }
}

impl ControlledDevice for SimulatedDevice {
    fn audio_gain(&self) -> i32 {
        self.state.read().audio_gain
    }

    fn set_audio_gain(&self, gain: i32) -> Result<(), DeviceError> {
        self.update(|s| s.audio_gain = gain)
    }

    fn audio_is_muted(&self) -> bool {
        self.state.read().audio_is_muted
    }

    fn set_audio_is_muted(&self, muted: bool) -> Result<(), DeviceError> {
        self.update(|s| s.audio_is_muted = muted)
    }

    fn center_frequency(&self) -> i64 {
        self.state.read().center_frequency
    }

    fn set_center_frequency(&self, hz: i64) -> Result<(), DeviceError> {
        self.update(|s| s.center_frequency = hz)
    }

    fn frequency(&self) -> i64 {
        self.state.read().frequency
    }

    fn set_frequency(&self, hz: i64) -> Result<(), DeviceError> {
        self.update(|s| s.frequency = hz)
    }

    fn detector_type(&self) -> DetectorType {
        self.state.read().detector_type
    }

    fn set_detector_type(&self, detector: DetectorType) -> Result<(), DeviceError> {
        self.update(|s| s.detector_type = detector)
    }

    fn is_playing(&self) -> bool {
        self.state.read().is_playing
    }

    fn source_is_tunable(&self) -> bool {
        self.state.read().source_is_tunable
    }

    fn squelch_enabled(&self) -> bool {
        self.state.read().squelch_enabled
    }

    fn set_squelch_enabled(&self, enabled: bool) -> Result<(), DeviceError> {
        self.update(|s| s.squelch_enabled = enabled)
    }

    fn squelch_threshold(&self) -> i32 {
        self.state.read().squelch_threshold
    }

    fn set_squelch_threshold(&self, threshold: i32) -> Result<(), DeviceError> {
        self.update(|s| s.squelch_threshold = threshold)
    }

    fn fm_stereo(&self) -> bool {
        self.state.read().fm_stereo
    }

    fn set_fm_stereo(&self, stereo: bool) -> Result<(), DeviceError> {
        self.update(|s| s.fm_stereo = stereo)
    }

    fn filter_type(&self) -> WindowType {
        self.state.read().filter_type
    }

    fn set_filter_type(&self, window: WindowType) -> Result<(), DeviceError> {
        self.update(|s| s.filter_type = window)
    }

    fn filter_bandwidth(&self) -> i32 {
        self.state.read().filter_bandwidth
    }

    fn set_filter_bandwidth(&self, hz: i32) -> Result<(), DeviceError> {
        self.update(|s| s.filter_bandwidth = hz)
    }

    fn filter_order(&self) -> i32 {
        self.state.read().filter_order
    }

    fn set_filter_order(&self, order: i32) -> Result<(), DeviceError> {
        self.update(|s| s.filter_order = order)
    }

    fn start(&self) -> Result<(), DeviceError> {
        self.update(|s| s.is_playing = true)
    }

    fn stop(&self) -> Result<(), DeviceError> {
        self.update(|s| s.is_playing = false)
    }
}
