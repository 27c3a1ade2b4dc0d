use serde::{Deserialize, Serialize};
use std::fmt;

pub type Tick = i64; // musical time, monotonic in song
pub type SampleTime = u64; // audio sample index, monotonic while stream running

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

/// Destination of a logical MIDI channel: the internal synthesizer or an
/// external MIDI output port, identified by its enumeration index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OutputPort {
    #[default]
    Internal,
    External(usize),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AudioOutputDevice {
    pub id: DeviceId,
    pub name: String,
    pub default_config: AudioConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MidiOutputDevice {
    pub index: usize,
    pub id: DeviceId,
    pub name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate_hz: u32,
    pub channels: u16, // mixer output is stereo
    pub buffer_size_frames: Option<u32>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 44_100,
            channels: 2,
            buffer_size_frames: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct Volume01(pub f32);

impl Volume01 {
    pub fn new(value: f32) -> Self {
        Self(value.clamp(0.0, 1.0))
    }

    /// Maps a 0..100 percentage onto 0.0..1.0.
    pub fn from_percent(percent: u8) -> Self {
        Self::new(percent.min(100) as f32 / 100.0)
    }

    pub fn get(self) -> f32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for OutputPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputPort::Internal => write!(f, "internal"),
            OutputPort::External(index) => write!(f, "external:{index}"),
        }
    }
}
