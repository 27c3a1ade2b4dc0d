use crate::midi::MidiEvent;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("unsupported config: {0}")]
    UnsupportedConfig(String),
    #[error("soundfont load failed: {0}")]
    SoundfontLoad(String),
    #[error("unknown stream: {0:?}")]
    UnknownStream(StreamId),
    #[error("unknown effect: {0:?}")]
    UnknownEffect(EffectId),
    #[error("device not open")]
    NotOpen,
    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SoundfontId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EffectId(pub u32);

/// Built-in effect units. Their DSP lives behind the backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EffectKind {
    AutoWah,
    Chorus,
    Compressor,
    Distortion,
    Echo,
    Eq15Band,
    Eq31Band,
    Reverb,
}

impl EffectKind {
    pub const ALL: [EffectKind; 8] = [
        EffectKind::AutoWah,
        EffectKind::Chorus,
        EffectKind::Compressor,
        EffectKind::Distortion,
        EffectKind::Echo,
        EffectKind::Eq15Band,
        EffectKind::Eq31Band,
        EffectKind::Reverb,
    ];

    pub fn default_params(self) -> Vec<f32> {
        match self {
            // dry, wet, feedback, rate, range, freq
            EffectKind::AutoWah => vec![0.5, 1.5, 0.5, 2.0, 4.3, 50.0],
            // dry, wet, feedback, min sweep, max sweep, rate
            EffectKind::Chorus => vec![0.9, 0.35, 0.5, 1.0, 5.0, 0.8],
            // gain, threshold, ratio, attack, release
            EffectKind::Compressor => vec![5.0, -15.0, 3.0, 20.0, 200.0],
            // drive, dry, wet, feedback, volume
            EffectKind::Distortion => vec![1.0, 0.0, 1.0, 0.1, 0.5],
            // dry, wet, feedback, delay
            EffectKind::Echo => vec![1.0, 0.5, 0.3, 0.25],
            EffectKind::Eq15Band => vec![0.0; 15],
            EffectKind::Eq31Band => vec![0.0; 31],
            // dry, wet, room size, damp, width
            EffectKind::Reverb => vec![1.0, 0.3, 0.5, 0.5, 1.0],
        }
    }
}

/// One entry of a stream's soundfont table. `preset: None` covers every
/// program not claimed by an earlier entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FontBinding {
    pub font: SoundfontId,
    pub preset: Option<u8>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SoundfontInfo {
    pub name: String,
    pub preset_count: usize,
}

/// Audio callback: must be realtime-safe.
pub trait AudioRenderCallback: Send + Sync + 'static {
    fn render(&self, sample_time_start: SampleTime, out_l: &mut [f32], out_r: &mut [f32]);
}

pub trait AudioStreamHandle: Send {
    fn close(self: Box<Self>);
}

pub trait AudioOutputPort: Send + Sync {
    fn list_outputs(&self) -> Result<Vec<AudioOutputDevice>, AudioError>;

    fn open_output(
        &self,
        device_id: Option<&DeviceId>,
        config: AudioConfig,
        cb: Arc<dyn AudioRenderCallback>,
    ) -> Result<Box<dyn AudioStreamHandle>, AudioError>;
}

/// Mixer-level capabilities the router needs from a rendering backend.
///
/// Thread model: every method is called from the control side while the
/// caller holds its own lock; implementations hand events to their audio
/// thread without blocking it.
pub trait AudioBackend: Send {
    fn list_devices(&self) -> Result<Vec<AudioOutputDevice>, AudioError>;

    /// Opens the output device (`None` = system default) and the master mix.
    fn open_device(&mut self, device: Option<&DeviceId>, config: AudioConfig) -> Result<(), AudioError>;
    fn close_device(&mut self);
    fn is_open(&self) -> bool;

    /// A 16-channel MIDI-driven stream, detached until `attach` is called.
    fn create_midi_stream(&mut self) -> Result<StreamId, AudioError>;
    /// A sub-mix stream that other streams can be attached to.
    fn create_submix(&mut self) -> Result<StreamId, AudioError>;
    fn free_stream(&mut self, stream: StreamId);

    /// Routes `child` into `parent`, or into the master mix when `parent` is `None`.
    fn attach(&mut self, child: StreamId, parent: Option<StreamId>) -> Result<(), AudioError>;
    fn detach(&mut self, child: StreamId);

    fn send_event(&mut self, stream: StreamId, event: &MidiEvent);
    fn set_stream_volume(&mut self, stream: StreamId, volume: Volume01);
    fn set_master_volume(&mut self, volume: Volume01);

    fn load_soundfont(&mut self, path: &Path) -> Result<(SoundfontId, SoundfontInfo), AudioError>;
    fn free_soundfont(&mut self, font: SoundfontId);
    fn soundfont_volume(&self, font: SoundfontId) -> Option<f32>;
    fn set_soundfont_volume(&mut self, font: SoundfontId, volume: f32);
    fn set_stream_fonts(&mut self, stream: StreamId, fonts: &[FontBinding]) -> Result<(), AudioError>;

    fn add_effect(&mut self, stream: StreamId, kind: EffectKind) -> Result<EffectId, AudioError>;
    fn remove_effect(&mut self, effect: EffectId);
    fn set_effect_bypass(&mut self, effect: EffectId, bypass: bool);
    fn set_effect_params(&mut self, effect: EffectId, params: &[f32]);
}
