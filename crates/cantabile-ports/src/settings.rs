use crate::types::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_sample_rate_hz() -> u32 {
    44_100
}

fn default_bus_count() -> usize {
    4
}

fn default_master_volume() -> u8 {
    50
}

fn default_voice_volume() -> u8 {
    50
}

fn default_notification_capacity() -> usize {
    4096
}

fn default_midi_client_name() -> String {
    "Cantabile".to_string()
}

fn default_synth_master_gain() -> f32 {
    0.25
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio_device: Option<DeviceId>,
    #[serde(default = "default_sample_rate_hz")]
    pub sample_rate_hz: u32,
    pub buffer_size_frames: Option<u32>,
    #[serde(default = "default_bus_count")]
    pub bus_count: usize,
    pub soundfonts: Vec<PathBuf>,
    #[serde(default = "default_master_volume")]
    pub master_volume: u8,
    #[serde(default = "default_voice_volume")]
    pub voice_volume: u8,
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,
    #[serde(default = "default_midi_client_name")]
    pub midi_client_name: String,
    #[serde(default = "default_synth_master_gain")]
    pub synth_master_gain: f32,
}

impl EngineConfig {
    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            sample_rate_hz: self.sample_rate_hz,
            channels: 2,
            buffer_size_frames: self.buffer_size_frames,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio_device: None,
            sample_rate_hz: default_sample_rate_hz(),
            buffer_size_frames: None,
            bus_count: default_bus_count(),
            soundfonts: Vec::new(),
            master_volume: default_master_volume(),
            voice_volume: default_voice_volume(),
            notification_capacity: default_notification_capacity(),
            midi_client_name: default_midi_client_name(),
            synth_master_gain: default_synth_master_gain(),
        }
    }
}
