use crate::midi::MidiEvent;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum SongSource {
    File(PathBuf),
    Bytes(Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequencerState {
    Stopped,
    Playing,
    Paused,
    Finished,
}

#[derive(thiserror::Error, Debug)]
pub enum SequencerError {
    #[error("io error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("nothing loaded")]
    NotLoaded,
}

/// Receives the sequencer's output. Called from the sequencer's own
/// thread, one call at a time and in song order.
pub trait SequencerSink: Send + Sync {
    fn on_event(&self, event: MidiEvent);
    fn on_tempo_changed(&self, bpm: u32);
    fn on_finished(&self);
}

/// Produces a lazy, time-ordered stream of MIDI events while playing.
pub trait Sequencer: Send {
    fn load(&mut self, source: &SongSource) -> Result<(), SequencerError>;

    fn start(&mut self, sink: Arc<dyn SequencerSink>) -> Result<(), SequencerError>;
    /// Stops emitting events; returns once no further sink call can happen.
    fn pause(&mut self);
    fn stop(&mut self, reset_position: bool);
    fn state(&self) -> SequencerState;

    fn duration_ms(&self) -> u64;
    fn position_ms(&self) -> u64;
    fn duration_tick(&self) -> Tick;
    fn position_tick(&self) -> Tick;
    fn set_position_tick(&mut self, tick: Tick);

    /// Zero-based beat under the play position, following the song's time
    /// signatures.
    fn current_beat(&self) -> u64;
    fn beat_count(&self) -> u64;

    /// Offset in BPM applied on top of the song tempo.
    fn bpm_speed(&self) -> i32;
    fn set_bpm_speed(&mut self, speed: i32);
    fn current_bpm(&self) -> u32;
}
