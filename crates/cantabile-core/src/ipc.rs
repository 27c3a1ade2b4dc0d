use crate::instrument::InstrumentType;
use crate::router::BusGroup;
use cantabile_ports::midi::MidiEvent;
use cantabile_ports::types::OutputPort;
use serde::{Deserialize, Serialize};

/// Announcements from the player to its collaborators, in the order the
/// underlying events happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Notification {
    Loaded,
    /// An event that left the engine, after gating and substitution.
    Dispatched { event: MidiEvent },
    /// A note-on played by the internal synthesizer on `voice`.
    VoiceTriggered {
        voice: InstrumentType,
        bus: BusGroup,
        channel: u8,
        note: u8,
        velocity: u8,
    },
    OutputPortChanged { port: OutputPort },
    TempoChanged { bpm: u32 },
    SequencerFinished,
}
