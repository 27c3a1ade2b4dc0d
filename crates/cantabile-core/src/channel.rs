use crate::instrument::InstrumentType;
use cantabile_ports::midi::{cc, PERCUSSION_CHANNEL};
use cantabile_ports::types::OutputPort;
use serde::{Deserialize, Serialize};

pub const DEFAULT_VOLUME: u8 = 100;
pub const CENTER_PAN: u8 = 64;

/// User-facing state of one logical MIDI channel, as the song and the
/// user last set it (never the lock-substituted values).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    pub index: u8,
    pub program: u8,
    pub instrument_type: InstrumentType,
    pub volume: u8,
    pub pan: u8,
    pub reverb: u8,
    pub chorus: u8,
    pub mute: bool,
    pub solo: bool,
    pub output: OutputPort,
}

impl ChannelState {
    pub fn new(index: u8) -> Self {
        Self {
            index,
            program: 0,
            instrument_type: default_type(index),
            volume: DEFAULT_VOLUME,
            pan: CENTER_PAN,
            reverb: 0,
            chorus: 0,
            mute: false,
            solo: false,
            output: OutputPort::Internal,
        }
    }

    /// Back to load-time defaults. The output selection survives.
    pub fn reset(&mut self) {
        *self = Self {
            output: self.output,
            ..Self::new(self.index)
        };
    }

    pub fn is_percussion(&self) -> bool {
        self.index == PERCUSSION_CHANNEL
    }

    pub fn set_program(&mut self, program: u8) {
        self.program = program;
        if !self.is_percussion() {
            self.instrument_type = InstrumentType::from_program(program);
        }
    }

    /// Caches the mixer controllers the UI shows.
    pub fn apply_controller(&mut self, number: u8, value: u8) {
        match number {
            cc::VOLUME => self.volume = value,
            cc::PAN => self.pan = value,
            cc::REVERB => self.reverb = value,
            cc::CHORUS => self.chorus = value,
            _ => {}
        }
    }
}

fn default_type(index: u8) -> InstrumentType {
    if index == PERCUSSION_CHANNEL {
        InstrumentType::PercussionEtc
    } else {
        InstrumentType::Piano
    }
}
