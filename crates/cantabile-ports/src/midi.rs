use crate::types::*;
use serde::{Deserialize, Serialize};

pub const CHANNEL_COUNT: usize = 16;
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Controller numbers the engine reads or synthesizes.
pub mod cc {
    pub const BANK_SELECT: u8 = 0;
    pub const MODULATION: u8 = 1;
    pub const VOLUME: u8 = 7;
    pub const PAN: u8 = 10;
    pub const EXPRESSION: u8 = 11;
    pub const SUSTAIN: u8 = 64;
    pub const REVERB: u8 = 91;
    pub const CHORUS: u8 = 93;
    pub const ALL_SOUND_OFF: u8 = 120;
    pub const RESET_ALL_CONTROLLERS: u8 = 121;
    pub const ALL_NOTES_OFF: u8 = 123;
    pub const RPN_LSB: u8 = 100;
    pub const RPN_MSB: u8 = 101;
    pub const DATA_ENTRY_MSB: u8 = 6;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MidiEventKind {
    NoteOff,
    NoteOn,
    NoteAftertouch,
    Controller,
    ProgramChange,
    ChannelAftertouch,
    /// data1 = LSB, data2 = MSB of the 14-bit bend value.
    PitchBend,
}

impl MidiEventKind {
    pub fn status_nibble(self) -> u8 {
        match self {
            MidiEventKind::NoteOff => 0x80,
            MidiEventKind::NoteOn => 0x90,
            MidiEventKind::NoteAftertouch => 0xA0,
            MidiEventKind::Controller => 0xB0,
            MidiEventKind::ProgramChange => 0xC0,
            MidiEventKind::ChannelAftertouch => 0xD0,
            MidiEventKind::PitchBend => 0xE0,
        }
    }

    pub fn from_status_nibble(status: u8) -> Option<Self> {
        match status & 0xF0 {
            0x80 => Some(MidiEventKind::NoteOff),
            0x90 => Some(MidiEventKind::NoteOn),
            0xA0 => Some(MidiEventKind::NoteAftertouch),
            0xB0 => Some(MidiEventKind::Controller),
            0xC0 => Some(MidiEventKind::ProgramChange),
            0xD0 => Some(MidiEventKind::ChannelAftertouch),
            0xE0 => Some(MidiEventKind::PitchBend),
            _ => None,
        }
    }

    /// Note-addressed events carry a note number in data1.
    pub fn is_note(self) -> bool {
        matches!(
            self,
            MidiEventKind::NoteOn | MidiEventKind::NoteOff | MidiEventKind::NoteAftertouch
        )
    }

    /// Events that keep downstream state in sync and bypass mute/solo.
    pub fn is_state_event(self) -> bool {
        matches!(self, MidiEventKind::Controller | MidiEventKind::ProgramChange)
    }

    fn data_len(self) -> usize {
        match self {
            MidiEventKind::ProgramChange | MidiEventKind::ChannelAftertouch => 1,
            _ => 2,
        }
    }
}

/// A channel-addressed MIDI voice message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MidiEvent {
    pub channel: u8,
    pub kind: MidiEventKind,
    pub data1: u8,
    pub data2: u8,
}

impl MidiEvent {
    pub fn new(channel: u8, kind: MidiEventKind, data1: u8, data2: u8) -> Self {
        Self {
            channel: channel & 0x0F,
            kind,
            data1: data1 & 0x7F,
            data2: data2 & 0x7F,
        }
    }

    pub fn note_on(channel: u8, note: u8, velocity: u8) -> Self {
        Self::new(channel, MidiEventKind::NoteOn, note, velocity)
    }

    pub fn note_off(channel: u8, note: u8) -> Self {
        Self::new(channel, MidiEventKind::NoteOff, note, 0)
    }

    pub fn controller(channel: u8, number: u8, value: u8) -> Self {
        Self::new(channel, MidiEventKind::Controller, number, value)
    }

    pub fn program_change(channel: u8, program: u8) -> Self {
        Self::new(channel, MidiEventKind::ProgramChange, program, 0)
    }

    pub fn all_notes_off(channel: u8) -> Self {
        Self::controller(channel, cc::ALL_NOTES_OFF, 0)
    }

    pub fn with_data1(self, data1: u8) -> Self {
        Self {
            data1: data1 & 0x7F,
            ..self
        }
    }

    /// 14-bit pitch-bend value, 8192 = center.
    pub fn pitch_bend_value(&self) -> u16 {
        (self.data1 as u16) | ((self.data2 as u16) << 7)
    }

    /// Raw wire bytes: status followed by one or two data bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let status = self.kind.status_nibble() | (self.channel & 0x0F);
        match self.kind.data_len() {
            1 => vec![status, self.data1],
            _ => vec![status, self.data1, self.data2],
        }
    }

    pub fn from_bytes(message: &[u8]) -> Option<Self> {
        let status = *message.first()?;
        let kind = MidiEventKind::from_status_nibble(status)?;
        if message.len() < 1 + kind.data_len() {
            return None;
        }
        let data1 = message[1];
        let data2 = if kind.data_len() == 2 { message[2] } else { 0 };
        Some(Self::new(status & 0x0F, kind, data1, data2))
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MidiError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// An open connection to an external MIDI output. Drop or `close` releases it.
pub trait MidiOutputConnection: Send {
    fn send(&mut self, event: &MidiEvent) -> Result<(), MidiError>;

    /// Scales outgoing note velocities, 0.0..=1.0.
    fn set_volume(&mut self, volume: Volume01);

    fn close(self: Box<Self>);
}

pub trait MidiOutputPort: Send + Sync {
    fn list_outputs(&self) -> Result<Vec<MidiOutputDevice>, MidiError>;

    fn open_output(&self, index: usize) -> Result<Box<dyn MidiOutputConnection>, MidiError>;
}
