use crate::instrument::{is_bass_program, is_snare_note};
use cantabile_ports::midi::{MidiEvent, MidiEventKind, PERCUSSION_CHANNEL};
use serde::{Deserialize, Serialize};

pub const TRANSPOSE_LIMIT: i8 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    pub enabled: bool,
    pub value: u8,
}

impl Lock {
    fn disabled(value: u8) -> Self {
        Self {
            enabled: false,
            value,
        }
    }

    pub fn active_value(self) -> Option<u8> {
        self.enabled.then_some(self.value)
    }
}

/// Forced substitutions of outgoing program/note data. They never touch the
/// cached song state that queries read.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockOverrides {
    pub drum: Lock,
    pub snare: Lock,
    pub bass: Lock,
}

impl Default for LockOverrides {
    fn default() -> Self {
        Self {
            drum: Lock::disabled(0),
            snare: Lock::disabled(38),
            bass: Lock::disabled(32),
        }
    }
}

/// Performance overrides owned by the player for the whole session and
/// handed to the router on every dispatch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub transpose: i8,
    pub locks: LockOverrides,
}

impl SessionState {
    /// Note number to emit for `note` on `channel`, or `None` when the
    /// transposed pitch leaves the MIDI range.
    pub fn note_to_play(&self, channel: u8, note: u8) -> Option<u8> {
        if channel == PERCUSSION_CHANNEL {
            return Some(match self.locks.snare.active_value() {
                Some(forced) if is_snare_note(note) => forced,
                _ => note,
            });
        }
        let shifted = note as i16 + self.transpose as i16;
        (0..=127).contains(&shifted).then_some(shifted as u8)
    }

    pub fn program_to_play(&self, channel: u8, program: u8) -> u8 {
        let program = match self.locks.drum.active_value() {
            Some(forced) if channel == PERCUSSION_CHANNEL => forced,
            _ => program,
        };
        match self.locks.bass.active_value() {
            Some(forced) if is_bass_program(program) => forced,
            _ => program,
        }
    }

    /// The event as it should leave the engine after transpose and locks.
    pub fn apply(&self, event: &MidiEvent) -> Option<MidiEvent> {
        match event.kind {
            kind if kind.is_note() => self
                .note_to_play(event.channel, event.data1)
                .map(|note| event.with_data1(note)),
            MidiEventKind::ProgramChange => {
                Some(event.with_data1(self.program_to_play(event.channel, event.data1)))
            }
            _ => Some(*event),
        }
    }
}
