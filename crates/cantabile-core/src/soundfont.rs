use crate::instrument::PERCUSSION_VOICE_COUNT;
use cantabile_ports::audio::{FontBinding, SoundfontId};
use serde::{Deserialize, Serialize};

pub const PROGRAM_COUNT: usize = 128;

/// Which loaded soundfont each program (and each percussion voice) plays
/// from. Entries are indices into the loaded list; 0 is the default font.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SoundfontMap {
    pub programs: Vec<usize>,
    pub drums: Vec<usize>,
}

impl Default for SoundfontMap {
    fn default() -> Self {
        Self {
            programs: vec![0; PROGRAM_COUNT],
            drums: vec![0; PERCUSSION_VOICE_COUNT],
        }
    }
}

impl SoundfontMap {
    pub fn new(programs: Vec<usize>, drums: Vec<usize>) -> Self {
        Self { programs, drums }
    }

    pub fn is_default(&self) -> bool {
        self.programs.iter().chain(self.drums.iter()).all(|index| *index == 0)
    }

    /// Table bound to every melodic voice: explicit per-program entries
    /// followed by the default font as catch-all.
    pub fn melodic_bindings(&self, loaded: &[SoundfontId]) -> Vec<FontBinding> {
        let Some(default_font) = loaded.first().copied() else {
            return Vec::new();
        };

        let mut bindings: Vec<FontBinding> = self
            .programs
            .iter()
            .take(PROGRAM_COUNT)
            .enumerate()
            .filter(|(_, index)| **index > 0 && **index < loaded.len())
            .map(|(program, index)| FontBinding {
                font: loaded[*index],
                preset: Some(program as u8),
            })
            .collect();

        bindings.push(FontBinding {
            font: default_font,
            preset: None,
        });
        bindings
    }

    /// Single-font table for the percussion voice at `slot`; unset or
    /// out-of-range entries resolve to the default font.
    pub fn drum_binding(&self, slot: usize, loaded: &[SoundfontId]) -> Option<FontBinding> {
        let default_font = loaded.first().copied()?;
        let font = self
            .drums
            .get(slot)
            .and_then(|index| loaded.get(*index))
            .copied()
            .unwrap_or(default_font);
        Some(FontBinding { font, preset: None })
    }
}
