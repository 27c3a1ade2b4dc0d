use serde::{Deserialize, Serialize};

/// Mixable voice classification: General MIDI melodic families followed by
/// the percussion timbres the drum channel is split into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InstrumentType {
    Piano,
    ElectricPiano,
    Harpsichord,
    ChromaticPercussion,
    Organ,
    Accordion,
    NylonGuitar,
    SteelGuitar,
    ElectricGuitar,
    OverdrivenGuitar,
    DistortionGuitar,
    AcousticBass,
    ElectricBass,
    SlapBass,
    SynthBass,
    Strings,
    Ensemble,
    Brass,
    Reed,
    Pipe,
    SynthLead,
    SynthPad,
    SynthEffects,
    Ethnic,
    Percussive,
    SoundEffects,

    BassDrum,
    Snare,
    SideStick,
    LowTom,
    MidTom,
    HighTom,
    Hihat,
    Cowbell,
    CrashCymbal,
    RideCymbal,
    Bongo,
    Conga,
    Timbale,
    /// Small cup-shaped cymbals (ching).
    Ching,
    /// Hand cymbals (chap).
    Chap,
    PercussionEtc,
}

pub const MELODIC_VOICE_COUNT: usize = 26;
pub const PERCUSSION_VOICE_COUNT: usize = 16;
pub const VOICE_COUNT: usize = MELODIC_VOICE_COUNT + PERCUSSION_VOICE_COUNT;

pub const SNARE_NOTES: [u8; 2] = [38, 40];
pub const BASS_PROGRAMS: std::ops::RangeInclusive<u8> = 32..=39;

impl InstrumentType {
    pub const ALL: [InstrumentType; VOICE_COUNT] = [
        InstrumentType::Piano,
        InstrumentType::ElectricPiano,
        InstrumentType::Harpsichord,
        InstrumentType::ChromaticPercussion,
        InstrumentType::Organ,
        InstrumentType::Accordion,
        InstrumentType::NylonGuitar,
        InstrumentType::SteelGuitar,
        InstrumentType::ElectricGuitar,
        InstrumentType::OverdrivenGuitar,
        InstrumentType::DistortionGuitar,
        InstrumentType::AcousticBass,
        InstrumentType::ElectricBass,
        InstrumentType::SlapBass,
        InstrumentType::SynthBass,
        InstrumentType::Strings,
        InstrumentType::Ensemble,
        InstrumentType::Brass,
        InstrumentType::Reed,
        InstrumentType::Pipe,
        InstrumentType::SynthLead,
        InstrumentType::SynthPad,
        InstrumentType::SynthEffects,
        InstrumentType::Ethnic,
        InstrumentType::Percussive,
        InstrumentType::SoundEffects,
        InstrumentType::BassDrum,
        InstrumentType::Snare,
        InstrumentType::SideStick,
        InstrumentType::LowTom,
        InstrumentType::MidTom,
        InstrumentType::HighTom,
        InstrumentType::Hihat,
        InstrumentType::Cowbell,
        InstrumentType::CrashCymbal,
        InstrumentType::RideCymbal,
        InstrumentType::Bongo,
        InstrumentType::Conga,
        InstrumentType::Timbale,
        InstrumentType::Ching,
        InstrumentType::Chap,
        InstrumentType::PercussionEtc,
    ];

    /// Dense index, usable for arenas sized `VOICE_COUNT`.
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn is_percussion(self) -> bool {
        self.index() >= MELODIC_VOICE_COUNT
    }

    /// Position among the percussion voices, 0..16.
    pub fn percussion_slot(self) -> Option<usize> {
        self.index().checked_sub(MELODIC_VOICE_COUNT)
    }

    /// Melodic family of a General MIDI program.
    pub fn from_program(program: u8) -> Self {
        match program {
            0..=3 => InstrumentType::Piano,
            4..=5 => InstrumentType::ElectricPiano,
            6..=7 => InstrumentType::Harpsichord,
            8..=15 => InstrumentType::ChromaticPercussion,
            16..=20 => InstrumentType::Organ,
            21..=23 => InstrumentType::Accordion,
            24 => InstrumentType::NylonGuitar,
            25 => InstrumentType::SteelGuitar,
            26..=28 => InstrumentType::ElectricGuitar,
            29 => InstrumentType::OverdrivenGuitar,
            30..=31 => InstrumentType::DistortionGuitar,
            32 => InstrumentType::AcousticBass,
            33..=35 => InstrumentType::ElectricBass,
            36..=37 => InstrumentType::SlapBass,
            38..=39 => InstrumentType::SynthBass,
            40..=47 => InstrumentType::Strings,
            48..=55 => InstrumentType::Ensemble,
            56..=63 => InstrumentType::Brass,
            64..=71 => InstrumentType::Reed,
            72..=79 => InstrumentType::Pipe,
            80..=87 => InstrumentType::SynthLead,
            88..=95 => InstrumentType::SynthPad,
            96..=103 => InstrumentType::SynthEffects,
            104..=111 => InstrumentType::Ethnic,
            112..=119 => InstrumentType::Percussive,
            _ => InstrumentType::SoundEffects,
        }
    }

    /// Percussion voice a drum-channel note is played on.
    pub fn from_drum_note(note: u8) -> Self {
        match note {
            35 | 36 => InstrumentType::BassDrum,
            38 | 40 => InstrumentType::Snare,
            37 => InstrumentType::SideStick,
            41 | 43 => InstrumentType::LowTom,
            45 | 47 => InstrumentType::MidTom,
            48 | 50 => InstrumentType::HighTom,
            42 | 44 | 46 => InstrumentType::Hihat,
            56 => InstrumentType::Cowbell,
            // 55 is the splash cymbal
            49 | 52 | 55 | 57 => InstrumentType::CrashCymbal,
            51 | 59 => InstrumentType::RideCymbal,
            60 | 61 => InstrumentType::Bongo,
            62..=64 => InstrumentType::Conga,
            65 | 66 => InstrumentType::Timbale,
            80 | 81 => InstrumentType::Ching,
            82 | 83 => InstrumentType::Chap,
            _ => InstrumentType::PercussionEtc,
        }
    }
}

pub fn is_snare_note(note: u8) -> bool {
    SNARE_NOTES.contains(&note)
}

pub fn is_bass_program(program: u8) -> bool {
    BASS_PROGRAMS.contains(&program)
}
