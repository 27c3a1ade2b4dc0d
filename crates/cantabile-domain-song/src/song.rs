use crate::meter::{Meter, TimeSignaturePoint};
use crate::tempo::{TempoMap, TempoPoint};
use cantabile_ports::midi::{MidiEvent, MidiEventKind};
use cantabile_ports::sequencer::{SequencerError, SongSource};
use cantabile_ports::types::Tick;
use midly::{Fps, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use std::path::Path;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SongEvent {
    Midi(MidiEvent),
    Tempo(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimedEvent {
    pub tick: Tick,
    pub event: SongEvent,
}

/// A decoded Standard MIDI File: every track merged into one list, sorted
/// by tick with track order kept for simultaneous events.
#[derive(Clone, Debug)]
pub struct Song {
    pub ppq: u16,
    pub tempo_map: TempoMap,
    pub meter: Meter,
    pub events: Vec<TimedEvent>,
    pub end_tick: Tick,
    /// Timecode files run at a fixed rate and ignore tempo meta events.
    pub fixed_tempo: bool,
}

impl Song {
    pub fn load(source: &SongSource) -> Result<Song, SequencerError> {
        match source {
            SongSource::File(path) => parse_song_path(path),
            SongSource::Bytes(bytes) => parse_song_bytes(bytes),
        }
    }

    pub fn beat_count(&self) -> u64 {
        self.meter.beat_count(self.end_tick)
    }

    pub fn duration_us(&self) -> i64 {
        self.tempo_map.tick_to_micros(self.end_tick)
    }

    /// Index of the first event at or after `tick`.
    pub fn cursor_at(&self, tick: Tick) -> usize {
        self.events.partition_point(|event| event.tick < tick)
    }

    /// State-setting events a listener needs when playback starts at
    /// `cursor` instead of the beginning: the last program, controller
    /// values and pitch bend of every channel.
    pub fn chase(&self, cursor: usize) -> Vec<MidiEvent> {
        let mut programs: [Option<MidiEvent>; 16] = [None; 16];
        let mut bends: [Option<MidiEvent>; 16] = [None; 16];
        let mut controllers: Vec<MidiEvent> = Vec::new();

        for timed in &self.events[..cursor.min(self.events.len())] {
            let SongEvent::Midi(event) = timed.event else {
                continue;
            };
            let channel = event.channel as usize;
            match event.kind {
                MidiEventKind::ProgramChange => programs[channel] = Some(event),
                MidiEventKind::PitchBend => bends[channel] = Some(event),
                // channel mode messages (120..) are not state
                MidiEventKind::Controller if event.data1 < 120 => {
                    controllers.retain(|c| !(c.channel == event.channel && c.data1 == event.data1));
                    controllers.push(event);
                }
                _ => {}
            }
        }

        let mut chased: Vec<MidiEvent> = programs.into_iter().flatten().collect();
        chased.extend(controllers);
        chased.extend(bends.into_iter().flatten());
        chased
    }
}

pub fn parse_song_path(path: &Path) -> Result<Song, SequencerError> {
    let data = std::fs::read(path).map_err(|e| SequencerError::Io(e.to_string()))?;
    parse_song_bytes(&data)
}

pub fn parse_song_bytes(data: &[u8]) -> Result<Song, SequencerError> {
    let smf = Smf::parse(data).map_err(|e| SequencerError::Parse(e.to_string()))?;
    let (ppq, fixed_tempo) = match smf.header.timing {
        Timing::Metrical(ticks) => (ticks.as_int(), None),
        Timing::Timecode(fps, ticks_per_frame) => {
            let (ppq, us_per_quarter) = timecode_ppq_and_tempo(fps, ticks_per_frame);
            (ppq, Some(us_per_quarter))
        }
    };

    // (tick, track, position in track) keeps the merge stable
    let mut keyed: Vec<(Tick, usize, usize, SongEvent)> = Vec::new();
    let mut tempo_points: Vec<TempoPoint> = Vec::new();
    let mut signatures: Vec<TimeSignaturePoint> = Vec::new();
    let mut end_tick: Tick = 0;

    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut tick: Tick = 0;
        for (order, event) in track.iter().enumerate() {
            tick += event.delta.as_int() as Tick;
            end_tick = end_tick.max(tick);
            match &event.kind {
                TrackEventKind::Midi { channel, message } => {
                    let event = convert_message(channel.as_int(), message);
                    keyed.push((tick, track_index, order, SongEvent::Midi(event)));
                }
                TrackEventKind::Meta(MetaMessage::Tempo(us_per_quarter)) if fixed_tempo.is_none() => {
                    let us_per_quarter = us_per_quarter.as_int();
                    tempo_points.push(TempoPoint {
                        tick,
                        us_per_quarter,
                    });
                    keyed.push((tick, track_index, order, SongEvent::Tempo(us_per_quarter)));
                }
                TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denominator_power, _, _)) => {
                    signatures.push(TimeSignaturePoint {
                        tick,
                        numerator: *numerator,
                        denominator_power: *denominator_power,
                    });
                }
                _ => {}
            }
        }
    }

    keyed.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));
    let events = keyed
        .into_iter()
        .map(|(tick, _, _, event)| TimedEvent { tick, event })
        .collect();

    let tempo_map = match fixed_tempo {
        Some(us_per_quarter) => TempoMap::new(
            ppq,
            vec![TempoPoint {
                tick: 0,
                us_per_quarter,
            }],
        ),
        None => TempoMap::new(ppq, tempo_points),
    };

    Ok(Song {
        ppq,
        tempo_map,
        meter: Meter::new(ppq, signatures),
        events,
        end_tick,
        fixed_tempo: fixed_tempo.is_some(),
    })
}

fn convert_message(channel: u8, message: &MidiMessage) -> MidiEvent {
    match *message {
        MidiMessage::NoteOff { key, vel } => {
            MidiEvent::new(channel, MidiEventKind::NoteOff, key.as_int(), vel.as_int())
        }
        MidiMessage::NoteOn { key, vel } if vel.as_int() == 0 => {
            MidiEvent::new(channel, MidiEventKind::NoteOff, key.as_int(), 0)
        }
        MidiMessage::NoteOn { key, vel } => {
            MidiEvent::new(channel, MidiEventKind::NoteOn, key.as_int(), vel.as_int())
        }
        MidiMessage::Aftertouch { key, vel } => {
            MidiEvent::new(channel, MidiEventKind::NoteAftertouch, key.as_int(), vel.as_int())
        }
        MidiMessage::Controller { controller, value } => {
            MidiEvent::new(channel, MidiEventKind::Controller, controller.as_int(), value.as_int())
        }
        MidiMessage::ProgramChange { program } => {
            MidiEvent::new(channel, MidiEventKind::ProgramChange, program.as_int(), 0)
        }
        MidiMessage::ChannelAftertouch { vel } => {
            MidiEvent::new(channel, MidiEventKind::ChannelAftertouch, vel.as_int(), 0)
        }
        MidiMessage::PitchBend { bend } => {
            let value = bend.0.as_int();
            MidiEvent::new(
                channel,
                MidiEventKind::PitchBend,
                (value & 0x7F) as u8,
                (value >> 7) as u8,
            )
        }
    }
}

fn timecode_ppq_and_tempo(fps: Fps, ticks_per_frame: u8) -> (u16, u32) {
    let ticks_per_frame = ticks_per_frame.max(1) as u16;
    match fps {
        Fps::Fps24 => (24 * ticks_per_frame, 1_000_000),
        Fps::Fps25 => (25 * ticks_per_frame, 1_000_000),
        Fps::Fps30 => (30 * ticks_per_frame, 1_000_000),
        Fps::Fps29 => (30 * ticks_per_frame, 1_001_000),
    }
}
