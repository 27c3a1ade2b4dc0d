use cantabile_domain_song::{
    beats_in_bar, parse_song_bytes, Meter, Song, SongEvent, TempoMap, TempoPoint,
    TimeSignaturePoint,
};
use cantabile_ports::midi::{MidiEvent, MidiEventKind};
use midly::num::{u14, u15, u24, u28, u4, u7};
use midly::{
    Format, Fps, Header, MetaMessage, MidiMessage, PitchBend, Smf, Timing, TrackEvent,
    TrackEventKind,
};
use pretty_assertions::assert_eq;

fn midi(delta: u32, channel: u8, message: MidiMessage) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Midi {
            channel: u4::new(channel),
            message,
        },
    }
}

fn tempo(delta: u32, us_per_quarter: u32) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(us_per_quarter))),
    }
}

fn end(delta: u32) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    }
}

fn note_on(key: u8, vel: u8) -> MidiMessage {
    MidiMessage::NoteOn {
        key: u7::new(key),
        vel: u7::new(vel),
    }
}

fn write(timing: Timing, tracks: Vec<Vec<TrackEvent<'static>>>) -> Vec<u8> {
    let format = if tracks.len() > 1 {
        Format::Parallel
    } else {
        Format::SingleTrack
    };
    let mut smf = Smf::new(Header::new(format, timing));
    smf.tracks = tracks;
    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).expect("smf writes");
    bytes
}

fn midi_events(song: &Song) -> Vec<(i64, MidiEvent)> {
    song.events
        .iter()
        .filter_map(|timed| match timed.event {
            SongEvent::Midi(event) => Some((timed.tick, event)),
            SongEvent::Tempo(_) => None,
        })
        .collect()
}

#[test]
fn tracks_merge_in_tick_order() {
    let conductor = vec![tempo(0, 500_000), tempo(960, 250_000), end(0)];
    let melody = vec![
        midi(0, 0, note_on(60, 100)),
        midi(480, 0, note_on(60, 0)),
        midi(480, 0, note_on(62, 90)),
        end(480),
    ];
    let bass = vec![
        midi(0, 1, MidiMessage::ProgramChange { program: u7::new(33) }),
        midi(480, 1, note_on(40, 80)),
        end(0),
    ];
    let bytes = write(Timing::Metrical(u15::new(480)), vec![conductor, melody, bass]);
    let song = parse_song_bytes(&bytes).expect("song parses");

    assert_eq!(song.ppq, 480);
    assert_eq!(song.end_tick, 1440);
    assert_eq!(
        midi_events(&song),
        vec![
            (0, MidiEvent::note_on(0, 60, 100)),
            (0, MidiEvent::program_change(1, 33)),
            (480, MidiEvent::note_off(0, 60)),
            (480, MidiEvent::note_on(1, 40, 80)),
            (960, MidiEvent::note_on(0, 62, 90)),
        ]
    );
    assert_eq!(song.tempo_map.us_per_quarter_at(1000), 250_000);
    // two quarters at 120 BPM, one at 240 BPM
    assert_eq!(song.duration_us(), 1_250_000);
}

#[test]
fn zero_velocity_note_on_becomes_note_off() {
    let track = vec![midi(0, 3, note_on(64, 0)), end(0)];
    let song = parse_song_bytes(&write(Timing::Metrical(u15::new(96)), vec![track]))
        .expect("song parses");
    let (_, event) = midi_events(&song)[0];
    assert_eq!(event.kind, MidiEventKind::NoteOff);
    assert_eq!(event.channel, 3);
}

#[test]
fn pitch_bend_is_split_into_seven_bit_halves() {
    let bend = PitchBend(u14::new(0x2001));
    let track = vec![midi(0, 0, MidiMessage::PitchBend { bend }), end(0)];
    let song = parse_song_bytes(&write(Timing::Metrical(u15::new(96)), vec![track]))
        .expect("song parses");
    let (_, event) = midi_events(&song)[0];
    assert_eq!((event.data1, event.data2), (0x01, 0x40));
    assert_eq!(event.pitch_bend_value(), 0x2001);
}

#[test]
fn timecode_files_use_a_fixed_tempo() {
    let track = vec![tempo(0, 250_000), midi(25, 0, note_on(60, 100)), end(25)];
    let song = parse_song_bytes(&write(Timing::Timecode(Fps::Fps25, 1), vec![track]))
        .expect("song parses");

    assert!(song.fixed_tempo);
    assert_eq!(song.ppq, 25);
    assert!(song.events.iter().all(|e| !matches!(e.event, SongEvent::Tempo(_))));
    assert_eq!(song.duration_us(), 2_000_000);
}

#[test]
fn garbage_is_a_parse_error() {
    assert!(parse_song_bytes(b"not a midi file").is_err());
}

#[test]
fn chase_collects_last_state_per_channel() {
    let controller = |number: u8, value: u8| MidiMessage::Controller {
        controller: u7::new(number),
        value: u7::new(value),
    };
    let track = vec![
        midi(0, 0, MidiMessage::ProgramChange { program: u7::new(5) }),
        midi(0, 0, controller(7, 100)),
        midi(10, 0, controller(7, 60)),
        midi(0, 0, controller(123, 0)),
        midi(10, 0, MidiMessage::ProgramChange { program: u7::new(24) }),
        midi(10, 0, note_on(60, 100)),
        midi(100, 0, MidiMessage::ProgramChange { program: u7::new(40) }),
        end(0),
    ];
    let song = parse_song_bytes(&write(Timing::Metrical(u15::new(96)), vec![track]))
        .expect("song parses");

    let cursor = song.cursor_at(50);
    assert_eq!(
        song.chase(cursor),
        vec![
            MidiEvent::program_change(0, 24),
            MidiEvent::controller(0, 7, 60),
        ]
    );
}

#[test]
fn tempo_map_converts_both_ways() {
    let map = TempoMap::new(
        480,
        vec![
            TempoPoint {
                tick: 960,
                us_per_quarter: 1_000_000,
            },
        ],
    );
    assert_eq!(map.tick_to_micros(960), 1_000_000);
    assert_eq!(map.tick_to_micros(1440), 2_000_000);
    assert_eq!(map.micros_to_tick(1_500_000), 1200);
    assert_eq!(map.us_per_quarter_at(0), 500_000);
}

fn time_signature(delta: u32, numerator: u8, denominator_power: u8) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, denominator_power, 24, 8)),
    }
}

#[test]
fn beats_per_bar_follow_the_denominator() {
    assert_eq!(beats_in_bar(4, 2), 4);
    assert_eq!(beats_in_bar(3, 2), 3);
    assert_eq!(beats_in_bar(2, 1), 2);
    assert_eq!(beats_in_bar(6, 3), 3);
    assert_eq!(beats_in_bar(12, 4), 3);
    assert_eq!(beats_in_bar(5, 5), 4);
    assert_eq!(beats_in_bar(7, 0), 4);
}

#[test]
fn time_signatures_shape_the_beat_grid() {
    // one bar of 4/4, then two bars of 6/8
    let track = vec![
        time_signature(0, 4, 2),
        midi(0, 0, note_on(60, 100)),
        time_signature(384, 6, 3),
        midi(0, 0, note_on(62, 100)),
        end(576),
    ];
    let song = parse_song_bytes(&write(Timing::Metrical(u15::new(96)), vec![track]))
        .expect("song parses");

    assert_eq!(song.end_tick, 960);
    assert_eq!(song.beat_count(), 10);
    assert_eq!(song.meter.beat_at(0), 0);
    assert_eq!(song.meter.beat_at(383), 3);
    assert_eq!(song.meter.beat_at(384), 4);
    assert_eq!(song.meter.beat_at(384 + 96), 5);
    assert_eq!(song.meter.beat_at(959), 9);
    assert_eq!(midi_events(&song).len(), 2);
}

#[test]
fn meter_defaults_to_common_time_and_counts_partial_beats() {
    let meter = Meter::new(96, Vec::new());
    assert_eq!(meter.beat_at(95), 0);
    assert_eq!(meter.beat_at(96), 1);
    assert_eq!(meter.beat_count(100), 2);
    assert_eq!(meter.beat_count(0), 0);

    // a 2/2 change in the middle of a quarter beat
    let meter = Meter::new(
        96,
        vec![
            TimeSignaturePoint::COMMON_TIME,
            TimeSignaturePoint {
                tick: 144,
                numerator: 2,
                denominator_power: 1,
            },
        ],
    );
    assert_eq!(meter.beat_at(143), 1);
    assert_eq!(meter.beat_at(144), 2);
    assert_eq!(meter.beat_at(144 + 191), 2);
    assert_eq!(meter.beat_at(144 + 192), 3);
}
