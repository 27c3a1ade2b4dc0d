mod support;

use cantabile_core::{
    BusGroup, EngineError, InstrumentRouter, InstrumentType, SessionState, SoundfontMap,
    PROGRAM_COUNT, VOICE_COUNT,
};
use cantabile_ports::audio::{EffectKind, FontBinding};
use cantabile_ports::midi::{MidiEvent, MidiEventKind};
use cantabile_ports::settings::EngineConfig;
use cantabile_ports::types::DeviceId;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use support::{test_config, BackendLog, FakeBackend};

fn router_with(config: EngineConfig) -> (InstrumentRouter, Arc<Mutex<BackendLog>>) {
    let (backend, log) = FakeBackend::new();
    (InstrumentRouter::new(Box::new(backend), &config), log)
}

fn open_router() -> (InstrumentRouter, Arc<Mutex<BackendLog>>) {
    let (mut router, log) = router_with(test_config());
    router.open().expect("router opens");
    (router, log)
}

fn stream(router: &InstrumentRouter, voice: InstrumentType) -> cantabile_ports::audio::StreamId {
    router.voice_stream(voice).expect("voice has a stream while open")
}

#[test]
fn open_builds_one_stream_per_voice_and_bus() {
    let (router, log) = open_router();
    let log = log.lock();

    assert!(router.is_open());
    assert_eq!(log.midi_streams.len(), VOICE_COUNT);
    assert_eq!(log.submixes.len(), router.bus_count());
    for voice in InstrumentType::ALL {
        assert_eq!(log.parents.get(&stream(&router, voice)), Some(&None));
    }

    let default_font = log.loaded[0].0;
    let piano = stream(&router, InstrumentType::Piano);
    assert_eq!(
        log.fonts.get(&piano),
        Some(&vec![FontBinding {
            font: default_font,
            preset: None
        }])
    );
}

#[test]
fn close_releases_streams_and_optionally_fonts() {
    let (mut router, log) = open_router();
    router.close(false);
    assert!(!router.is_open());
    assert!(log.lock().midi_streams.is_empty());
    assert_eq!(log.lock().loaded.len(), 1);

    router.open().expect("router reopens");
    assert_eq!(router.loaded_soundfont_count(), 1);
    router.close(true);
    assert!(log.lock().loaded.is_empty());
}

#[test]
fn notes_follow_the_channel_program() {
    let (mut router, log) = open_router();
    let session = SessionState::default();

    router.route(&MidiEvent::program_change(0, 33), &session);
    let outcome = router
        .route(&MidiEvent::note_on(0, 40, 100), &session)
        .expect("note routed");

    assert_eq!(outcome.voice, Some(InstrumentType::ElectricBass));
    assert_eq!(router.channel_type(0), InstrumentType::ElectricBass);
    let log = log.lock();
    assert_eq!(log.notes_on(stream(&router, InstrumentType::ElectricBass)), vec![40]);
    assert!(log.notes_on(stream(&router, InstrumentType::Piano)).is_empty());
}

#[test]
fn program_change_reaches_every_voice() {
    let (mut router, log) = open_router();
    router.route(&MidiEvent::program_change(3, 48), &SessionState::default());

    let log = log.lock();
    let count = log
        .events
        .iter()
        .filter(|(_, event)| event.kind == MidiEventKind::ProgramChange)
        .count();
    assert_eq!(count, VOICE_COUNT);
}

#[test]
fn percussion_notes_pick_voice_by_note() {
    let (mut router, log) = open_router();
    let session = SessionState::default();

    router.route(&MidiEvent::note_on(9, 36, 90), &session);
    router.route(&MidiEvent::note_on(9, 40, 90), &session);
    router.route(&MidiEvent::note_on(9, 42, 90), &session);
    router.route(&MidiEvent::note_on(9, 70, 90), &session);

    let log = log.lock();
    assert_eq!(log.notes_on(stream(&router, InstrumentType::BassDrum)), vec![36]);
    assert_eq!(log.notes_on(stream(&router, InstrumentType::Snare)), vec![40]);
    assert_eq!(log.notes_on(stream(&router, InstrumentType::Hihat)), vec![42]);
    assert_eq!(log.notes_on(stream(&router, InstrumentType::PercussionEtc)), vec![70]);
}

#[test]
fn percussion_program_change_keeps_drum_voices() {
    let (mut router, _log) = open_router();
    router.route(&MidiEvent::program_change(9, 25), &SessionState::default());
    assert_eq!(router.channel_type(9), InstrumentType::PercussionEtc);
    assert_eq!(router.voice_for_note(9, 38), InstrumentType::Snare);
}

#[test]
fn transposed_note_outside_range_is_dropped() {
    let (mut router, log) = open_router();
    let session = SessionState {
        transpose: 12,
        ..SessionState::default()
    };

    assert!(router.route(&MidiEvent::note_on(0, 120, 100), &session).is_none());
    let outcome = router
        .route(&MidiEvent::note_on(0, 60, 100), &session)
        .expect("in range");
    assert_eq!(outcome.event.data1, 72);
    assert_eq!(log.lock().all_note_ons().len(), 1);
}

#[test]
fn pitch_bend_goes_to_the_channel_voice_only() {
    let (mut router, log) = open_router();
    let bend = MidiEvent::new(2, MidiEventKind::PitchBend, 0, 80);
    router.route(&bend, &SessionState::default());

    let log = log.lock();
    assert_eq!(log.events.len(), 1);
    assert_eq!(log.events[0].0, stream(&router, InstrumentType::Piano));
}

#[test]
fn voice_solo_and_mute_drive_stream_gain() {
    let (mut router, log) = open_router();
    let piano = stream(&router, InstrumentType::Piano);
    let strings = stream(&router, InstrumentType::Strings);

    router.set_voice_solo(InstrumentType::Strings, true);
    assert!(router.is_any_voice_soloed());
    assert_eq!(log.lock().volumes[&strings], 0.5);
    assert_eq!(log.lock().volumes[&piano], 0.0);

    router.set_voice_solo(InstrumentType::Strings, false);
    assert_eq!(log.lock().volumes[&piano], 0.5);

    router.set_voice_mute(InstrumentType::Piano, true);
    assert!(!router.voice(InstrumentType::Piano).enable);
    assert_eq!(log.lock().volumes[&piano], 0.0);

    router.set_voice_volume(InstrumentType::Strings, 250);
    assert_eq!(router.voice(InstrumentType::Strings).volume, 100);
    assert_eq!(log.lock().volumes[&strings], 1.0);
}

#[test]
fn muting_bass_drum_leaves_snare_audible() {
    let (mut router, log) = open_router();
    let bass_drum = stream(&router, InstrumentType::BassDrum);
    let snare = stream(&router, InstrumentType::Snare);

    router.set_voice_mute(InstrumentType::BassDrum, true);
    assert!(!router.voice(InstrumentType::BassDrum).enable);
    assert!(router.voice(InstrumentType::Snare).enable);
    assert_eq!(log.lock().volumes[&bass_drum], 0.0);
    assert_eq!(log.lock().volumes[&snare], 0.5);

    router.route(&MidiEvent::note_on(9, 38, 90), &SessionState::default());
    assert_eq!(log.lock().notes_on(snare), vec![38]);
}

#[test]
fn bus_group_reattaches_the_voice() {
    let (mut router, log) = open_router();
    let brass = stream(&router, InstrumentType::Brass);

    router
        .set_bus_group(InstrumentType::Brass, BusGroup::Submix(1))
        .expect("bus exists");
    assert_eq!(log.lock().parents[&brass], router.bus_stream(1));

    let err = router
        .set_bus_group(InstrumentType::Brass, BusGroup::Submix(17))
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(router.voice(InstrumentType::Brass).bus, BusGroup::Submix(1));

    router.set_bus_volume(1, 40).expect("bus exists");
    router.set_bus_mute(1, true).expect("bus exists");
    let bus = router.bus_stream(1).expect("bus stream");
    assert_eq!(log.lock().volumes[&bus], 0.0);
    assert_eq!(router.bus(1).map(|strip| strip.volume), Some(40));
}

#[test]
fn bus_group_survives_reopen() {
    let (mut router, log) = open_router();
    router
        .set_bus_group(InstrumentType::Reed, BusGroup::Submix(2))
        .expect("bus exists");
    router.close(false);
    router.open().expect("router reopens");

    let reed = stream(&router, InstrumentType::Reed);
    assert_eq!(log.lock().parents[&reed], router.bus_stream(2));
}

#[test]
fn failed_open_releases_everything() {
    let (mut router, log) = router_with(test_config());
    router
        .add_effect(InstrumentType::Organ, EffectKind::Chorus)
        .expect("recorded");
    log.lock().reject_effects = true;

    assert!(router.open().is_err());
    assert!(!router.is_open());
    assert!(router.voice_stream(InstrumentType::Organ).is_none());
    {
        let log = log.lock();
        assert!(!log.open);
        assert!(log.midi_streams.is_empty());
        assert!(log.submixes.is_empty());
    }

    log.lock().reject_effects = false;
    router.open().expect("router opens");
    assert!(router.effects(InstrumentType::Organ)[0].is_attached());
    assert_eq!(log.lock().effects.len(), 1);
}

#[test]
fn effects_are_kept_while_closed_and_attached_on_open() {
    let (mut router, log) = router_with(test_config());
    let first = router
        .add_effect(InstrumentType::Organ, EffectKind::Reverb)
        .expect("recorded");
    let second = router
        .add_effect(InstrumentType::Organ, EffectKind::Echo)
        .expect("recorded");
    assert_eq!((first, second), (0, 1));
    router
        .set_effect_params(InstrumentType::Organ, 1, vec![0.2, 0.8, 0.1, 0.5])
        .expect("effect exists");
    router
        .set_effect_bypass(InstrumentType::Organ, 0, true)
        .expect("effect exists");
    assert!(log.lock().effects.is_empty());

    router.open().expect("router opens");
    let organ = stream(&router, InstrumentType::Organ);
    {
        let log = log.lock();
        assert_eq!(log.effects.len(), 2);
        assert!(log.effects.values().all(|unit| unit.stream == organ));
        let echo = log
            .effects
            .values()
            .find(|unit| unit.kind == EffectKind::Echo)
            .expect("echo attached");
        assert_eq!(echo.params, vec![0.2, 0.8, 0.1, 0.5]);
        let reverb = log
            .effects
            .values()
            .find(|unit| unit.kind == EffectKind::Reverb)
            .expect("reverb attached");
        assert!(reverb.bypass);
    }

    router
        .remove_effect(InstrumentType::Organ, 0)
        .expect("effect exists");
    assert_eq!(router.effects(InstrumentType::Organ).len(), 1);
    assert_eq!(router.effects(InstrumentType::Organ)[0].kind, EffectKind::Echo);
    assert_eq!(log.lock().effects.len(), 1);

    let err = router.remove_effect(InstrumentType::Organ, 4).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[test]
fn failing_soundfonts_are_skipped() {
    let config = EngineConfig {
        soundfonts: vec![
            PathBuf::from("missing.sf2"),
            PathBuf::from("strings.sf2"),
            PathBuf::from("drums.sf2"),
        ],
        ..EngineConfig::default()
    };
    let (mut router, log) = router_with(config);
    router.open().expect("router opens despite a bad soundfont");

    assert_eq!(router.loaded_soundfont_count(), 2);
    assert_eq!(log.lock().loaded[0].1, PathBuf::from("strings.sf2"));
}

#[test]
fn soundfont_map_requires_full_program_table() {
    let (mut router, _log) = open_router();
    let err = router
        .map_soundfonts(SoundfontMap::new(vec![0; 12], vec![0; 16]))
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(router.soundfont_map().is_default());
}

#[test]
fn soundfont_map_without_fonts_is_stored_for_later() {
    let config = EngineConfig {
        soundfonts: vec![PathBuf::from("base.sf2"), PathBuf::from("bass.sf2")],
        ..EngineConfig::default()
    };
    let (mut router, log) = router_with(config);

    let mut programs = vec![0; PROGRAM_COUNT];
    programs[33] = 1;
    let map = SoundfontMap::new(programs, vec![0; 16]);
    let err = router.map_soundfonts(map.clone()).unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(router.soundfont_map(), &map);

    router.open().expect("router opens");
    let log = log.lock();
    let base = log.loaded[0].0;
    let bass = log.loaded[1].0;
    let piano = stream(&router, InstrumentType::Piano);
    assert_eq!(
        log.fonts[&piano],
        vec![
            FontBinding {
                font: bass,
                preset: Some(33)
            },
            FontBinding {
                font: base,
                preset: None
            },
        ]
    );
    let snare = stream(&router, InstrumentType::Snare);
    assert_eq!(
        log.fonts[&snare],
        vec![FontBinding {
            font: base,
            preset: None
        }]
    );
}

#[test]
fn drum_map_binds_percussion_voices_individually() {
    let config = EngineConfig {
        soundfonts: vec![PathBuf::from("base.sf2"), PathBuf::from("kit.sf2")],
        ..EngineConfig::default()
    };
    let (mut router, log) = router_with(config);
    router.open().expect("router opens");

    let mut drums = vec![0; 16];
    drums[InstrumentType::Snare.percussion_slot().unwrap_or_default()] = 1;
    router
        .map_soundfonts(SoundfontMap::new(vec![0; PROGRAM_COUNT], drums))
        .expect("map applies");

    let log = log.lock();
    let kit = log.loaded[1].0;
    let base = log.loaded[0].0;
    assert_eq!(log.fonts[&stream(&router, InstrumentType::Snare)][0].font, kit);
    assert_eq!(log.fonts[&stream(&router, InstrumentType::BassDrum)][0].font, base);
}

#[test]
fn soundfont_volume_is_per_loaded_font() {
    let (mut router, _log) = open_router();
    router.set_soundfont_volume(0, 0.4).expect("font loaded");
    assert_eq!(router.soundfont_volume(0), Some(0.4));
    assert!(router.set_soundfont_volume(3, 0.4).is_err());
    assert_eq!(router.soundfont_volume(3), None);
}

#[test]
fn channels_for_voice_reports_virtual_drum_channels() {
    let (mut router, _log) = open_router();
    let session = SessionState::default();
    router.route(&MidiEvent::program_change(1, 41), &session);
    router.route(&MidiEvent::program_change(4, 44), &session);

    assert_eq!(router.channels_for_voice(InstrumentType::Strings), vec![1, 4]);
    let snare_slot = InstrumentType::Snare.percussion_slot().unwrap_or_default() as u8;
    assert_eq!(router.channels_for_voice(InstrumentType::Snare), vec![16 + snare_slot]);
}

#[test]
fn failed_device_switch_restores_previous_device() {
    let (mut router, log) = open_router();
    log.lock().broken_device = Some(DeviceId("usb".to_string()));

    let err = router
        .set_output_device(Some(DeviceId("usb".to_string())))
        .unwrap_err();
    assert!(matches!(err, EngineError::Device(_)));
    assert!(router.is_open());
    assert_eq!(router.output_device(), None);
    assert_eq!(log.lock().midi_streams.len(), VOICE_COUNT);
}

#[test]
fn reset_controllers_sets_bend_range() {
    let (mut router, log) = open_router();
    router.send_reset_all_controllers(5);
    let log = log.lock();
    let piano = stream(&router, InstrumentType::Piano);
    let numbers: Vec<(u8, u8)> = log
        .events_on(piano)
        .iter()
        .map(|event| (event.data1, event.data2))
        .collect();
    assert_eq!(numbers, vec![(121, 0), (101, 0), (100, 0), (6, 2)]);
}
