#![allow(dead_code)]

use cantabile_core::{EngineError, MidiPlayer};
use cantabile_ports::audio::{
    AudioBackend, AudioError, EffectId, EffectKind, FontBinding, SoundfontId, SoundfontInfo,
    StreamId,
};
use cantabile_ports::midi::{
    cc, MidiError, MidiEvent, MidiEventKind, MidiOutputConnection, MidiOutputPort,
};
use cantabile_ports::sequencer::{
    Sequencer, SequencerError, SequencerSink, SequencerState, SongSource,
};
use cantabile_ports::settings::EngineConfig;
use cantabile_ports::types::{
    AudioConfig, AudioOutputDevice, DeviceId, MidiOutputDevice, OutputPort, Tick, Volume01,
};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ---- audio backend ---------------------------------------------------------

#[derive(Default)]
pub struct BackendLog {
    pub open: bool,
    pub device: Option<DeviceId>,
    pub broken_device: Option<DeviceId>,
    next_id: u32,
    pub submixes: Vec<StreamId>,
    pub midi_streams: Vec<StreamId>,
    pub parents: HashMap<StreamId, Option<StreamId>>,
    pub events: Vec<(StreamId, MidiEvent)>,
    pub volumes: HashMap<StreamId, f32>,
    pub master_volume: Option<f32>,
    pub loaded: Vec<(SoundfontId, PathBuf)>,
    pub font_volumes: HashMap<SoundfontId, f32>,
    pub fonts: HashMap<StreamId, Vec<FontBinding>>,
    pub effects: HashMap<EffectId, FakeEffect>,
    /// Makes `add_effect` fail, e.g. a unit the device cannot host.
    pub reject_effects: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FakeEffect {
    pub stream: StreamId,
    pub kind: EffectKind,
    pub bypass: bool,
    pub params: Vec<f32>,
}

impl BackendLog {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    pub fn events_on(&self, stream: StreamId) -> Vec<MidiEvent> {
        self.events
            .iter()
            .filter(|(target, _)| *target == stream)
            .map(|(_, event)| *event)
            .collect()
    }

    pub fn notes_on(&self, stream: StreamId) -> Vec<u8> {
        self.events_on(stream)
            .into_iter()
            .filter(|event| event.kind == MidiEventKind::NoteOn)
            .map(|event| event.data1)
            .collect()
    }

    pub fn all_note_ons(&self) -> Vec<MidiEvent> {
        self.events
            .iter()
            .map(|(_, event)| *event)
            .filter(|event| event.kind == MidiEventKind::NoteOn)
            .collect()
    }

    /// Distinct program numbers sent on `channel`, in ascending order.
    pub fn programs_sent(&self, channel: u8) -> Vec<u8> {
        let programs: BTreeSet<u8> = self
            .events
            .iter()
            .map(|(_, event)| *event)
            .filter(|event| event.kind == MidiEventKind::ProgramChange && event.channel == channel)
            .map(|event| event.data1)
            .collect();
        programs.into_iter().collect()
    }

    pub fn all_notes_off_count(&self, channel: u8) -> usize {
        self.events
            .iter()
            .filter(|(_, event)| is_all_notes_off(event, channel))
            .count()
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }
}

pub fn is_all_notes_off(event: &MidiEvent, channel: u8) -> bool {
    event.kind == MidiEventKind::Controller
        && event.data1 == cc::ALL_NOTES_OFF
        && event.channel == channel
}

pub struct FakeBackend {
    log: Arc<Mutex<BackendLog>>,
}

impl FakeBackend {
    pub fn new() -> (Self, Arc<Mutex<BackendLog>>) {
        let log = Arc::new(Mutex::new(BackendLog::default()));
        (Self { log: log.clone() }, log)
    }
}

impl AudioBackend for FakeBackend {
    fn list_devices(&self) -> Result<Vec<AudioOutputDevice>, AudioError> {
        Ok(vec![AudioOutputDevice {
            id: DeviceId("fake".to_string()),
            name: "Fake Output".to_string(),
            default_config: AudioConfig::default(),
        }])
    }

    fn open_device(&mut self, device: Option<&DeviceId>, _config: AudioConfig) -> Result<(), AudioError> {
        let mut log = self.log.lock();
        if device.is_some() && device == log.broken_device.as_ref() {
            return Err(AudioError::DeviceUnavailable("broken".to_string()));
        }
        log.open = true;
        log.device = device.cloned();
        Ok(())
    }

    fn close_device(&mut self) {
        self.log.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.log.lock().open
    }

    fn create_midi_stream(&mut self) -> Result<StreamId, AudioError> {
        let mut log = self.log.lock();
        let stream = StreamId(log.next());
        log.midi_streams.push(stream);
        Ok(stream)
    }

    fn create_submix(&mut self) -> Result<StreamId, AudioError> {
        let mut log = self.log.lock();
        let stream = StreamId(log.next());
        log.submixes.push(stream);
        Ok(stream)
    }

    fn free_stream(&mut self, stream: StreamId) {
        let mut log = self.log.lock();
        log.midi_streams.retain(|s| *s != stream);
        log.submixes.retain(|s| *s != stream);
        log.parents.remove(&stream);
    }

    fn attach(&mut self, child: StreamId, parent: Option<StreamId>) -> Result<(), AudioError> {
        self.log.lock().parents.insert(child, parent);
        Ok(())
    }

    fn detach(&mut self, child: StreamId) {
        self.log.lock().parents.remove(&child);
    }

    fn send_event(&mut self, stream: StreamId, event: &MidiEvent) {
        self.log.lock().events.push((stream, *event));
    }

    fn set_stream_volume(&mut self, stream: StreamId, volume: Volume01) {
        self.log.lock().volumes.insert(stream, volume.get());
    }

    fn set_master_volume(&mut self, volume: Volume01) {
        self.log.lock().master_volume = Some(volume.get());
    }

    fn load_soundfont(&mut self, path: &Path) -> Result<(SoundfontId, SoundfontInfo), AudioError> {
        if path.to_string_lossy().contains("missing") {
            return Err(AudioError::SoundfontLoad(format!("{} not found", path.display())));
        }
        let mut log = self.log.lock();
        let font = SoundfontId(log.next());
        log.loaded.push((font, path.to_path_buf()));
        log.font_volumes.insert(font, 1.0);
        Ok((
            font,
            SoundfontInfo {
                name: path.display().to_string(),
                preset_count: 128,
            },
        ))
    }

    fn free_soundfont(&mut self, font: SoundfontId) {
        let mut log = self.log.lock();
        log.loaded.retain(|(id, _)| *id != font);
        log.font_volumes.remove(&font);
    }

    fn soundfont_volume(&self, font: SoundfontId) -> Option<f32> {
        self.log.lock().font_volumes.get(&font).copied()
    }

    fn set_soundfont_volume(&mut self, font: SoundfontId, volume: f32) {
        self.log.lock().font_volumes.insert(font, volume);
    }

    fn set_stream_fonts(&mut self, stream: StreamId, fonts: &[FontBinding]) -> Result<(), AudioError> {
        self.log.lock().fonts.insert(stream, fonts.to_vec());
        Ok(())
    }

    fn add_effect(&mut self, stream: StreamId, kind: EffectKind) -> Result<EffectId, AudioError> {
        let mut log = self.log.lock();
        if log.reject_effects {
            return Err(AudioError::Backend("effect rejected".to_string()));
        }
        let effect = EffectId(log.next());
        log.effects.insert(
            effect,
            FakeEffect {
                stream,
                kind,
                bypass: false,
                params: kind.default_params(),
            },
        );
        Ok(effect)
    }

    fn remove_effect(&mut self, effect: EffectId) {
        self.log.lock().effects.remove(&effect);
    }

    fn set_effect_bypass(&mut self, effect: EffectId, bypass: bool) {
        if let Some(unit) = self.log.lock().effects.get_mut(&effect) {
            unit.bypass = bypass;
        }
    }

    fn set_effect_params(&mut self, effect: EffectId, params: &[f32]) {
        if let Some(unit) = self.log.lock().effects.get_mut(&effect) {
            unit.params = params.to_vec();
        }
    }
}

// ---- midi output -----------------------------------------------------------

#[derive(Default)]
pub struct MidiLog {
    pub opened: Vec<usize>,
    pub closed: Vec<usize>,
    pub sent: Vec<(usize, MidiEvent)>,
    pub volumes: HashMap<usize, f32>,
    /// Runs inside `open_output`, before the connection is handed back.
    pub on_open: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl MidiLog {
    pub fn sent_to(&self, port: usize) -> Vec<MidiEvent> {
        self.sent
            .iter()
            .filter(|(target, _)| *target == port)
            .map(|(_, event)| *event)
            .collect()
    }
}

pub struct FakeMidiPort {
    devices: usize,
    log: Arc<Mutex<MidiLog>>,
}

impl FakeMidiPort {
    pub fn new(devices: usize) -> (Self, Arc<Mutex<MidiLog>>) {
        let log = Arc::new(Mutex::new(MidiLog::default()));
        (
            Self {
                devices,
                log: log.clone(),
            },
            log,
        )
    }
}

struct FakeConnection {
    index: usize,
    log: Arc<Mutex<MidiLog>>,
}

impl MidiOutputConnection for FakeConnection {
    fn send(&mut self, event: &MidiEvent) -> Result<(), MidiError> {
        self.log.lock().sent.push((self.index, *event));
        Ok(())
    }

    fn set_volume(&mut self, volume: Volume01) {
        self.log.lock().volumes.insert(self.index, volume.get());
    }

    fn close(self: Box<Self>) {
        self.log.lock().closed.push(self.index);
    }
}

impl MidiOutputPort for FakeMidiPort {
    fn list_outputs(&self) -> Result<Vec<MidiOutputDevice>, MidiError> {
        Ok((0..self.devices)
            .map(|index| MidiOutputDevice {
                index,
                id: DeviceId(format!("fake-{index}")),
                name: format!("Fake MIDI {index}"),
            })
            .collect())
    }

    fn open_output(&self, index: usize) -> Result<Box<dyn MidiOutputConnection>, MidiError> {
        if index >= self.devices {
            return Err(MidiError::DeviceNotFound(index.to_string()));
        }
        let hook = self.log.lock().on_open.clone();
        if let Some(hook) = hook {
            hook();
        }
        self.log.lock().opened.push(index);
        Ok(Box::new(FakeConnection {
            index,
            log: self.log.clone(),
        }))
    }
}

// ---- sequencer -------------------------------------------------------------

#[derive(Default)]
struct SequencerSlot {
    state: Option<SequencerState>,
    loaded: bool,
    sink: Option<Arc<dyn SequencerSink>>,
    position: Tick,
    bpm_speed: i32,
}

/// Sequencer whose output is driven by the test through a
/// [`SequencerHandle`].
pub struct FakeSequencer {
    slot: Arc<Mutex<SequencerSlot>>,
}

#[derive(Clone)]
pub struct SequencerHandle {
    slot: Arc<Mutex<SequencerSlot>>,
}

impl FakeSequencer {
    pub fn new() -> (Self, SequencerHandle) {
        let slot = Arc::new(Mutex::new(SequencerSlot::default()));
        (Self { slot: slot.clone() }, SequencerHandle { slot })
    }
}

impl SequencerHandle {
    fn sink(&self) -> Option<Arc<dyn SequencerSink>> {
        self.slot.lock().sink.clone()
    }

    pub fn emit(&self, event: MidiEvent) {
        if let Some(sink) = self.sink() {
            sink.on_event(event);
        }
    }

    pub fn tempo(&self, bpm: u32) {
        if let Some(sink) = self.sink() {
            sink.on_tempo_changed(bpm);
        }
    }

    pub fn finish(&self) {
        self.slot.lock().state = Some(SequencerState::Finished);
        if let Some(sink) = self.sink() {
            sink.on_finished();
        }
    }
}

impl Sequencer for FakeSequencer {
    fn load(&mut self, source: &SongSource) -> Result<(), SequencerError> {
        if let SongSource::Bytes(bytes) = source {
            if bytes.is_empty() {
                return Err(SequencerError::Parse("empty song".to_string()));
            }
        }
        let mut slot = self.slot.lock();
        slot.loaded = true;
        slot.position = 0;
        slot.state = Some(SequencerState::Stopped);
        Ok(())
    }

    fn start(&mut self, sink: Arc<dyn SequencerSink>) -> Result<(), SequencerError> {
        let mut slot = self.slot.lock();
        if !slot.loaded {
            return Err(SequencerError::NotLoaded);
        }
        slot.sink = Some(sink);
        slot.state = Some(SequencerState::Playing);
        Ok(())
    }

    fn pause(&mut self) {
        let mut slot = self.slot.lock();
        if slot.state == Some(SequencerState::Playing) {
            slot.state = Some(SequencerState::Paused);
        }
    }

    fn stop(&mut self, reset_position: bool) {
        let mut slot = self.slot.lock();
        slot.state = Some(SequencerState::Stopped);
        if reset_position {
            slot.position = 0;
        }
    }

    fn state(&self) -> SequencerState {
        self.slot.lock().state.unwrap_or(SequencerState::Stopped)
    }

    fn duration_ms(&self) -> u64 {
        4_000
    }

    fn position_ms(&self) -> u64 {
        0
    }

    fn duration_tick(&self) -> Tick {
        3_840
    }

    fn position_tick(&self) -> Tick {
        self.slot.lock().position
    }

    fn set_position_tick(&mut self, tick: Tick) {
        self.slot.lock().position = tick.clamp(0, 3_840);
    }

    /// 4/4 at 480 ticks per quarter.
    fn current_beat(&self) -> u64 {
        (self.slot.lock().position / 480).min(7) as u64
    }

    fn beat_count(&self) -> u64 {
        8
    }

    fn bpm_speed(&self) -> i32 {
        self.slot.lock().bpm_speed
    }

    fn set_bpm_speed(&mut self, speed: i32) {
        self.slot.lock().bpm_speed = speed;
    }

    fn current_bpm(&self) -> u32 {
        (120 + self.slot.lock().bpm_speed).max(1) as u32
    }
}

// ---- rigs ------------------------------------------------------------------

pub fn test_config() -> EngineConfig {
    EngineConfig {
        soundfonts: vec![PathBuf::from("general.sf2")],
        ..EngineConfig::default()
    }
}

pub struct Rig {
    pub player: MidiPlayer,
    pub backend: Arc<Mutex<BackendLog>>,
    pub midi: Arc<Mutex<MidiLog>>,
    pub sequencers: [SequencerHandle; 2],
}

impl Rig {
    pub fn with_config(config: EngineConfig) -> Result<Self, EngineError> {
        let (backend, backend_log) = FakeBackend::new();
        let (midi_port, midi_log) = FakeMidiPort::new(2);
        let (first, first_handle) = FakeSequencer::new();
        let (second, second_handle) = FakeSequencer::new();

        let player = MidiPlayer::new(
            &config,
            [Box::new(first), Box::new(second)],
            Box::new(backend),
            Box::new(midi_port),
        );
        player.set_output_port(OutputPort::Internal)?;

        Ok(Self {
            player,
            backend: backend_log,
            midi: midi_log,
            sequencers: [first_handle, second_handle],
        })
    }

    pub fn new() -> Self {
        Self::with_config(test_config()).expect("internal synth opens")
    }

    /// Loads a song into the active slot and starts it.
    pub fn playing() -> Self {
        let rig = Self::new();
        rig.player
            .load(&SongSource::Bytes(vec![0x4d]))
            .expect("song loads");
        rig.player.play().expect("song starts");
        rig.backend.lock().clear_events();
        rig.player.drain_notifications();
        rig
    }

    pub fn song(&self) -> &SequencerHandle {
        &self.sequencers[0]
    }
}
