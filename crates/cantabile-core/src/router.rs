use crate::effects::EffectUnit;
use crate::error::EngineError;
use crate::instrument::{InstrumentType, VOICE_COUNT};
use crate::session::SessionState;
use crate::soundfont::{SoundfontMap, PROGRAM_COUNT};
use cantabile_ports::audio::{AudioBackend, EffectKind, FontBinding, SoundfontId, StreamId};
use cantabile_ports::midi::{cc, MidiEvent, MidiEventKind, CHANNEL_COUNT, PERCUSSION_CHANNEL};
use cantabile_ports::settings::EngineConfig;
use cantabile_ports::types::{AudioConfig, AudioOutputDevice, DeviceId, Volume01};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Mix destination of a voice.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusGroup {
    #[default]
    Master,
    Submix(usize),
}

#[derive(Clone, Debug)]
pub struct InstrumentVoice {
    pub kind: InstrumentType,
    pub volume: u8,
    pub mute: bool,
    pub solo: bool,
    pub enable: bool,
    pub bus: BusGroup,
    pub effects: Vec<EffectUnit>,
    stream: Option<StreamId>,
}

impl InstrumentVoice {
    fn new(kind: InstrumentType, volume: u8) -> Self {
        Self {
            kind,
            volume: volume.min(100),
            mute: false,
            solo: false,
            enable: true,
            bus: BusGroup::Master,
            effects: Vec::new(),
            stream: None,
        }
    }

    fn gain(&self) -> Volume01 {
        if self.enable {
            Volume01::from_percent(self.volume)
        } else {
            Volume01::new(0.0)
        }
    }
}

#[derive(Clone, Debug)]
pub struct BusStrip {
    pub volume: u8,
    pub mute: bool,
    stream: Option<StreamId>,
}

impl BusStrip {
    fn gain(&self) -> Volume01 {
        if self.mute {
            Volume01::new(0.0)
        } else {
            Volume01::from_percent(self.volume)
        }
    }
}

/// What the router did with an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RouteOutcome {
    /// The event after transpose and lock substitution.
    pub event: MidiEvent,
    /// Voice a note-addressed event was played on.
    pub voice: Option<InstrumentType>,
    pub bus: BusGroup,
}

/// Maps channel-addressed events onto per-instrument audio voices and owns
/// their mixer state: gain, mute/solo enable, bus routing, effects and
/// soundfont bindings.
pub struct InstrumentRouter {
    backend: Box<dyn AudioBackend>,
    device: Option<DeviceId>,
    audio_config: AudioConfig,
    voices: Vec<InstrumentVoice>,
    buses: Vec<BusStrip>,
    channel_types: [InstrumentType; CHANNEL_COUNT],
    use_solo: bool,
    master_volume: Volume01,
    soundfont_paths: Vec<PathBuf>,
    soundfonts: Vec<SoundfontId>,
    fonts_loaded: bool,
    soundfont_map: SoundfontMap,
    open: bool,
}

impl InstrumentRouter {
    pub fn new(backend: Box<dyn AudioBackend>, config: &EngineConfig) -> Self {
        let voices = InstrumentType::ALL
            .iter()
            .map(|kind| InstrumentVoice::new(*kind, config.voice_volume))
            .collect();
        let buses = (0..config.bus_count)
            .map(|_| BusStrip {
                volume: 100,
                mute: false,
                stream: None,
            })
            .collect();

        Self {
            backend,
            device: config.audio_device.clone(),
            audio_config: config.audio_config(),
            voices,
            buses,
            channel_types: default_channel_types(),
            use_solo: false,
            master_volume: Volume01::from_percent(config.master_volume),
            soundfont_paths: config.soundfonts.clone(),
            soundfonts: Vec::new(),
            fonts_loaded: false,
            soundfont_map: SoundfontMap::default(),
            open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Opens the device and builds one stream per voice and per bus, then
    /// reapplies every stored setting.
    pub fn open(&mut self) -> Result<(), EngineError> {
        if self.open {
            return Ok(());
        }

        self.backend
            .open_device(self.device.as_ref(), self.audio_config)?;
        if let Err(err) = self.create_streams().and_then(|()| self.configure_streams()) {
            self.release_effects();
            self.release_streams();
            self.backend.close_device();
            return Err(err);
        }
        self.open = true;

        if !self.fonts_loaded {
            self.load_soundfonts();
        }
        self.bind_default_fonts();
        if !self.soundfont_map.is_default() {
            let map = self.soundfont_map.clone();
            if let Err(err) = self.map_soundfonts(map) {
                tracing::warn!(error = %err, "stored soundfont map not applied");
            }
        }

        tracing::info!(
            device = ?self.device,
            voices = VOICE_COUNT,
            buses = self.buses.len(),
            soundfonts = self.soundfonts.len(),
            "synth router opened"
        );
        Ok(())
    }

    pub fn close(&mut self, free_soundfonts: bool) {
        if !self.open {
            return;
        }

        self.release_effects();
        self.release_streams();

        if free_soundfonts {
            for font in self.soundfonts.drain(..) {
                self.backend.free_soundfont(font);
            }
            self.fonts_loaded = false;
        }

        self.backend.close_device();
        self.open = false;
        tracing::info!("synth router closed");
    }

    pub fn list_devices(&self) -> Result<Vec<AudioOutputDevice>, EngineError> {
        Ok(self.backend.list_devices()?)
    }

    pub fn output_device(&self) -> Option<&DeviceId> {
        self.device.as_ref()
    }

    /// Moves the mix to another device; the previous device stays in use
    /// when the new one cannot be opened.
    pub fn set_output_device(&mut self, device: Option<DeviceId>) -> Result<(), EngineError> {
        if !self.open {
            self.device = device;
            return Ok(());
        }

        let previous = std::mem::replace(&mut self.device, device);
        self.close(false);
        if let Err(err) = self.open() {
            tracing::warn!(error = %err, "output device unavailable, restoring previous device");
            self.device = previous;
            self.open()?;
            return Err(err);
        }
        Ok(())
    }

    // ---- routing -------------------------------------------------------

    /// Routes a dispatched event to its voice stream(s). Returns `None` when
    /// substitution pushes the note outside the MIDI range.
    pub fn route(&mut self, event: &MidiEvent, session: &SessionState) -> Option<RouteOutcome> {
        let outgoing = session.apply(event)?;
        let channel = event.channel as usize;

        match event.kind {
            MidiEventKind::NoteOn | MidiEventKind::NoteOff | MidiEventKind::NoteAftertouch => {
                let voice = self.voice_for_note(outgoing.channel, outgoing.data1);
                self.send_to_voice(voice, &outgoing);
                Some(RouteOutcome {
                    event: outgoing,
                    voice: Some(voice),
                    bus: self.voices[voice.index()].bus,
                })
            }
            MidiEventKind::ProgramChange => {
                if event.channel != PERCUSSION_CHANNEL {
                    self.channel_types[channel] = InstrumentType::from_program(event.data1);
                }
                self.send_to_all(&outgoing);
                Some(self.outcome(outgoing))
            }
            MidiEventKind::PitchBend if event.channel != PERCUSSION_CHANNEL => {
                let voice = self.channel_types[channel];
                self.send_to_voice(voice, &outgoing);
                Some(RouteOutcome {
                    event: outgoing,
                    voice: Some(voice),
                    bus: self.voices[voice.index()].bus,
                })
            }
            _ => {
                self.send_to_all(&outgoing);
                Some(self.outcome(outgoing))
            }
        }
    }

    pub fn voice_for_note(&self, channel: u8, note: u8) -> InstrumentType {
        if channel == PERCUSSION_CHANNEL {
            InstrumentType::from_drum_note(note)
        } else {
            self.channel_types[channel as usize & 0x0F]
        }
    }

    pub fn channel_type(&self, channel: u8) -> InstrumentType {
        self.channel_types[channel as usize & 0x0F]
    }

    /// Records a program change that was sent elsewhere, so notes keep
    /// landing on the right voice if the channel comes back.
    pub fn track_program(&mut self, channel: u8, program: u8) {
        if channel != PERCUSSION_CHANNEL {
            self.channel_types[channel as usize & 0x0F] = InstrumentType::from_program(program);
        }
    }

    pub fn reset_channels(&mut self) {
        self.channel_types = default_channel_types();
    }

    /// Logical channels currently playing through `voice`. Percussion voices
    /// report a virtual channel 16 + slot.
    pub fn channels_for_voice(&self, voice: InstrumentType) -> Vec<u8> {
        match voice.percussion_slot() {
            Some(slot) => vec![(CHANNEL_COUNT + slot) as u8],
            None => (0..CHANNEL_COUNT as u8)
                .filter(|channel| {
                    *channel != PERCUSSION_CHANNEL && self.channel_types[*channel as usize] == voice
                })
                .collect(),
        }
    }

    pub fn send_all_notes_off(&mut self, channel: u8) {
        self.send_to_all(&MidiEvent::all_notes_off(channel));
    }

    pub fn send_all_notes_off_all_channels(&mut self) {
        for channel in 0..CHANNEL_COUNT as u8 {
            self.send_all_notes_off(channel);
        }
    }

    /// Reset-all-controllers followed by a pitch-bend range of 2 semitones.
    pub fn send_reset_all_controllers(&mut self, channel: u8) {
        for event in [
            MidiEvent::controller(channel, cc::RESET_ALL_CONTROLLERS, 0),
            MidiEvent::controller(channel, cc::RPN_MSB, 0),
            MidiEvent::controller(channel, cc::RPN_LSB, 0),
            MidiEvent::controller(channel, cc::DATA_ENTRY_MSB, 2),
        ] {
            self.send_to_all(&event);
        }
    }

    // ---- voice mixer ---------------------------------------------------

    pub fn voice(&self, voice: InstrumentType) -> &InstrumentVoice {
        &self.voices[voice.index()]
    }

    pub fn voices(&self) -> &[InstrumentVoice] {
        &self.voices
    }

    pub fn voice_stream(&self, voice: InstrumentType) -> Option<StreamId> {
        self.voices[voice.index()].stream
    }

    pub fn is_any_voice_soloed(&self) -> bool {
        self.use_solo
    }

    pub fn set_voice_volume(&mut self, voice: InstrumentType, volume: i32) {
        let index = voice.index();
        self.voices[index].volume = volume.clamp(0, 100) as u8;
        self.apply_voice_gain(index);
    }

    pub fn set_voice_mute(&mut self, voice: InstrumentType, mute: bool) {
        self.voices[voice.index()].mute = mute;
        self.calculate_enable();
    }

    pub fn set_voice_solo(&mut self, voice: InstrumentType, solo: bool) {
        self.voices[voice.index()].solo = solo;
        self.use_solo = self.voices.iter().any(|v| v.solo);
        self.calculate_enable();
    }

    pub fn set_bus_group(&mut self, voice: InstrumentType, group: BusGroup) -> Result<(), EngineError> {
        if let BusGroup::Submix(bus) = group {
            if bus >= self.buses.len() {
                return Err(EngineError::validation(format!("bus {bus} does not exist")));
            }
        }

        let index = voice.index();
        if self.voices[index].bus == group {
            return Ok(());
        }
        self.voices[index].bus = group;

        if let Some(stream) = self.voices[index].stream {
            self.backend.detach(stream);
            self.attach_voice(index)?;
        }
        tracing::debug!(?voice, ?group, "voice moved to bus");
        Ok(())
    }

    pub fn bus_count(&self) -> usize {
        self.buses.len()
    }

    pub fn bus(&self, bus: usize) -> Option<&BusStrip> {
        self.buses.get(bus)
    }

    pub fn bus_stream(&self, bus: usize) -> Option<StreamId> {
        self.buses.get(bus).and_then(|strip| strip.stream)
    }

    pub fn set_bus_volume(&mut self, bus: usize, volume: i32) -> Result<(), EngineError> {
        let strip = self
            .buses
            .get_mut(bus)
            .ok_or_else(|| EngineError::validation(format!("bus {bus} does not exist")))?;
        strip.volume = volume.clamp(0, 100) as u8;
        self.apply_bus_gain(bus);
        Ok(())
    }

    pub fn set_bus_mute(&mut self, bus: usize, mute: bool) -> Result<(), EngineError> {
        let strip = self
            .buses
            .get_mut(bus)
            .ok_or_else(|| EngineError::validation(format!("bus {bus} does not exist")))?;
        strip.mute = mute;
        self.apply_bus_gain(bus);
        Ok(())
    }

    pub fn master_volume(&self) -> Volume01 {
        self.master_volume
    }

    pub fn set_master_volume(&mut self, volume: Volume01) {
        self.master_volume = volume;
        if self.open {
            self.backend.set_master_volume(volume);
        }
    }

    // ---- effects -------------------------------------------------------

    pub fn effects(&self, voice: InstrumentType) -> &[EffectUnit] {
        &self.voices[voice.index()].effects
    }

    /// Appends an effect to the voice chain and returns its index. While the
    /// backend is closed the unit is only recorded and attached on open.
    pub fn add_effect(&mut self, voice: InstrumentType, kind: EffectKind) -> Result<usize, EngineError> {
        let index = voice.index();
        let mut unit = EffectUnit::new(kind);
        if let Some(stream) = self.voices[index].stream {
            unit.handle = Some(self.backend.add_effect(stream, kind)?);
        }
        self.voices[index].effects.push(unit);
        Ok(self.voices[index].effects.len() - 1)
    }

    /// Removes an effect; later effects shift down by one.
    pub fn remove_effect(&mut self, voice: InstrumentType, effect: usize) -> Result<(), EngineError> {
        let effects = &mut self.voices[voice.index()].effects;
        if effect >= effects.len() {
            return Err(EngineError::validation(format!("no effect {effect} on {voice:?}")));
        }
        let unit = effects.remove(effect);
        if let Some(handle) = unit.handle {
            self.backend.remove_effect(handle);
        }
        Ok(())
    }

    pub fn set_effect_bypass(
        &mut self,
        voice: InstrumentType,
        effect: usize,
        bypass: bool,
    ) -> Result<(), EngineError> {
        let unit = self.effect_mut(voice, effect)?;
        unit.bypass = bypass;
        let handle = unit.handle;
        if let Some(handle) = handle {
            self.backend.set_effect_bypass(handle, bypass);
        }
        Ok(())
    }

    pub fn set_effect_params(
        &mut self,
        voice: InstrumentType,
        effect: usize,
        params: Vec<f32>,
    ) -> Result<(), EngineError> {
        let unit = self.effect_mut(voice, effect)?;
        let handle = unit.handle;
        if let Some(handle) = handle {
            self.backend.set_effect_params(handle, &params);
        }
        self.effect_mut(voice, effect)?.params = params;
        Ok(())
    }

    // ---- soundfonts ----------------------------------------------------

    /// Replaces the soundfont list. The program map is reset because its
    /// indices referred to the previous list.
    pub fn set_soundfonts(&mut self, paths: Vec<PathBuf>) {
        self.soundfont_paths = paths;
        self.soundfont_map = SoundfontMap::default();
        self.fonts_loaded = false;
        if self.open {
            self.load_soundfonts();
            self.bind_default_fonts();
        }
    }

    pub fn soundfont_paths(&self) -> &[PathBuf] {
        &self.soundfont_paths
    }

    /// Soundfonts that actually loaded, in list order.
    pub fn loaded_soundfont_count(&self) -> usize {
        self.soundfonts.len()
    }

    pub fn soundfont_volume(&self, index: usize) -> Option<f32> {
        let font = self.soundfonts.get(index)?;
        self.backend.soundfont_volume(*font)
    }

    pub fn set_soundfont_volume(&mut self, index: usize, volume: f32) -> Result<(), EngineError> {
        let font = *self
            .soundfonts
            .get(index)
            .ok_or_else(|| EngineError::validation(format!("soundfont {index} is not loaded")))?;
        self.backend.set_soundfont_volume(font, volume);
        Ok(())
    }

    pub fn soundfont_map(&self) -> &SoundfontMap {
        &self.soundfont_map
    }

    /// Binds programs and percussion voices to loaded soundfonts. A
    /// well-formed map is kept even when it cannot be applied yet, so the
    /// next `open` picks it up.
    pub fn map_soundfonts(&mut self, map: SoundfontMap) -> Result<(), EngineError> {
        if map.programs.len() < PROGRAM_COUNT {
            return Err(EngineError::validation(format!(
                "program map has {} entries, expected {PROGRAM_COUNT}",
                map.programs.len()
            )));
        }
        self.soundfont_map = map;

        if self.soundfonts.is_empty() {
            return Err(EngineError::validation("no soundfont loaded"));
        }
        if !self.open {
            return Err(EngineError::Device("audio backend is not open".to_string()));
        }

        let melodic = self.soundfont_map.melodic_bindings(&self.soundfonts);
        for index in 0..VOICE_COUNT {
            let Some(stream) = self.voices[index].stream else {
                continue;
            };
            let bindings: Vec<FontBinding> = match self.voices[index].kind.percussion_slot() {
                Some(slot) => self
                    .soundfont_map
                    .drum_binding(slot, &self.soundfonts)
                    .into_iter()
                    .collect(),
                None => melodic.clone(),
            };
            self.backend.set_stream_fonts(stream, &bindings)?;
        }
        tracing::debug!(explicit = melodic.len() - 1, "soundfont map applied");
        Ok(())
    }

    // ---- internals -----------------------------------------------------

    fn outcome(&self, event: MidiEvent) -> RouteOutcome {
        RouteOutcome {
            event,
            voice: None,
            bus: BusGroup::Master,
        }
    }

    fn send_to_voice(&mut self, voice: InstrumentType, event: &MidiEvent) {
        if let Some(stream) = self.voices[voice.index()].stream {
            self.backend.send_event(stream, event);
        }
    }

    fn send_to_all(&mut self, event: &MidiEvent) {
        for voice in &self.voices {
            if let Some(stream) = voice.stream {
                self.backend.send_event(stream, event);
            }
        }
    }

    fn calculate_enable(&mut self) {
        let use_solo = self.use_solo;
        for voice in &mut self.voices {
            voice.enable = !voice.mute && (!use_solo || voice.solo);
        }
        for index in 0..VOICE_COUNT {
            self.apply_voice_gain(index);
        }
    }

    fn apply_voice_gain(&mut self, index: usize) {
        let voice = &self.voices[index];
        if let Some(stream) = voice.stream {
            self.backend.set_stream_volume(stream, voice.gain());
        }
    }

    fn apply_bus_gain(&mut self, index: usize) {
        let strip = &self.buses[index];
        if let Some(stream) = strip.stream {
            self.backend.set_stream_volume(stream, strip.gain());
        }
    }

    fn attach_voice(&mut self, index: usize) -> Result<(), EngineError> {
        let Some(stream) = self.voices[index].stream else {
            return Ok(());
        };
        let parent = match self.voices[index].bus {
            BusGroup::Master => None,
            BusGroup::Submix(bus) => self.bus_stream(bus),
        };
        self.backend.attach(stream, parent)?;
        Ok(())
    }

    fn attach_effects(&mut self, index: usize) -> Result<(), EngineError> {
        let Some(stream) = self.voices[index].stream else {
            return Ok(());
        };
        for unit in &mut self.voices[index].effects {
            let handle = self.backend.add_effect(stream, unit.kind)?;
            self.backend.set_effect_params(handle, &unit.params);
            self.backend.set_effect_bypass(handle, unit.bypass);
            unit.handle = Some(handle);
        }
        Ok(())
    }

    fn create_streams(&mut self) -> Result<(), EngineError> {
        for index in 0..self.buses.len() {
            let stream = self.backend.create_submix()?;
            self.backend.attach(stream, None)?;
            self.buses[index].stream = Some(stream);
        }
        for index in 0..VOICE_COUNT {
            self.voices[index].stream = Some(self.backend.create_midi_stream()?);
        }
        Ok(())
    }

    /// Gains, bus routing and effects for freshly created streams.
    fn configure_streams(&mut self) -> Result<(), EngineError> {
        self.backend.set_master_volume(self.master_volume);
        for index in 0..self.buses.len() {
            self.apply_bus_gain(index);
        }
        for index in 0..VOICE_COUNT {
            self.apply_voice_gain(index);
            self.attach_voice(index)?;
            self.attach_effects(index)?;
        }
        Ok(())
    }

    fn release_effects(&mut self) {
        for voice in &mut self.voices {
            for unit in &mut voice.effects {
                if let Some(handle) = unit.handle.take() {
                    self.backend.remove_effect(handle);
                }
            }
        }
    }

    fn release_streams(&mut self) {
        for voice in &mut self.voices {
            if let Some(stream) = voice.stream.take() {
                self.backend.free_stream(stream);
            }
        }
        for strip in &mut self.buses {
            if let Some(stream) = strip.stream.take() {
                self.backend.free_stream(stream);
            }
        }
    }

    /// Loads every configured soundfont; failures are skipped so the
    /// remaining fonts shift down in the loaded list.
    fn load_soundfonts(&mut self) {
        for font in self.soundfonts.drain(..) {
            self.backend.free_soundfont(font);
        }
        for path in &self.soundfont_paths {
            match self.backend.load_soundfont(path) {
                Ok((font, info)) => {
                    tracing::info!(path = %path.display(), name = %info.name, presets = info.preset_count, "soundfont loaded");
                    self.soundfonts.push(font);
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "soundfont skipped");
                }
            }
        }
        self.fonts_loaded = true;
    }

    fn bind_default_fonts(&mut self) {
        let Some(default_font) = self.soundfonts.first().copied() else {
            return;
        };
        let binding = [FontBinding {
            font: default_font,
            preset: None,
        }];
        for index in 0..VOICE_COUNT {
            if let Some(stream) = self.voices[index].stream {
                if let Err(err) = self.backend.set_stream_fonts(stream, &binding) {
                    tracing::warn!(error = %err, "default soundfont not bound");
                }
            }
        }
    }

    fn effect_mut(&mut self, voice: InstrumentType, effect: usize) -> Result<&mut EffectUnit, EngineError> {
        self.voices[voice.index()]
            .effects
            .get_mut(effect)
            .ok_or_else(|| EngineError::validation(format!("no effect {effect} on {voice:?}")))
    }
}

fn default_channel_types() -> [InstrumentType; CHANNEL_COUNT] {
    let mut types = [InstrumentType::Piano; CHANNEL_COUNT];
    types[PERCUSSION_CHANNEL as usize] = InstrumentType::PercussionEtc;
    types
}
