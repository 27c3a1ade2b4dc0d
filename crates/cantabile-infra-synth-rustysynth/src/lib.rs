mod graph;

use cantabile_ports::audio::{
    AudioBackend, AudioError, AudioOutputPort, AudioStreamHandle, EffectId, EffectKind,
    FontBinding, SoundfontId, SoundfontInfo, StreamId,
};
use cantabile_ports::midi::MidiEvent;
use cantabile_ports::types::{AudioConfig, AudioOutputDevice, DeviceId, Volume01};
use graph::{FontLayer, GraphRenderer, MidiNode, MixGraph, NodeKind, Parent};
use parking_lot::Mutex;
use rtrb::{Producer, RingBuffer};
use rustysynth::{SoundFont, Synthesizer, SynthesizerSettings};
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

const EVENT_QUEUE_CAPACITY: usize = 8192;
const MAX_FRAMES: usize = 4096;

struct LoadedFont {
    font: Arc<SoundFont>,
    volume: f32,
}

/// Effect units are tracked per stream; their processing is a pass-through.
#[derive(Clone, Debug)]
pub struct EffectSlot {
    pub stream: StreamId,
    pub kind: EffectKind,
    pub bypass: bool,
    pub params: Vec<f32>,
}

struct OpenDevice {
    sample_rate_hz: u32,
    graph: Arc<Mutex<MixGraph>>,
    events: Producer<(StreamId, MidiEvent)>,
    stream: Option<Box<dyn AudioStreamHandle>>,
}

/// Soundfont-driven mixer: every MIDI stream is a set of rustysynth
/// synthesizers, one per bound soundfont, summed through optional sub-mixes
/// into the master output.
pub struct RustySynthBackend {
    audio: Box<dyn AudioOutputPort>,
    synth_master_gain: f32,
    device: Option<OpenDevice>,
    fonts: HashMap<SoundfontId, LoadedFont>,
    effects: HashMap<EffectId, EffectSlot>,
    next_font: u32,
    next_effect: u32,
}

impl RustySynthBackend {
    pub fn new(audio: Box<dyn AudioOutputPort>, synth_master_gain: f32) -> Self {
        Self {
            audio,
            synth_master_gain,
            device: None,
            fonts: HashMap::new(),
            effects: HashMap::new(),
            next_font: 0,
            next_effect: 0,
        }
    }

    pub fn effect(&self, effect: EffectId) -> Option<&EffectSlot> {
        self.effects.get(&effect)
    }

    fn device(&self) -> Result<&OpenDevice, AudioError> {
        self.device.as_ref().ok_or(AudioError::NotOpen)
    }

    fn with_graph<T>(&self, f: impl FnOnce(&mut MixGraph) -> T) -> Option<T> {
        let device = self.device.as_ref()?;
        let mut graph = device.graph.lock();
        Some(f(&mut graph))
    }

    fn build_layers(
        &self,
        sample_rate_hz: u32,
        fonts: &[FontBinding],
        programs: &[u8; 16],
    ) -> Result<Vec<FontLayer>, AudioError> {
        let mut settings = SynthesizerSettings::new(sample_rate_hz as i32);
        settings.enable_reverb_and_chorus = false;

        let mut layers = Vec::with_capacity(fonts.len());
        for binding in fonts {
            let loaded = self.fonts.get(&binding.font).ok_or_else(|| {
                AudioError::SoundfontLoad(format!("soundfont {:?} is not loaded", binding.font))
            })?;
            let mut synth = Synthesizer::new(&loaded.font, &settings)
                .map_err(|e| AudioError::Backend(e.to_string()))?;
            synth.set_master_volume(self.synth_master_gain);
            for (channel, program) in programs.iter().enumerate() {
                if *program != 0 {
                    synth.process_midi_message(channel as i32, 0xC0, *program as i32, 0);
                }
            }
            layers.push(FontLayer {
                font: binding.font,
                preset: binding.preset,
                synth,
            });
        }
        Ok(layers)
    }
}

impl AudioBackend for RustySynthBackend {
    fn list_devices(&self) -> Result<Vec<AudioOutputDevice>, AudioError> {
        self.audio.list_outputs()
    }

    fn open_device(&mut self, device: Option<&DeviceId>, config: AudioConfig) -> Result<(), AudioError> {
        if self.device.is_some() {
            return Ok(());
        }

        let (producer, consumer) = RingBuffer::new(EVENT_QUEUE_CAPACITY);
        let max_frames = config.buffer_size_frames.map(|f| f as usize).unwrap_or(MAX_FRAMES);
        let mut graph = MixGraph::new(consumer, max_frames);
        graph.font_volumes = self
            .fonts
            .iter()
            .map(|(id, loaded)| (*id, loaded.volume))
            .collect();
        let graph = Arc::new(Mutex::new(graph));

        let renderer = Arc::new(GraphRenderer {
            graph: graph.clone(),
        });
        let stream = self.audio.open_output(device, config, renderer)?;
        tracing::info!(
            device = ?device,
            sample_rate = config.sample_rate_hz,
            "synth output opened"
        );

        self.device = Some(OpenDevice {
            sample_rate_hz: config.sample_rate_hz,
            graph,
            events: producer,
            stream: Some(stream),
        });
        Ok(())
    }

    fn close_device(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        if let Some(stream) = device.stream.take() {
            stream.close();
        }
        device.graph.lock().clear();
        self.effects.clear();
        tracing::info!("synth output closed");
    }

    fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn create_midi_stream(&mut self) -> Result<StreamId, AudioError> {
        let device = self.device()?;
        Ok(device.graph.lock().insert(NodeKind::Midi(MidiNode::new())))
    }

    fn create_submix(&mut self) -> Result<StreamId, AudioError> {
        let device = self.device()?;
        Ok(device.graph.lock().insert(NodeKind::Submix))
    }

    fn free_stream(&mut self, stream: StreamId) {
        self.effects.retain(|_, slot| slot.stream != stream);
        self.with_graph(|graph| graph.remove(stream));
    }

    fn attach(&mut self, child: StreamId, parent: Option<StreamId>) -> Result<(), AudioError> {
        let device = self.device()?;
        let mut graph = device.graph.lock();

        let child_is_submix = match graph.node(child) {
            Some(node) => matches!(node.kind, NodeKind::Submix),
            None => return Err(AudioError::UnknownStream(child)),
        };
        let target = match parent {
            None => Parent::Master,
            Some(parent) => {
                match graph.node(parent) {
                    Some(node) if matches!(node.kind, NodeKind::Submix) => {}
                    Some(_) => {
                        return Err(AudioError::Backend(format!(
                            "stream {parent:?} is not a sub-mix"
                        )))
                    }
                    None => return Err(AudioError::UnknownStream(parent)),
                }
                if child_is_submix {
                    return Err(AudioError::Backend(
                        "sub-mixes cannot be nested".to_string(),
                    ));
                }
                Parent::Submix(parent)
            }
        };

        if let Some(node) = graph.node_mut(child) {
            node.parent = target;
        }
        Ok(())
    }

    fn detach(&mut self, child: StreamId) {
        self.with_graph(|graph| {
            if let Some(node) = graph.node_mut(child) {
                node.parent = Parent::Detached;
            }
        });
    }

    fn send_event(&mut self, stream: StreamId, event: &MidiEvent) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if device.events.push((stream, *event)).is_err() {
            tracing::warn!(stream = stream.0, "synth event queue full, event dropped");
        }
    }

    fn set_stream_volume(&mut self, stream: StreamId, volume: Volume01) {
        self.with_graph(|graph| {
            if let Some(node) = graph.node_mut(stream) {
                node.volume = volume.get();
            }
        });
    }

    fn set_master_volume(&mut self, volume: Volume01) {
        self.with_graph(|graph| graph.master_volume = volume.get());
    }

    fn load_soundfont(&mut self, path: &Path) -> Result<(SoundfontId, SoundfontInfo), AudioError> {
        let mut file = File::open(path).map_err(|e| AudioError::SoundfontLoad(e.to_string()))?;
        let font = Arc::new(
            SoundFont::new(&mut file).map_err(|e| AudioError::SoundfontLoad(e.to_string()))?,
        );

        let name = font.get_info().get_bank_name().trim().to_string();
        let name = if name.is_empty() {
            path.file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("SoundFont")
                .to_string()
        } else {
            name
        };
        let info = SoundfontInfo {
            name,
            preset_count: font.get_presets().len(),
        };

        let id = SoundfontId(self.next_font);
        self.next_font += 1;
        self.fonts.insert(id, LoadedFont { font, volume: 1.0 });
        self.with_graph(|graph| graph.font_volumes.insert(id, 1.0));
        Ok((id, info))
    }

    fn free_soundfont(&mut self, font: SoundfontId) {
        if self.fonts.remove(&font).is_none() {
            return;
        }
        self.with_graph(|graph| {
            graph.font_volumes.remove(&font);
            for node in graph.nodes.iter_mut().flatten() {
                if let NodeKind::Midi(midi) = &mut node.kind {
                    midi.layers.retain(|layer| layer.font != font);
                }
            }
        });
    }

    fn soundfont_volume(&self, font: SoundfontId) -> Option<f32> {
        self.fonts.get(&font).map(|loaded| loaded.volume)
    }

    fn set_soundfont_volume(&mut self, font: SoundfontId, volume: f32) {
        let volume = volume.max(0.0);
        let Some(loaded) = self.fonts.get_mut(&font) else {
            return;
        };
        loaded.volume = volume;
        self.with_graph(|graph| graph.font_volumes.insert(font, volume));
    }

    fn set_stream_fonts(&mut self, stream: StreamId, fonts: &[FontBinding]) -> Result<(), AudioError> {
        let device = self.device()?;
        let sample_rate_hz = device.sample_rate_hz;
        let programs = {
            let mut graph = device.graph.lock();
            match graph.midi_mut(stream) {
                Some(midi) => midi.programs,
                None => return Err(AudioError::UnknownStream(stream)),
            }
        };

        // synthesizers are built outside the lock, the audio thread keeps running
        let layers = self.build_layers(sample_rate_hz, fonts, &programs)?;
        let mut graph = device.graph.lock();
        match graph.midi_mut(stream) {
            Some(midi) => {
                midi.layers = layers;
                Ok(())
            }
            None => Err(AudioError::UnknownStream(stream)),
        }
    }

    fn add_effect(&mut self, stream: StreamId, kind: EffectKind) -> Result<EffectId, AudioError> {
        let device = self.device()?;
        if device.graph.lock().node(stream).is_none() {
            return Err(AudioError::UnknownStream(stream));
        }
        let id = EffectId(self.next_effect);
        self.next_effect += 1;
        self.effects.insert(
            id,
            EffectSlot {
                stream,
                kind,
                bypass: false,
                params: kind.default_params(),
            },
        );
        Ok(id)
    }

    fn remove_effect(&mut self, effect: EffectId) {
        self.effects.remove(&effect);
    }

    fn set_effect_bypass(&mut self, effect: EffectId, bypass: bool) {
        if let Some(slot) = self.effects.get_mut(&effect) {
            slot.bypass = bypass;
        }
    }

    fn set_effect_params(&mut self, effect: EffectId, params: &[f32]) {
        if let Some(slot) = self.effects.get_mut(&effect) {
            slot.params = params.to_vec();
        }
    }
}

impl Drop for RustySynthBackend {
    fn drop(&mut self) {
        self.close_device();
    }
}
