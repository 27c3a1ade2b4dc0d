use cantabile_ports::audio::{AudioRenderCallback, SoundfontId, StreamId};
use cantabile_ports::midi::{MidiEvent, MidiEventKind};
use cantabile_ports::types::SampleTime;
use parking_lot::Mutex;
use rtrb::Consumer;
use rustysynth::Synthesizer;
use std::collections::HashMap;
use std::sync::Arc;

const PERCUSSION_CHANNEL: u8 = 9;
const LIMIT: f32 = 0.98;

/// One synthesizer per soundfont binding of a MIDI stream.
pub(crate) struct FontLayer {
    pub font: SoundfontId,
    pub preset: Option<u8>,
    pub synth: Synthesizer,
}

pub(crate) struct MidiNode {
    pub layers: Vec<FontLayer>,
    pub programs: [u8; 16],
}

impl MidiNode {
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            programs: [0; 16],
        }
    }

    /// The layer that sounds a note on `channel`: the one bound to the
    /// channel's current program, else the catch-all layer.
    fn note_layer(&mut self, channel: u8) -> Option<&mut FontLayer> {
        let program = self.programs[channel as usize & 0x0F];
        let explicit = if channel == PERCUSSION_CHANNEL {
            None
        } else {
            self.layers.iter().position(|l| l.preset == Some(program))
        };
        let index = explicit.or_else(|| self.layers.iter().position(|l| l.preset.is_none()))?;
        self.layers.get_mut(index)
    }

    fn apply(&mut self, event: &MidiEvent) {
        let channel = event.channel as i32;
        match event.kind {
            MidiEventKind::NoteOn if event.data2 > 0 => {
                if let Some(layer) = self.note_layer(event.channel) {
                    layer
                        .synth
                        .note_on(channel, event.data1 as i32, event.data2 as i32);
                }
            }
            // the program may have changed since the note started
            MidiEventKind::NoteOn | MidiEventKind::NoteOff => {
                for layer in &mut self.layers {
                    layer.synth.note_off(channel, event.data1 as i32);
                }
            }
            kind => {
                if kind == MidiEventKind::ProgramChange {
                    self.programs[event.channel as usize & 0x0F] = event.data1;
                }
                let command = kind.status_nibble() as i32;
                for layer in &mut self.layers {
                    layer.synth.process_midi_message(
                        channel,
                        command,
                        event.data1 as i32,
                        event.data2 as i32,
                    );
                }
            }
        }
    }
}

pub(crate) enum NodeKind {
    Midi(MidiNode),
    Submix,
}

/// Where a node's output goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Parent {
    Detached,
    Master,
    Submix(StreamId),
}

pub(crate) struct Node {
    pub kind: NodeKind,
    pub parent: Parent,
    pub volume: f32,
}

#[derive(Default)]
struct Scratch {
    layer_l: Vec<f32>,
    layer_r: Vec<f32>,
    voice_l: Vec<f32>,
    voice_r: Vec<f32>,
    submix_l: Vec<f32>,
    submix_r: Vec<f32>,
}

impl Scratch {
    fn ensure(&mut self, frames: usize) {
        for buffer in [
            &mut self.layer_l,
            &mut self.layer_r,
            &mut self.voice_l,
            &mut self.voice_r,
            &mut self.submix_l,
            &mut self.submix_r,
        ] {
            if buffer.len() < frames {
                buffer.resize(frames, 0.0);
            }
        }
    }
}

/// The render-side mix tree. Nodes are indexed by `StreamId`; the master
/// mix is implicit.
pub(crate) struct MixGraph {
    pub nodes: Vec<Option<Node>>,
    pub master_volume: f32,
    pub font_volumes: HashMap<SoundfontId, f32>,
    events: Consumer<(StreamId, MidiEvent)>,
    scratch: Scratch,
    limiter_gain: f32,
}

impl MixGraph {
    pub fn new(events: Consumer<(StreamId, MidiEvent)>, max_frames: usize) -> Self {
        let mut scratch = Scratch::default();
        scratch.ensure(max_frames);
        Self {
            nodes: Vec::new(),
            master_volume: 1.0,
            font_volumes: HashMap::new(),
            events,
            scratch,
            limiter_gain: 1.0,
        }
    }

    pub fn node(&self, stream: StreamId) -> Option<&Node> {
        self.nodes.get(stream.0 as usize).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, stream: StreamId) -> Option<&mut Node> {
        self.nodes.get_mut(stream.0 as usize).and_then(Option::as_mut)
    }

    pub fn midi_mut(&mut self, stream: StreamId) -> Option<&mut MidiNode> {
        match self.node_mut(stream) {
            Some(Node {
                kind: NodeKind::Midi(midi),
                ..
            }) => Some(midi),
            _ => None,
        }
    }

    pub fn insert(&mut self, kind: NodeKind) -> StreamId {
        let node = Node {
            kind,
            parent: Parent::Detached,
            volume: 1.0,
        };
        match self.nodes.iter().position(Option::is_none) {
            Some(index) => {
                self.nodes[index] = Some(node);
                StreamId(index as u32)
            }
            None => {
                self.nodes.push(Some(node));
                StreamId(self.nodes.len() as u32 - 1)
            }
        }
    }

    pub fn remove(&mut self, stream: StreamId) {
        if let Some(slot) = self.nodes.get_mut(stream.0 as usize) {
            *slot = None;
        }
        for node in self.nodes.iter_mut().flatten() {
            if node.parent == Parent::Submix(stream) {
                node.parent = Parent::Detached;
            }
        }
    }

    /// Drops queued events and every node.
    pub fn clear(&mut self) {
        while self.events.pop().is_ok() {}
        self.nodes.clear();
    }

    fn drain_events(&mut self) {
        while let Ok((stream, event)) = self.events.pop() {
            if let Some(midi) = self.midi_mut(stream) {
                midi.apply(&event);
            }
        }
    }

    pub fn render(&mut self, out_l: &mut [f32], out_r: &mut [f32]) {
        let frames = out_l.len().min(out_r.len());
        out_l.fill(0.0);
        out_r.fill(0.0);

        self.drain_events();
        self.scratch.ensure(frames);

        let Self {
            nodes,
            scratch,
            font_volumes,
            ..
        } = self;

        for index in 0..nodes.len() {
            let (is_submix, volume) = match &nodes[index] {
                Some(node) if node.parent == Parent::Master => {
                    (matches!(node.kind, NodeKind::Submix), node.volume)
                }
                _ => continue,
            };

            if is_submix {
                let submix = StreamId(index as u32);
                scratch.submix_l[..frames].fill(0.0);
                scratch.submix_r[..frames].fill(0.0);
                for child in 0..nodes.len() {
                    let Some(Node {
                        kind: NodeKind::Midi(midi),
                        parent: Parent::Submix(parent),
                        volume: child_volume,
                    }) = &mut nodes[child]
                    else {
                        continue;
                    };
                    if *parent != submix {
                        continue;
                    }
                    render_midi(midi, scratch, font_volumes, frames);
                    mix_into(
                        &mut scratch.submix_l[..frames],
                        &scratch.voice_l[..frames],
                        *child_volume,
                    );
                    mix_into(
                        &mut scratch.submix_r[..frames],
                        &scratch.voice_r[..frames],
                        *child_volume,
                    );
                }
                mix_into(&mut out_l[..frames], &scratch.submix_l[..frames], volume);
                mix_into(&mut out_r[..frames], &scratch.submix_r[..frames], volume);
            } else if let Some(Node {
                kind: NodeKind::Midi(midi),
                ..
            }) = &mut nodes[index]
            {
                render_midi(midi, scratch, font_volumes, frames);
                mix_into(&mut out_l[..frames], &scratch.voice_l[..frames], volume);
                mix_into(&mut out_r[..frames], &scratch.voice_r[..frames], volume);
            }
        }

        // detached streams still advance so their voices release
        for node in nodes.iter_mut().flatten() {
            if node.parent != Parent::Detached {
                continue;
            }
            if let NodeKind::Midi(midi) = &mut node.kind {
                for layer in &mut midi.layers {
                    layer.synth.render(
                        &mut scratch.layer_l[..frames],
                        &mut scratch.layer_r[..frames],
                    );
                }
            }
        }

        self.finish(&mut out_l[..frames], &mut out_r[..frames]);
    }

    /// Master gain followed by a peak limiter.
    fn finish(&mut self, out_l: &mut [f32], out_r: &mut [f32]) {
        let master = self.master_volume;
        let mut peak = 0.0_f32;
        for (l, r) in out_l.iter_mut().zip(out_r.iter_mut()) {
            *l *= master;
            *r *= master;
            peak = peak.max(l.abs()).max(r.abs());
        }

        let target_gain = if peak > LIMIT { LIMIT / peak } else { 1.0 };
        let current_gain = self.limiter_gain;
        let coeff = if target_gain < current_gain { 0.25 } else { 0.01 };
        let new_gain = (current_gain + coeff * (target_gain - current_gain)).clamp(0.0, 1.0);
        self.limiter_gain = new_gain;

        if new_gain < 0.999 {
            for (l, r) in out_l.iter_mut().zip(out_r.iter_mut()) {
                *l *= new_gain;
                *r *= new_gain;
            }
        }
    }
}

fn render_midi(
    midi: &mut MidiNode,
    scratch: &mut Scratch,
    font_volumes: &HashMap<SoundfontId, f32>,
    frames: usize,
) {
    scratch.voice_l[..frames].fill(0.0);
    scratch.voice_r[..frames].fill(0.0);
    for layer in &mut midi.layers {
        let layer_l = &mut scratch.layer_l[..frames];
        let layer_r = &mut scratch.layer_r[..frames];
        layer.synth.render(layer_l, layer_r);
        let gain = font_volumes.get(&layer.font).copied().unwrap_or(1.0);
        mix_into(&mut scratch.voice_l[..frames], layer_l, gain);
        mix_into(&mut scratch.voice_r[..frames], layer_r, gain);
    }
}

fn mix_into(out: &mut [f32], input: &[f32], gain: f32) {
    for (o, i) in out.iter_mut().zip(input) {
        *o += i * gain;
    }
}

/// Handed to the audio output. Renders silence when the control side
/// holds the graph.
pub(crate) struct GraphRenderer {
    pub graph: Arc<Mutex<MixGraph>>,
}

impl AudioRenderCallback for GraphRenderer {
    fn render(&self, _sample_time_start: SampleTime, out_l: &mut [f32], out_r: &mut [f32]) {
        match self.graph.try_lock() {
            Some(mut graph) => graph.render(out_l, out_r),
            None => {
                out_l.fill(0.0);
                out_r.fill(0.0);
            }
        }
    }
}
