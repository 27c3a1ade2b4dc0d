use crate::channel::ChannelState;
use crate::error::EngineError;
use crate::instrument::is_bass_program;
use crate::ipc::Notification;
use crate::router::InstrumentRouter;
use crate::session::{Lock, SessionState, TRANSPOSE_LIMIT};
use cantabile_ports::midi::{
    cc, MidiEvent, MidiEventKind, MidiOutputConnection, CHANNEL_COUNT, PERCUSSION_CHANNEL,
};
use cantabile_ports::settings::EngineConfig;
use cantabile_ports::types::{OutputPort, Volume01};
use std::collections::{BTreeMap, VecDeque};

/// Channel-layer state shared by the sequencer thread and the UI thread.
/// Everything in here is guarded by the player's single mixer lock.
pub(crate) struct Mixer {
    pub(crate) channels: [ChannelState; CHANNEL_COUNT],
    pub(crate) session: SessionState,
    pub(crate) router: InstrumentRouter,
    pub(crate) output: OutputPort,
    pub(crate) master_volume: u8,
    use_solo: bool,
    outputs: BTreeMap<usize, Box<dyn MidiOutputConnection>>,
    notifications: VecDeque<Notification>,
    notification_capacity: usize,
}

impl Mixer {
    pub(crate) fn new(router: InstrumentRouter, config: &EngineConfig) -> Self {
        Self {
            channels: std::array::from_fn(|index| ChannelState::new(index as u8)),
            session: SessionState::default(),
            router,
            output: OutputPort::Internal,
            master_volume: config.master_volume.min(100),
            use_solo: false,
            outputs: BTreeMap::new(),
            notifications: VecDeque::new(),
            notification_capacity: config.notification_capacity.max(1),
        }
    }

    // ---- dispatch ------------------------------------------------------

    /// Controller and program changes always pass so downstream state stays
    /// in sync; everything else needs the channel to be enabled.
    pub(crate) fn send_event(&mut self, event: MidiEvent) {
        let index = event.channel as usize;
        if !event.kind.is_state_event() && !self.is_channel_enabled(index) {
            return;
        }

        match event.kind {
            MidiEventKind::Controller => {
                self.channels[index].apply_controller(event.data1, event.data2)
            }
            MidiEventKind::ProgramChange => self.channels[index].set_program(event.data1),
            _ => {}
        }

        let port = self.channels[index].output;
        self.deliver(event, port);
    }

    pub(crate) fn is_channel_enabled(&self, index: usize) -> bool {
        let channel = &self.channels[index];
        !channel.mute && (!self.use_solo || channel.solo)
    }

    pub(crate) fn is_any_channel_soloed(&self) -> bool {
        self.use_solo
    }

    /// Sends `event` to one destination after substitution and announces
    /// what actually went out.
    fn deliver(&mut self, event: MidiEvent, port: OutputPort) {
        match port {
            OutputPort::Internal => {
                let Some(outcome) = self.router.route(&event, &self.session) else {
                    return;
                };
                self.announce(Notification::Dispatched {
                    event: outcome.event,
                });
                if let (MidiEventKind::NoteOn, Some(voice)) = (outcome.event.kind, outcome.voice) {
                    if outcome.event.data2 > 0 {
                        self.announce(Notification::VoiceTriggered {
                            voice,
                            bus: outcome.bus,
                            channel: outcome.event.channel,
                            note: outcome.event.data1,
                            velocity: outcome.event.data2,
                        });
                    }
                }
            }
            OutputPort::External(index) => {
                if event.kind == MidiEventKind::ProgramChange {
                    self.router.track_program(event.channel, event.data1);
                }
                let Some(outgoing) = self.session.apply(&event) else {
                    return;
                };
                if self.send_external(index, &outgoing) {
                    self.announce(Notification::Dispatched { event: outgoing });
                }
            }
        }
    }

    fn send_external(&mut self, index: usize, event: &MidiEvent) -> bool {
        let Some(connection) = self.outputs.get_mut(&index) else {
            tracing::warn!(port = index, "midi output not open, event dropped");
            return false;
        };
        if let Err(err) = connection.send(event) {
            tracing::warn!(port = index, error = %err, "midi output send failed");
            return false;
        }
        true
    }

    /// Re-sends the cached program of `channel` through substitution, so a
    /// lock change takes effect on notes that follow.
    fn resync_program(&mut self, channel: u8) {
        let program = self.channels[channel as usize].program;
        let port = self.channels[channel as usize].output;
        self.deliver(MidiEvent::program_change(channel, program), port);
    }

    pub(crate) fn all_notes_off(&mut self, channel: u8) {
        match self.channels[channel as usize].output {
            OutputPort::Internal => self.router.send_all_notes_off(channel),
            OutputPort::External(index) => {
                self.send_external(index, &MidiEvent::all_notes_off(channel));
            }
        }
    }

    pub(crate) fn all_notes_off_everywhere(&mut self) {
        for channel in 0..CHANNEL_COUNT as u8 {
            self.all_notes_off(channel);
        }
    }

    // ---- channel setters -----------------------------------------------

    pub(crate) fn set_controller(&mut self, channel: u8, number: u8, value: i32) {
        let value = value.clamp(0, 127) as u8;
        self.send_event(MidiEvent::controller(channel, number, value));
    }

    /// Program changes from the user reach the internal synthesizer and
    /// every open external port, so switching ports keeps the timbre.
    pub(crate) fn set_instrument(&mut self, channel: u8, program: i32) {
        let program = program.clamp(0, 127) as u8;
        let event = MidiEvent::program_change(channel, program);
        self.channels[channel as usize].set_program(program);

        let routed = self.router.route(&event, &self.session);
        let outgoing = self.session.apply(&event);
        if let Some(outgoing) = outgoing {
            let ports: Vec<usize> = self.outputs.keys().copied().collect();
            for index in ports {
                self.send_external(index, &outgoing);
            }
        }
        if let Some(sent) = routed.map(|outcome| outcome.event).or(outgoing) {
            self.announce(Notification::Dispatched { event: sent });
        }
    }

    pub(crate) fn set_mute(&mut self, channel: u8, mute: bool) {
        let index = channel as usize;
        if self.channels[index].mute == mute {
            return;
        }
        self.channels[index].mute = mute;
        if mute {
            self.all_notes_off(channel);
        }
    }

    pub(crate) fn set_solo(&mut self, channel: u8, solo: bool, playing: bool) {
        let index = channel as usize;
        if self.channels[index].solo == solo {
            return;
        }
        self.channels[index].solo = solo;
        self.use_solo = self.channels.iter().any(|c| c.solo);

        if self.use_solo && playing {
            for other in 0..CHANNEL_COUNT as u8 {
                if !self.channels[other as usize].solo {
                    self.all_notes_off(other);
                }
            }
        }
    }

    /// Returns false when the request is a no-op.
    pub(crate) fn set_transpose(&mut self, semitones: i32, playing: bool) -> bool {
        let limit = TRANSPOSE_LIMIT as i32;
        let target = semitones.clamp(-limit, limit) as i8;
        if target == self.session.transpose {
            return false;
        }
        self.session.transpose = target;

        if playing {
            for channel in 0..CHANNEL_COUNT as u8 {
                if channel != PERCUSSION_CHANNEL {
                    self.all_notes_off(channel);
                }
            }
        }
        true
    }

    // ---- lock overrides ------------------------------------------------

    pub(crate) fn set_lock_drum(&mut self, enabled: bool, program: i32, sounding: bool) -> Result<(), EngineError> {
        if !(0..=127).contains(&program) {
            return Err(EngineError::validation(format!("drum program {program} out of range")));
        }
        let was_enabled = self.session.locks.drum.enabled;
        self.session.locks.drum = Lock {
            enabled,
            value: program as u8,
        };

        if sounding && (enabled || was_enabled) {
            self.resync_program(PERCUSSION_CHANNEL);
        }
        Ok(())
    }

    pub(crate) fn set_lock_snare(&mut self, enabled: bool, note: i32, playing: bool) -> Result<(), EngineError> {
        if !(note == 38 || note == 40) {
            return Err(EngineError::validation(format!("snare note {note} is not 38 or 40")));
        }
        self.session.locks.snare = Lock {
            enabled,
            value: note as u8,
        };

        if playing {
            self.all_notes_off(PERCUSSION_CHANNEL);
        }
        Ok(())
    }

    pub(crate) fn set_lock_bass(&mut self, enabled: bool, program: i32, sounding: bool) -> Result<(), EngineError> {
        if !(0..=127).contains(&program) || !is_bass_program(program as u8) {
            return Err(EngineError::validation(format!("bass program {program} outside 32..=39")));
        }
        let was_enabled = self.session.locks.bass.enabled;
        self.session.locks.bass = Lock {
            enabled,
            value: program as u8,
        };

        if sounding && (enabled || was_enabled) {
            for channel in 0..CHANNEL_COUNT as u8 {
                if is_bass_program(self.channels[channel as usize].program) {
                    self.resync_program(channel);
                }
            }
        }
        Ok(())
    }

    // ---- destinations --------------------------------------------------

    pub(crate) fn has_output(&self, index: usize) -> bool {
        self.outputs.contains_key(&index)
    }

    pub(crate) fn insert_output(&mut self, index: usize, mut connection: Box<dyn MidiOutputConnection>) {
        connection.set_volume(Volume01::from_percent(self.master_volume));
        if let Some(previous) = self.outputs.insert(index, connection) {
            previous.close();
        }
    }

    /// Silences every channel, then moves the channels that followed the
    /// previous destination onto `port`.
    pub(crate) fn retarget(&mut self, port: OutputPort) {
        self.all_notes_off_everywhere();

        let previous = std::mem::replace(&mut self.output, port);
        for channel in self.channels.iter_mut() {
            if channel.output == previous {
                channel.output = port;
            }
        }
        self.announce(Notification::OutputPortChanged { port });
    }

    pub(crate) fn set_channel_output(&mut self, channel: u8, port: OutputPort) {
        if self.channels[channel as usize].output == port {
            return;
        }
        self.all_notes_off(channel);
        self.channels[channel as usize].output = port;

        if port == OutputPort::Internal {
            let program = self.channels[channel as usize].program;
            self.router.track_program(channel, program);
        }
        self.resync_program(channel);
    }

    pub(crate) fn set_master_volume(&mut self, volume: i32) {
        self.master_volume = volume.clamp(0, 100) as u8;
        let volume = Volume01::from_percent(self.master_volume);
        self.router.set_master_volume(volume);
        for connection in self.outputs.values_mut() {
            connection.set_volume(volume);
        }
    }

    pub(crate) fn close_outputs(&mut self) {
        for (_, connection) in std::mem::take(&mut self.outputs) {
            connection.close();
        }
    }

    // ---- song lifecycle ------------------------------------------------

    /// Channel state back to defaults for a new song; locks and output
    /// selection belong to the session and stay.
    pub(crate) fn reset_for_load(&mut self) {
        for channel in self.channels.iter_mut() {
            channel.reset();
        }
        self.use_solo = false;
        self.session.transpose = 0;
        self.router.reset_channels();

        for channel in 0..CHANNEL_COUNT as u8 {
            match self.channels[channel as usize].output {
                OutputPort::Internal => self.router.send_reset_all_controllers(channel),
                OutputPort::External(index) => {
                    let reset = MidiEvent::controller(channel, cc::RESET_ALL_CONTROLLERS, 0);
                    self.send_external(index, &reset);
                }
            }
        }
        self.announce(Notification::Loaded);
    }

    // ---- notifications -------------------------------------------------

    pub(crate) fn announce(&mut self, notification: Notification) {
        if self.notifications.len() >= self.notification_capacity {
            self.notifications.pop_front();
        }
        self.notifications.push_back(notification);
    }

    pub(crate) fn drain_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }
}
