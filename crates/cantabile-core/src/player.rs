use crate::channel::ChannelState;
use crate::dispatch::Mixer;
use crate::error::EngineError;
use crate::ipc::Notification;
use crate::router::InstrumentRouter;
use crate::session::LockOverrides;
use cantabile_ports::audio::AudioBackend;
use cantabile_ports::midi::{cc, MidiEvent, MidiOutputPort, CHANNEL_COUNT};
use cantabile_ports::sequencer::{Sequencer, SequencerSink, SequencerState, SongSource};
use cantabile_ports::settings::EngineConfig;
use cantabile_ports::types::{AudioOutputDevice, MidiOutputDevice, OutputPort, Tick};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct PlayerShared {
    active: AtomicUsize,
    mixer: Mutex<Mixer>,
}

/// Sink handed to one sequencer slot. Output of a slot that is not the
/// active one is dropped.
struct SequencerLink {
    index: usize,
    shared: Arc<PlayerShared>,
}

impl SequencerLink {
    fn lock_if_active(&self) -> Option<MutexGuard<'_, Mixer>> {
        let mixer = self.shared.mixer.lock();
        (self.shared.active.load(Ordering::Acquire) == self.index).then_some(mixer)
    }
}

impl SequencerSink for SequencerLink {
    fn on_event(&self, event: MidiEvent) {
        if let Some(mut mixer) = self.lock_if_active() {
            mixer.send_event(event);
        }
    }

    fn on_tempo_changed(&self, bpm: u32) {
        if let Some(mut mixer) = self.lock_if_active() {
            mixer.announce(Notification::TempoChanged { bpm });
        }
    }

    fn on_finished(&self) {
        if let Some(mut mixer) = self.lock_if_active() {
            mixer.all_notes_off_everywhere();
            mixer.announce(Notification::SequencerFinished);
            tracing::info!(slot = self.index, "song finished");
        }
    }
}

/// Playback controller: owns two sequencer slots (one active, one for
/// preloading the next song), the channel-layer mixer and the output
/// destinations.
///
/// Locking: a sequencer slot lock is never taken while the mixer lock is
/// held, since stopping a sequencer waits for its thread, which may be
/// blocked on the mixer.
pub struct MidiPlayer {
    shared: Arc<PlayerShared>,
    sequencers: [Mutex<Box<dyn Sequencer>>; 2],
    preloaded: AtomicBool,
    midi_port: Box<dyn MidiOutputPort>,
}

impl MidiPlayer {
    pub fn new(
        config: &EngineConfig,
        sequencers: [Box<dyn Sequencer>; 2],
        backend: Box<dyn AudioBackend>,
        midi_port: Box<dyn MidiOutputPort>,
    ) -> Self {
        let router = InstrumentRouter::new(backend, config);
        let [first, second] = sequencers;
        Self {
            shared: Arc::new(PlayerShared {
                active: AtomicUsize::new(0),
                mixer: Mutex::new(Mixer::new(router, config)),
            }),
            sequencers: [Mutex::new(first), Mutex::new(second)],
            preloaded: AtomicBool::new(false),
            midi_port,
        }
    }

    fn active_index(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    fn with_sequencer<T>(&self, f: impl FnOnce(&mut dyn Sequencer) -> T) -> T {
        let mut sequencer = self.sequencers[self.active_index()].lock();
        f(sequencer.as_mut())
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.shared.mixer.lock()
    }

    fn check_channel(channel: u8) -> Result<(), EngineError> {
        if (channel as usize) < CHANNEL_COUNT {
            Ok(())
        } else {
            Err(EngineError::validation(format!("channel {channel} out of range")))
        }
    }

    // ---- song & transport ----------------------------------------------

    pub fn state(&self) -> SequencerState {
        self.with_sequencer(|sequencer| sequencer.state())
    }

    pub fn is_playing(&self) -> bool {
        self.state() == SequencerState::Playing
    }

    /// Playing or paused: a song position is live and notes may be held.
    fn is_sounding(&self) -> bool {
        matches!(self.state(), SequencerState::Playing | SequencerState::Paused)
    }

    pub fn load(&self, source: &SongSource) -> Result<(), EngineError> {
        if self.state() != SequencerState::Stopped {
            self.stop(true);
        }
        self.with_sequencer(|sequencer| sequencer.load(source))?;
        self.mixer().reset_for_load();
        tracing::info!(slot = self.active_index(), "song loaded");
        Ok(())
    }

    /// Loads a song into the idle slot without touching playback.
    pub fn preload(&self, source: &SongSource) -> Result<(), EngineError> {
        let idle = 1 - self.active_index();
        let mut sequencer = self.sequencers[idle].lock();
        if sequencer.state() != SequencerState::Stopped {
            sequencer.stop(true);
        }
        self.preloaded.store(false, Ordering::Release);
        sequencer.load(source)?;
        self.preloaded.store(true, Ordering::Release);
        tracing::debug!(slot = idle, "song preloaded");
        Ok(())
    }

    pub fn has_preloaded(&self) -> bool {
        self.preloaded.load(Ordering::Acquire)
    }

    /// Stops the current song and makes the preloaded one current.
    pub fn switch_to_preloaded(&self) -> Result<(), EngineError> {
        if !self.preloaded.swap(false, Ordering::AcqRel) {
            return Err(EngineError::Load("no song preloaded".to_string()));
        }
        self.with_sequencer(|sequencer| sequencer.stop(true));

        let next = 1 - self.active_index();
        let mut mixer = self.mixer();
        mixer.all_notes_off_everywhere();
        self.shared.active.store(next, Ordering::Release);
        mixer.reset_for_load();
        tracing::info!(slot = next, "switched to preloaded song");
        Ok(())
    }

    pub fn play(&self) -> Result<(), EngineError> {
        let link = Arc::new(SequencerLink {
            index: self.active_index(),
            shared: self.shared.clone(),
        });
        self.with_sequencer(|sequencer| sequencer.start(link))?;
        Ok(())
    }

    pub fn pause(&self) {
        self.with_sequencer(|sequencer| sequencer.pause());
        self.mixer().all_notes_off_everywhere();
    }

    pub fn stop(&self, reset_position: bool) {
        if self.state() == SequencerState::Stopped {
            return;
        }
        self.with_sequencer(|sequencer| sequencer.stop(reset_position));
        self.mixer().all_notes_off_everywhere();
    }

    pub fn duration_ms(&self) -> u64 {
        self.with_sequencer(|sequencer| sequencer.duration_ms())
    }

    pub fn position_ms(&self) -> u64 {
        self.with_sequencer(|sequencer| sequencer.position_ms())
    }

    pub fn duration_tick(&self) -> Tick {
        self.with_sequencer(|sequencer| sequencer.duration_tick())
    }

    pub fn position_tick(&self) -> Tick {
        self.with_sequencer(|sequencer| sequencer.position_tick())
    }

    /// Seeks; held notes are released so nothing hangs across the jump.
    pub fn set_position_tick(&self, tick: Tick) {
        self.with_sequencer(|sequencer| sequencer.set_position_tick(tick));
        self.mixer().all_notes_off_everywhere();
    }

    pub fn current_beat(&self) -> u64 {
        self.with_sequencer(|sequencer| sequencer.current_beat())
    }

    pub fn beat_count(&self) -> u64 {
        self.with_sequencer(|sequencer| sequencer.beat_count())
    }

    pub fn bpm_speed(&self) -> i32 {
        self.with_sequencer(|sequencer| sequencer.bpm_speed())
    }

    pub fn set_bpm_speed(&self, speed: i32) {
        self.with_sequencer(|sequencer| sequencer.set_bpm_speed(speed));
    }

    pub fn current_bpm(&self) -> u32 {
        self.with_sequencer(|sequencer| sequencer.current_bpm())
    }

    // ---- outputs -------------------------------------------------------

    pub fn midi_output_devices(&self) -> Result<Vec<MidiOutputDevice>, EngineError> {
        Ok(self.midi_port.list_outputs()?)
    }

    pub fn audio_output_devices(&self) -> Result<Vec<AudioOutputDevice>, EngineError> {
        self.mixer().router.list_devices()
    }

    pub fn output_port(&self) -> OutputPort {
        self.mixer().output
    }

    /// Opens `port` if it is not open yet. Device enumeration and the
    /// connection handshake for external ports run without the mixer lock.
    fn open_destination(&self, port: OutputPort) -> Result<(), EngineError> {
        let index = match port {
            OutputPort::Internal => return self.mixer().router.open(),
            OutputPort::External(index) => index,
        };
        if self.mixer().has_output(index) {
            return Ok(());
        }

        let count = self.midi_port.list_outputs()?.len();
        if index >= count {
            return Err(EngineError::validation(format!(
                "midi output {index} does not exist ({count} available)"
            )));
        }
        let connection = self.midi_port.open_output(index)?;

        let mut mixer = self.mixer();
        if mixer.has_output(index) {
            // Another caller opened the same port meanwhile.
            drop(mixer);
            connection.close();
            return Ok(());
        }
        mixer.insert_output(index, connection);
        tracing::info!(port = index, "midi output opened");
        Ok(())
    }

    /// Moves every channel that follows the current destination to `port`.
    /// The new destination is opened first; on failure routing is left as
    /// it was. Playback keeps running.
    pub fn set_output_port(&self, port: OutputPort) -> Result<(), EngineError> {
        self.open_destination(port)?;
        let mut mixer = self.mixer();
        if mixer.output == port {
            return Ok(());
        }
        mixer.retarget(port);
        tracing::info!(%port, "output port changed");
        Ok(())
    }

    /// Sends one channel to its own destination.
    pub fn set_channel_output(&self, channel: u8, port: OutputPort) -> Result<(), EngineError> {
        Self::check_channel(channel)?;
        self.open_destination(port)?;
        self.mixer().set_channel_output(channel, port);
        Ok(())
    }

    /// Closes the internal synthesizer and every external connection.
    pub fn shutdown(&self) {
        self.stop(false);
        let mut mixer = self.mixer();
        mixer.router.close(true);
        mixer.close_outputs();
    }

    // ---- channel layer -------------------------------------------------

    /// Dispatches a user-originated event through the same gating as song
    /// events.
    pub fn send_event(&self, event: MidiEvent) -> Result<(), EngineError> {
        Self::check_channel(event.channel)?;
        self.mixer().send_event(event);
        Ok(())
    }

    pub fn channel(&self, channel: u8) -> Result<ChannelState, EngineError> {
        Self::check_channel(channel)?;
        Ok(self.mixer().channels[channel as usize])
    }

    pub fn channels(&self) -> Vec<ChannelState> {
        self.mixer().channels.to_vec()
    }

    pub fn set_channel_volume(&self, channel: u8, volume: i32) -> Result<(), EngineError> {
        self.set_controller(channel, cc::VOLUME, volume)
    }

    pub fn set_channel_pan(&self, channel: u8, pan: i32) -> Result<(), EngineError> {
        self.set_controller(channel, cc::PAN, pan)
    }

    pub fn set_channel_reverb(&self, channel: u8, reverb: i32) -> Result<(), EngineError> {
        self.set_controller(channel, cc::REVERB, reverb)
    }

    pub fn set_channel_chorus(&self, channel: u8, chorus: i32) -> Result<(), EngineError> {
        self.set_controller(channel, cc::CHORUS, chorus)
    }

    fn set_controller(&self, channel: u8, number: u8, value: i32) -> Result<(), EngineError> {
        Self::check_channel(channel)?;
        self.mixer().set_controller(channel, number, value);
        Ok(())
    }

    pub fn set_instrument(&self, channel: u8, program: i32) -> Result<(), EngineError> {
        Self::check_channel(channel)?;
        self.mixer().set_instrument(channel, program);
        Ok(())
    }

    pub fn set_mute(&self, channel: u8, mute: bool) -> Result<(), EngineError> {
        Self::check_channel(channel)?;
        self.mixer().set_mute(channel, mute);
        Ok(())
    }

    pub fn set_solo(&self, channel: u8, solo: bool) -> Result<(), EngineError> {
        Self::check_channel(channel)?;
        let playing = self.is_playing();
        self.mixer().set_solo(channel, solo, playing);
        Ok(())
    }

    pub fn is_any_channel_soloed(&self) -> bool {
        self.mixer().is_any_channel_soloed()
    }

    // ---- performance overrides -----------------------------------------

    pub fn transpose(&self) -> i8 {
        self.mixer().session.transpose
    }

    /// Clamps to one octave either way. Returns whether the value changed.
    pub fn set_transpose(&self, semitones: i32) -> bool {
        let playing = self.is_playing();
        self.mixer().set_transpose(semitones, playing)
    }

    pub fn locks(&self) -> LockOverrides {
        self.mixer().session.locks
    }

    pub fn set_lock_drum(&self, enabled: bool, program: i32) -> Result<(), EngineError> {
        let sounding = self.is_sounding();
        self.mixer().set_lock_drum(enabled, program, sounding)
    }

    pub fn set_lock_snare(&self, enabled: bool, note: i32) -> Result<(), EngineError> {
        let playing = self.is_playing();
        self.mixer().set_lock_snare(enabled, note, playing)
    }

    pub fn set_lock_bass(&self, enabled: bool, program: i32) -> Result<(), EngineError> {
        let sounding = self.is_sounding();
        self.mixer().set_lock_bass(enabled, program, sounding)
    }

    // ---- instrument layer ----------------------------------------------

    pub fn master_volume(&self) -> u8 {
        self.mixer().master_volume
    }

    pub fn set_master_volume(&self, volume: i32) {
        self.mixer().set_master_volume(volume);
    }

    /// Runs `f` against the instrument router under the mixer lock.
    pub fn with_router<T>(&self, f: impl FnOnce(&mut InstrumentRouter) -> T) -> T {
        f(&mut self.mixer().router)
    }

    pub fn drain_notifications(&self) -> Vec<Notification> {
        self.mixer().drain_notifications()
    }
}

impl Drop for MidiPlayer {
    fn drop(&mut self) {
        for slot in &self.sequencers {
            let mut sequencer = slot.lock();
            if sequencer.state() != SequencerState::Stopped {
                sequencer.stop(false);
            }
        }
    }
}
