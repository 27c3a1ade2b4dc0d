use crate::song::{Song, SongEvent};
use crate::tempo::{bpm_of, scaled_us_per_quarter, ticks_to_us, us_to_ticks};
use cantabile_ports::midi::MidiEvent;
use cantabile_ports::sequencer::{
    Sequencer, SequencerError, SequencerSink, SequencerState, SongSource,
};
use cantabile_ports::types::Tick;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

struct Control {
    song: Option<Arc<Song>>,
    state: SequencerState,
    /// Index of the next event to play.
    cursor: usize,
    /// Song position while not playing; the anchor tick while playing.
    position: Tick,
    /// Wall-clock instant that corresponds to `position` while playing.
    anchor: Instant,
    us_per_quarter: u32,
    bpm_speed: i32,
    chase_pending: bool,
    sink: Option<Arc<dyn SequencerSink>>,
}

impl Control {
    fn effective_us_per_quarter(&self) -> u32 {
        scaled_us_per_quarter(self.us_per_quarter, self.bpm_speed)
    }

    fn ppq(&self) -> u16 {
        self.song.as_ref().map(|song| song.ppq).unwrap_or(480)
    }

    fn end_tick(&self) -> Tick {
        self.song.as_ref().map(|song| song.end_tick).unwrap_or(0)
    }

    fn current_tick(&self, now: Instant) -> Tick {
        if self.state != SequencerState::Playing {
            return self.position;
        }
        let elapsed = now.saturating_duration_since(self.anchor).as_micros() as i64;
        let advanced = us_to_ticks(elapsed, self.effective_us_per_quarter(), self.ppq());
        (self.position + advanced).min(self.end_tick())
    }

    fn deadline_of(&self, tick: Tick) -> Instant {
        let delta = ticks_to_us(tick - self.position, self.effective_us_per_quarter(), self.ppq());
        self.anchor + Duration::from_micros(delta.max(0) as u64)
    }

    /// Re-bases the anchor on the current position so later deadlines use
    /// the new tempo from here on.
    fn reanchor(&mut self) {
        let now = Instant::now();
        self.position = self.current_tick(now);
        self.anchor = now;
    }

    fn rewind(&mut self) {
        self.position = 0;
        self.cursor = 0;
        self.chase_pending = false;
        self.us_per_quarter = self
            .song
            .as_ref()
            .map(|song| song.tempo_map.us_per_quarter_at(0))
            .unwrap_or(crate::tempo::DEFAULT_US_PER_QUARTER);
    }
}

struct Shared {
    control: Mutex<Control>,
    wake: Condvar,
}

/// Plays a decoded MIDI file on its own thread. Events are handed to the
/// sink when their wall-clock deadline passes; the thread sleeps on a
/// condition variable in between so pause, stop, seek and speed changes
/// take effect immediately.
pub struct SmfSequencer {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl Default for SmfSequencer {
    fn default() -> Self {
        Self::new()
    }
}

impl SmfSequencer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                control: Mutex::new(Control {
                    song: None,
                    state: SequencerState::Stopped,
                    cursor: 0,
                    position: 0,
                    anchor: Instant::now(),
                    us_per_quarter: crate::tempo::DEFAULT_US_PER_QUARTER,
                    bpm_speed: 0,
                    chase_pending: false,
                    sink: None,
                }),
                wake: Condvar::new(),
            }),
            worker: None,
        }
    }

    fn control(&self) -> MutexGuard<'_, Control> {
        self.shared.control.lock()
    }

    fn halt(&mut self, state: SequencerState) {
        {
            let mut control = self.control();
            if control.state == SequencerState::Playing {
                control.position = control.current_tick(Instant::now());
            }
            control.state = state;
        }
        self.shared.wake.notify_all();
        self.join_worker();
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::warn!("sequencer thread panicked");
            }
        }
    }
}

impl Sequencer for SmfSequencer {
    fn load(&mut self, source: &SongSource) -> Result<(), SequencerError> {
        let song = Song::load(source)?;
        self.halt(SequencerState::Stopped);

        let mut control = self.control();
        tracing::debug!(
            events = song.events.len(),
            ppq = song.ppq,
            end_tick = song.end_tick,
            "song decoded"
        );
        control.song = Some(Arc::new(song));
        control.sink = None;
        control.rewind();
        Ok(())
    }

    fn start(&mut self, sink: Arc<dyn SequencerSink>) -> Result<(), SequencerError> {
        {
            let control = self.control();
            if control.song.is_none() {
                return Err(SequencerError::NotLoaded);
            }
            if control.state == SequencerState::Playing {
                return Ok(());
            }
        }
        // a finished thread may still be on its way out
        self.join_worker();

        {
            let mut control = self.control();
            if control.state == SequencerState::Finished {
                control.rewind();
            }
            control.sink = Some(sink);
            control.state = SequencerState::Playing;
            control.anchor = Instant::now();
        }

        let shared = self.shared.clone();
        let worker = std::thread::Builder::new()
            .name("cantabile-sequencer".to_string())
            .spawn(move || run(shared))
            .map_err(|e| SequencerError::Io(e.to_string()))?;
        self.worker = Some(worker);
        Ok(())
    }

    fn pause(&mut self) {
        if self.state() == SequencerState::Playing {
            self.halt(SequencerState::Paused);
        }
    }

    fn stop(&mut self, reset_position: bool) {
        self.halt(SequencerState::Stopped);
        if reset_position {
            self.control().rewind();
        }
    }

    fn state(&self) -> SequencerState {
        self.control().state
    }

    fn duration_ms(&self) -> u64 {
        let control = self.control();
        control
            .song
            .as_ref()
            .map(|song| (song.duration_us() / 1_000).max(0) as u64)
            .unwrap_or(0)
    }

    fn position_ms(&self) -> u64 {
        let control = self.control();
        let tick = control.current_tick(Instant::now());
        control
            .song
            .as_ref()
            .map(|song| (song.tempo_map.tick_to_micros(tick) / 1_000).max(0) as u64)
            .unwrap_or(0)
    }

    fn duration_tick(&self) -> Tick {
        self.control().end_tick()
    }

    fn position_tick(&self) -> Tick {
        self.control().current_tick(Instant::now())
    }

    fn set_position_tick(&mut self, tick: Tick) {
        {
            let mut control = self.control();
            let Some(song) = control.song.clone() else {
                return;
            };
            let tick = tick.clamp(0, song.end_tick);
            control.position = tick;
            control.anchor = Instant::now();
            control.cursor = song.cursor_at(tick);
            control.us_per_quarter = song.tempo_map.us_per_quarter_at(tick);
            control.chase_pending = true;
            if control.state == SequencerState::Finished {
                control.state = SequencerState::Stopped;
            }
        }
        self.shared.wake.notify_all();
    }

    fn current_beat(&self) -> u64 {
        let control = self.control();
        let Some(song) = control.song.as_ref() else {
            return 0;
        };
        let beat = song.meter.beat_at(control.current_tick(Instant::now()));
        beat.min(song.beat_count().saturating_sub(1))
    }

    fn beat_count(&self) -> u64 {
        self.control()
            .song
            .as_ref()
            .map(|song| song.beat_count())
            .unwrap_or(0)
    }

    fn bpm_speed(&self) -> i32 {
        self.control().bpm_speed
    }

    fn set_bpm_speed(&mut self, speed: i32) {
        {
            let mut control = self.control();
            control.reanchor();
            control.bpm_speed = speed;
        }
        self.shared.wake.notify_all();
    }

    fn current_bpm(&self) -> u32 {
        let control = self.control();
        bpm_of(control.effective_us_per_quarter())
    }
}

impl Drop for SmfSequencer {
    fn drop(&mut self) {
        self.halt(SequencerState::Stopped);
    }
}

enum Step {
    Emit(Arc<dyn SequencerSink>, Vec<MidiEvent>, Option<u32>),
    Finish(Arc<dyn SequencerSink>),
    Exit,
}

fn run(shared: Arc<Shared>) {
    loop {
        match next_step(&shared) {
            Step::Emit(sink, events, tempo) => {
                if let Some(bpm) = tempo {
                    sink.on_tempo_changed(bpm);
                }
                for event in events {
                    sink.on_event(event);
                }
            }
            Step::Finish(sink) => {
                sink.on_finished();
                return;
            }
            Step::Exit => return,
        }
    }
}

/// Waits for the next due event(s) and takes them off the song. Sink calls
/// happen outside the lock.
fn next_step(shared: &Shared) -> Step {
    let mut control = shared.control.lock();
    loop {
        if control.state != SequencerState::Playing {
            return Step::Exit;
        }
        let (Some(song), Some(sink)) = (control.song.clone(), control.sink.clone()) else {
            return Step::Exit;
        };

        if control.chase_pending {
            control.chase_pending = false;
            let tempo = (!song.fixed_tempo).then(|| bpm_of(control.effective_us_per_quarter()));
            return Step::Emit(sink, song.chase(control.cursor), tempo);
        }

        let Some(next) = song.events.get(control.cursor).copied() else {
            let end = control.deadline_of(song.end_tick);
            if Instant::now() < end {
                let _ = shared.wake.wait_until(&mut control, end);
                continue;
            }
            control.position = song.end_tick;
            control.state = SequencerState::Finished;
            tracing::debug!("sequencer reached end of song");
            return Step::Finish(sink);
        };

        let deadline = control.deadline_of(next.tick);
        if Instant::now() < deadline {
            // woken early: re-check everything, the control may have changed
            let _ = shared.wake.wait_until(&mut control, deadline);
            continue;
        }

        control.cursor += 1;
        control.position = next.tick;
        control.anchor = deadline;
        match next.event {
            SongEvent::Midi(event) => return Step::Emit(sink, vec![event], None),
            SongEvent::Tempo(us_per_quarter) => {
                control.us_per_quarter = us_per_quarter;
                let bpm = bpm_of(control.effective_us_per_quarter());
                return Step::Emit(sink, Vec::new(), Some(bpm));
            }
        }
    }
}
