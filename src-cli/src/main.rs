//! Cantabile - command-line MIDI player
//!
//! Plays a Standard MIDI File through the built-in soundfont synthesizer or
//! an external MIDI output port.
//!
//! # Usage
//!
//! ```bash
//! cantabile song.mid --soundfont general.sf2
//! cantabile song.mid --midi-out 1
//! cantabile song.mid --transpose -2 --lock-bass 33 --mute 9
//! cantabile --list-ports
//! ```

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::Parser;

use cantabile_core::{load_config, MidiPlayer, Notification};
use cantabile_domain_song::SmfSequencer;
use cantabile_infra_audio_cpal::CpalAudioOutputPort;
use cantabile_infra_midi_midir::MidirMidiOutputPort;
use cantabile_infra_synth_rustysynth::RustySynthBackend;
use cantabile_ports::sequencer::{Sequencer, SequencerState, SongSource};
use cantabile_ports::types::OutputPort;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "cantabile")]
#[command(author, version, about = "Real-time MIDI file player with channel routing")]
struct Args {
    /// MIDI file to play
    song: Option<PathBuf>,

    /// Engine configuration file (JSON)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Soundfont for the internal synthesizer; repeat to stack fonts
    #[arg(long, short = 's')]
    soundfont: Vec<PathBuf>,

    /// Send every channel to this external MIDI output instead of the synthesizer
    #[arg(long, short = 'o')]
    midi_out: Option<usize>,

    /// List MIDI and audio outputs and exit
    #[arg(long)]
    list_ports: bool,

    /// Transpose in semitones (-12..12)
    #[arg(long, short = 't', default_value = "0", allow_hyphen_values = true)]
    transpose: i32,

    /// Tempo offset in BPM added to the song tempo
    #[arg(long, default_value = "0", allow_hyphen_values = true)]
    speed: i32,

    /// Master volume (0-100)
    #[arg(long)]
    volume: Option<i32>,

    /// Mute a channel (0-15); repeatable
    #[arg(long)]
    mute: Vec<u8>,

    /// Solo a channel (0-15); repeatable
    #[arg(long)]
    solo: Vec<u8>,

    /// Force every drum kit change to this program
    #[arg(long)]
    lock_drum: Option<i32>,

    /// Replace both snare notes with this one (38 or 40)
    #[arg(long)]
    lock_snare: Option<i32>,

    /// Force bass program changes to this program (32-39)
    #[arg(long)]
    lock_bass: Option<i32>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => Default::default(),
    };
    if !args.soundfont.is_empty() {
        config.soundfonts = args.soundfont.clone();
    }

    let sequencers: [Box<dyn Sequencer>; 2] =
        [Box::new(SmfSequencer::new()), Box::new(SmfSequencer::new())];
    let backend = RustySynthBackend::new(
        Box::new(CpalAudioOutputPort::new()),
        config.synth_master_gain,
    );
    let midi_port = MidirMidiOutputPort::new(config.midi_client_name.clone());
    let player = MidiPlayer::new(&config, sequencers, Box::new(backend), Box::new(midi_port));

    if args.list_ports {
        list_ports(&player)?;
        return Ok(());
    }

    let Some(song) = args.song.clone() else {
        bail!("no MIDI file given (see --help)");
    };

    let port = match args.midi_out {
        Some(index) => OutputPort::External(index),
        None => OutputPort::Internal,
    };
    player
        .set_output_port(port)
        .with_context(|| format!("opening output {port}"))?;

    player
        .load(&SongSource::File(song.clone()))
        .with_context(|| format!("loading {}", song.display()))?;
    apply_overrides(&player, &args)?;

    tracing::info!(
        song = %song.display(),
        duration_ms = player.duration_ms(),
        bpm = player.current_bpm(),
        output = %port,
        "playing"
    );
    player.play()?;

    let result = run_until_finished(&player);
    player.shutdown();
    result
}

fn list_ports(player: &MidiPlayer) -> Result<()> {
    println!("MIDI outputs:");
    for device in player.midi_output_devices()? {
        println!("  {}: {}", device.index, device.name);
    }
    println!("Audio outputs:");
    for device in player.audio_output_devices()? {
        println!(
            "  {} ({} Hz, {} ch)",
            device.name, device.default_config.sample_rate_hz, device.default_config.channels
        );
    }
    Ok(())
}

/// Session overrides survive the load, so they are applied after it.
fn apply_overrides(player: &MidiPlayer, args: &Args) -> Result<()> {
    if let Some(volume) = args.volume {
        player.set_master_volume(volume);
    }
    if args.transpose != 0 && !player.set_transpose(args.transpose) {
        tracing::warn!(semitones = args.transpose, "transpose not applied");
    }
    if args.speed != 0 {
        player.set_bpm_speed(args.speed);
    }
    for &channel in &args.mute {
        player.set_mute(channel, true)?;
    }
    for &channel in &args.solo {
        player.set_solo(channel, true)?;
    }
    if let Some(program) = args.lock_drum {
        player.set_lock_drum(true, program)?;
    }
    if let Some(note) = args.lock_snare {
        player.set_lock_snare(true, note)?;
    }
    if let Some(program) = args.lock_bass {
        player.set_lock_bass(true, program)?;
    }
    Ok(())
}

fn run_until_finished(player: &MidiPlayer) -> Result<()> {
    let mut last_status = Instant::now();
    loop {
        for notification in player.drain_notifications() {
            match notification {
                Notification::TempoChanged { bpm } => tracing::info!(bpm, "tempo"),
                Notification::SequencerFinished => {
                    tracing::info!("finished");
                    return Ok(());
                }
                Notification::OutputPortChanged { port } => {
                    tracing::info!(%port, "output port changed")
                }
                _ => {}
            }
        }

        if player.state() == SequencerState::Stopped {
            bail!("playback stopped unexpectedly");
        }
        if last_status.elapsed() >= STATUS_INTERVAL {
            tracing::debug!(
                position_ms = player.position_ms(),
                duration_ms = player.duration_ms(),
                beat = player.current_beat(),
                beats = player.beat_count(),
                "position"
            );
            last_status = Instant::now();
        }
        thread::sleep(POLL_INTERVAL);
    }
}
