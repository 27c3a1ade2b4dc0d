use cantabile_ports::audio::AudioError;
use cantabile_ports::midi::MidiError;
use cantabile_ports::sequencer::SequencerError;

/// Failure kinds surfaced by the router and the player. None of them is
/// retried; the state in place before the call is kept.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("load failed: {0}")]
    Load(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("invalid parameter: {0}")]
    Validation(String),
}

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::debug!(%message, "rejected parameter");
        EngineError::Validation(message)
    }
}

impl From<SequencerError> for EngineError {
    fn from(err: SequencerError) -> Self {
        EngineError::Load(err.to_string())
    }
}

impl From<AudioError> for EngineError {
    fn from(err: AudioError) -> Self {
        EngineError::Device(err.to_string())
    }
}

impl From<MidiError> for EngineError {
    fn from(err: MidiError) -> Self {
        EngineError::Device(err.to_string())
    }
}
