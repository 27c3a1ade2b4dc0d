pub mod audio;
pub mod midi;
pub mod sequencer;
pub mod settings;
pub mod types;

pub use audio::*;
pub use midi::*;
pub use sequencer::*;
pub use settings::*;
pub use types::*;
