pub mod meter;
pub mod sequencer;
pub mod song;
pub mod tempo;

pub use meter::*;
pub use sequencer::*;
pub use song::*;
pub use tempo::*;
