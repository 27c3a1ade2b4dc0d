pub mod channel;
pub mod config;
mod dispatch;
pub mod effects;
pub mod error;
pub mod instrument;
pub mod ipc;
pub mod player;
pub mod router;
pub mod session;
pub mod soundfont;

pub use channel::*;
pub use config::*;
pub use effects::*;
pub use error::*;
pub use instrument::*;
pub use ipc::*;
pub use player::*;
pub use router::*;
pub use session::*;
pub use soundfont::*;
