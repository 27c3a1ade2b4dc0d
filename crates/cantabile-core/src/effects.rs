use cantabile_ports::audio::{EffectId, EffectKind};
use serde::{Deserialize, Serialize};

/// An effect attached to a voice. `handle` is only set while the backend
/// is open; the kind, bypass flag and parameters survive close/open.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EffectUnit {
    pub kind: EffectKind,
    pub bypass: bool,
    pub params: Vec<f32>,
    #[serde(skip)]
    pub(crate) handle: Option<EffectId>,
}

impl EffectUnit {
    pub fn new(kind: EffectKind) -> Self {
        Self {
            kind,
            bypass: false,
            params: kind.default_params(),
            handle: None,
        }
    }

    pub fn is_attached(&self) -> bool {
        self.handle.is_some()
    }
}
