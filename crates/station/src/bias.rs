use serde::{Deserialize, Serialize};
use tracing::debug;

/// Additive zero-drift correction for one channel.
///
/// When a corrected value still ends up below `floor` the bias grows by the
/// shortfall. It never shrinks and has no upper bound.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasTracker {
    bias: f32,
    floor: Option<f32>,
}

impl BiasTracker {
    /// Without a floor the bias stays at `initial` forever.
    pub fn new(initial: f32, floor: Option<f32>) -> Self {
        Self {
            bias: initial,
            floor,
        }
    }

    pub fn bias(&self) -> f32 {
        self.bias
    }

    /// Applies the bias without adapting it.
    pub fn apply(&self, raw: f32) -> f32 {
        raw + self.bias
    }

    /// Raises the bias if `raw` corrected with it is still below the floor.
    pub fn adapt(&mut self, raw: f32) {
        let Some(floor) = self.floor else {
            return;
        };
        let corrected = raw + self.bias;
        if corrected < floor {
            self.bias += floor - corrected;
            debug!(bias = self.bias, "{corrected} below floor {floor}, raised bias");
        }
    }

    /// Adapts the bias to `raw` and returns `raw` corrected with the updated
    /// bias.
    pub fn correct(&mut self, raw: f32) -> f32 {
        self.adapt(raw);
        self.apply(raw)
    }
}
