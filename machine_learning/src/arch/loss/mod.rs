mod cross_entropy;
mod mse;

pub use cross_entropy::CrossEntropy;
pub use mse::Mse;

use ndarray::ArrayView2;

/// The loss functions a model can be trained (and attacked) under.
#[derive(Debug, Clone, Copy)]
pub enum Loss {
    Mse(Mse),
    CrossEntropy(CrossEntropy),
}

impl Default for Loss {
    fn default() -> Self {
        Self::cross_entropy()
    }
}

impl Loss {
    pub fn mse() -> Self {
        Self::Mse(Mse::new())
    }

    pub fn cross_entropy() -> Self {
        Self::CrossEntropy(CrossEntropy::new())
    }

    /// Evaluates the loss for a model output (logits for cross entropy).
    pub fn loss(&self, output: ArrayView2<f32>, targets: ArrayView2<f32>) -> f32 {
        match self {
            Loss::Mse(l) => l.loss(output, targets),
            Loss::CrossEntropy(l) => l.loss(output, targets),
        }
    }

    /// Whether this loss consumes raw logits (and therefore requires a linear
    /// final layer).
    pub fn wants_logits(&self) -> bool {
        matches!(self, Loss::CrossEntropy(_))
    }
}
