use ndarray::{Array2, ArrayView2};

/// Mean squared error loss function.
#[derive(Debug, Default, Clone, Copy)]
pub struct Mse;

impl Mse {
    /// Returns a new `Mse`.
    pub fn new() -> Self {
        Self
    }

    pub fn loss(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> f32 {
        (&y_pred - &y)
            .mapv(|x| x.powi(2))
            .mean()
            .unwrap_or_default()
    }

    /// Gradient of the loss with respect to the prediction.
    pub fn loss_prime(&self, y_pred: ArrayView2<f32>, y: ArrayView2<f32>) -> Array2<f32> {
        (&y_pred - &y) * (2.0 / y_pred.len() as f32)
    }

    /// The constant factor tying `loss_prime` back to the prediction, needed
    /// when differentiating through the backward pass.
    pub fn prime_scale(&self, y_pred: ArrayView2<f32>) -> f32 {
        2.0 / y_pred.len() as f32
    }
}
