use machine_learning::arch::LayerSpec;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use super::{BIN_TOL, BinConfig, BinGradients, Inversion, Measurement};
use crate::Result;

/// The baseline imprint block: cumulative bins, ratio-of-sums inversion.
///
/// Every sample activates all bins below its projection, so the summed
/// gradients satisfy `Σ_k grad_W[:, k] = (Σ_k grad_b[k]) · x` for a
/// single-sample batch. Larger batches blend into a weighted average, which
/// is why the differential and sparse variants exist.
#[derive(Debug, Clone)]
pub struct ImprintBlock {
    config: BinConfig,
    direction: Array1<f32>,
    thresholds: Vec<f32>,
}

impl ImprintBlock {
    /// Creates a new `ImprintBlock`.
    ///
    /// # Arguments
    /// * `input_dim` - Width of the attacked input samples.
    /// * `num_bins` - Amount of bins.
    /// * `seed` - Seed for the projection direction.
    ///
    /// # Errors
    /// `AttackErr::InvalidBins` when either dimension is zero.
    pub fn new(input_dim: usize, num_bins: usize, seed: u64) -> Result<Self> {
        Self::with_config(BinConfig::new(input_dim, num_bins)?, seed)
    }

    /// Creates a block from an already validated configuration.
    pub fn with_config(config: BinConfig, seed: u64) -> Result<Self> {
        let direction = config.sample_direction(seed);
        let thresholds = config.thresholds();
        Ok(Self {
            config,
            direction,
            thresholds,
        })
    }
}

impl Measurement for ImprintBlock {
    fn config(&self) -> &BinConfig {
        &self.config
    }

    fn direction(&self) -> ArrayView1<'_, f32> {
        self.direction.view()
    }

    fn thresholds(&self) -> &[f32] {
        &self.thresholds
    }

    fn layer_spec(&self) -> LayerSpec {
        LayerSpec::Bins {
            inputs: self.config.input_dim(),
            bins: self.config.num_bins(),
            disjoint: false,
        }
    }

    fn layer_params(&self) -> Vec<f32> {
        self.config.materialize(&self.direction, &self.thresholds)
    }

    fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        self.config
            .forward(&self.direction, &self.thresholds, false, x)
    }

    fn invert(&self, grads: &BinGradients) -> Inversion {
        let total_bias: f32 = grads.bias.sum();
        let mut rows = Vec::new();
        if total_bias.abs() > BIN_TOL {
            let summed = grads.weight.sum_axis(Axis(1));
            rows.push(summed / total_bias);
        }
        Inversion::from_rows(rows, &self.direction)
    }
}
