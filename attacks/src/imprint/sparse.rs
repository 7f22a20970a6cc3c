use machine_learning::arch::LayerSpec;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

use super::{BinConfig, BinGradients, Inversion, Measurement};
use crate::Result;

/// A disjoint-bin block: each sample lights up exactly one bin.
///
/// The gating keeps bins from mixing, so every non-silent bin inverts
/// independently via its raw ratio. The price is fragility to collisions:
/// two samples projecting into the same interval still blend.
#[derive(Debug, Clone)]
pub struct SparseImprintBlock {
    config: BinConfig,
    direction: Array1<f32>,
    thresholds: Vec<f32>,
}

impl SparseImprintBlock {
    /// Creates a new `SparseImprintBlock`.
    ///
    /// # Errors
    /// `AttackErr::InvalidBins` when either dimension is zero.
    pub fn new(input_dim: usize, num_bins: usize, seed: u64) -> Result<Self> {
        Self::with_config(BinConfig::new(input_dim, num_bins)?, seed)
    }

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

impl Measurement for SparseImprintBlock {
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
            disjoint: true,
        }
    }

    fn layer_params(&self) -> Vec<f32> {
        self.config.materialize(&self.direction, &self.thresholds)
    }

    fn forward(&self, x: ArrayView2<f32>) -> Array2<f32> {
        self.config
            .forward(&self.direction, &self.thresholds, true, x)
    }

    fn invert(&self, grads: &BinGradients) -> Inversion {
        let rows = (0..self.config.num_bins())
            .filter_map(|k| grads.bin_ratio(k))
            .collect();
        Inversion::from_rows(rows, &self.direction)
    }
}
