use machine_learning::arch::LayerSpec;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use super::{BIN_TOL, BinConfig, BinGradients, Inversion, Measurement};
use crate::Result;

/// A cumulative-bin block inverted through adjacent gradient differences.
///
/// With cumulative bins, a sample projecting into the slab between thresholds
/// `q_k` and `q_{k+1}` contributes to bins `0..=k` but not to bin `k + 1`.
/// Subtracting bin `k + 1` from bin `k` therefore cancels everything that sits
/// above the slab and leaves exactly its occupants:
///
/// `(grad_W[:, k] − grad_W[:, k+1]) / (grad_b[k] − grad_b[k+1]) = x̄_slab`
///
/// which stays exact for batches as long as each slab holds one sample. The
/// topmost bin has no neighbor to subtract, its raw ratio is used instead.
#[derive(Debug, Clone)]
pub struct DifferentialBlock {
    config: BinConfig,
    direction: Array1<f32>,
    thresholds: Vec<f32>,
}

impl DifferentialBlock {
    /// Creates a new `DifferentialBlock`.
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

impl Measurement for DifferentialBlock {
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
        let bins = self.config.num_bins();
        let mut rows = Vec::new();
        for k in 0..bins {
            let (num, den) = if k + 1 < bins {
                let num =
                    &grads.weight.index_axis(Axis(1), k) - &grads.weight.index_axis(Axis(1), k + 1);
                (num, grads.bias[k] - grads.bias[k + 1])
            } else {
                (grads.weight.index_axis(Axis(1), k).to_owned(), grads.bias[k])
            };
            if den.abs() > BIN_TOL {
                rows.push(num / den);
            }
        }
        Inversion::from_rows(rows, &self.direction)
    }
}
