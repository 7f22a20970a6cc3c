//! The measurement block family.
//!
//! A measurement block is a layer a malicious server hides inside a model
//! payload. Its parameters are crafted, not learned: one projection direction
//! shared by all bins and bias thresholds that partition the projected scalar
//! range into contiguous intervals. The gradient a user reveals for the block
//! then satisfies, per bin, `grad_W[:, k] = grad_b[k] · x̄_k` where `x̄_k` is
//! the gradient-weighted average of the samples activating bin `k` — which is
//! what the inversion routines exploit.

mod bins;
mod differential;
mod plain;
mod sparse;

pub use bins::{BinConfig, BinGradients, Inversion, standard_normal_quantile};
pub use differential::DifferentialBlock;
pub use plain::ImprintBlock;
pub use sparse::SparseImprintBlock;

use machine_learning::arch::LayerSpec;
use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::Result;

/// Activations below this are treated as a silent bin.
pub(crate) const BIN_TOL: f32 = 1e-9;

/// The capability interface shared by all block variants.
///
/// Variants are selected by configuration (`BlockVariant`), never by
/// subclassing; the only behavioral differences are how thresholds are laid
/// out and how the gradients are inverted.
pub trait Measurement: Send + Sync {
    /// The block's bin configuration.
    fn config(&self) -> &BinConfig;

    /// The unit projection direction shared by every bin.
    fn direction(&self) -> ArrayView1<'_, f32>;

    /// The ordered bin thresholds.
    fn thresholds(&self) -> &[f32];

    /// The layer description this block materializes into.
    fn layer_spec(&self) -> LayerSpec;

    /// The crafted flat parameters (`[W | b]`) for `layer_spec`.
    fn layer_params(&self) -> Vec<f32>;

    /// Runs the block on a batch, returning the bin activations.
    fn forward(&self, x: ArrayView2<f32>) -> Array2<f32>;

    /// Best-effort reconstruction of the inputs (and their projection
    /// values) from the block's observed gradients.
    ///
    /// Never fails: bin collisions degrade the result to blended averages.
    fn invert(&self, grads: &BinGradients) -> Inversion;
}

/// The available measurement block variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockVariant {
    Plain,
    Differential,
    Sparse,
}

impl BlockVariant {
    /// Builds a block of this variant.
    ///
    /// # Arguments
    /// * `cfg` - Bin layout configuration.
    /// * `seed` - Seed for the projection direction.
    ///
    /// # Errors
    /// `AttackErr::InvalidBins` for non-positive dimensions.
    pub fn build(self, cfg: BinConfig, seed: u64) -> Result<Box<dyn Measurement>> {
        Ok(match self {
            BlockVariant::Plain => Box::new(ImprintBlock::with_config(cfg, seed)?),
            BlockVariant::Differential => Box::new(DifferentialBlock::with_config(cfg, seed)?),
            BlockVariant::Sparse => Box::new(SparseImprintBlock::with_config(cfg, seed)?),
        })
    }
}
