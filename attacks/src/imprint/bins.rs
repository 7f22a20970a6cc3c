use machine_learning::arch::layers::Bins;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::StandardNormal;
use rand::{SeedableRng, rngs::StdRng};

use super::BIN_TOL;
use crate::{AttackErr, Result};

/// Layout of a measurement block's bins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinConfig {
    input_dim: usize,
    num_bins: usize,
    mean: f32,
    std: f32,
}

impl BinConfig {
    /// Creates a new `BinConfig` assuming standard normal projection values.
    ///
    /// # Arguments
    /// * `input_dim` - Width of the attacked input samples.
    /// * `num_bins` - Amount of bins; more bins mean finer per-sample
    ///   separation at the cost of a wider block.
    ///
    /// # Errors
    /// `AttackErr::InvalidBins` when either dimension is zero.
    pub fn new(input_dim: usize, num_bins: usize) -> Result<Self> {
        if input_dim == 0 {
            return Err(AttackErr::InvalidBins {
                what: "input dimension",
                got: input_dim,
            });
        }
        if num_bins == 0 {
            return Err(AttackErr::InvalidBins {
                what: "bin count",
                got: num_bins,
            });
        }

        Ok(Self {
            input_dim,
            num_bins,
            mean: 0.0,
            std: 1.0,
        })
    }

    /// Adjusts the assumed distribution of projection values; thresholds are
    /// placed at its quantiles so every bin carries equal probability mass.
    pub fn with_stats(mut self, mean: f32, std: f32) -> Self {
        self.mean = mean;
        self.std = std;
        self
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn num_bins(&self) -> usize {
        self.num_bins
    }

    /// The ordered bin thresholds `q_k = mean + std · Φ⁻¹((k + 1) / (K + 1))`.
    pub fn thresholds(&self) -> Vec<f32> {
        let k = self.num_bins as f64;
        (0..self.num_bins)
            .map(|i| {
                let p = (i as f64 + 1.0) / (k + 1.0);
                self.mean + self.std * standard_normal_quantile(p) as f32
            })
            .collect()
    }

    /// Samples the unit projection direction.
    pub(crate) fn sample_direction(&self, seed: u64) -> Array1<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut w: Array1<f32> = Array1::random_using(self.input_dim, StandardNormal, &mut rng);
        let norm = w.dot(&w).sqrt();
        if norm > 0.0 {
            w /= norm;
        } else {
            w[0] = 1.0;
        }
        w
    }

    /// Crafts the flat `[W | b]` parameters: every weight column is the
    /// projection direction, every bias is the negated threshold.
    pub(crate) fn materialize(&self, direction: &Array1<f32>, thresholds: &[f32]) -> Vec<f32> {
        let mut params = Vec::with_capacity((self.input_dim + 1) * self.num_bins);
        for i in 0..self.input_dim {
            for _ in 0..self.num_bins {
                params.push(direction[i]);
            }
        }
        params.extend(thresholds.iter().map(|q| -q));
        params
    }

    /// Runs the materialized bins layer on a batch.
    pub(crate) fn forward(
        &self,
        direction: &Array1<f32>,
        thresholds: &[f32],
        disjoint: bool,
        x: ArrayView2<f32>,
    ) -> Array2<f32> {
        let layer = Bins::new(self.input_dim, self.num_bins, disjoint);
        let params = self.materialize(direction, thresholds);
        let z = layer.affine(&params, x);
        layer.activate(&z)
    }
}

/// The slice of a shared gradient that belongs to a measurement block.
#[derive(Debug, Clone)]
pub struct BinGradients {
    pub weight: Array2<f32>,
    pub bias: Array1<f32>,
}

impl BinGradients {
    /// The per-bin input estimate `grad_W[:, k] / grad_b[k]`, or `None` for a
    /// silent bin.
    pub fn bin_ratio(&self, k: usize) -> Option<Array1<f32>> {
        let g = self.bias[k];
        if g.abs() <= BIN_TOL {
            return None;
        }
        Some(self.weight.index_axis(Axis(1), k).mapv(|v| v / g))
    }
}

/// The outcome of inverting a measurement block's gradients.
///
/// `inputs` holds one recovered sample per row; `projections` the matching
/// scalar projection values. Both can be shorter than the true batch when
/// bins stayed silent, and a row can be a blend of samples when bins collide.
#[derive(Debug, Clone)]
pub struct Inversion {
    pub inputs: Array2<f32>,
    pub projections: Vec<f32>,
}

impl Inversion {
    pub(crate) fn from_rows(rows: Vec<Array1<f32>>, direction: &Array1<f32>) -> Self {
        let dim = direction.len();
        let mut inputs = Array2::zeros((rows.len(), dim));
        let mut projections = Vec::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            inputs.row_mut(i).assign(row);
            projections.push(row.dot(direction));
        }
        Self {
            inputs,
            projections,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.projections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.projections.len()
    }
}

/// Inverse CDF of the standard normal distribution.
///
/// Acklam's rational approximation; relative error below 1.15e-9 over the
/// open unit interval, which is far tighter than anything the bin layout
/// needs.
///
/// # Panics
/// When `p` lies outside the open interval `(0, 1)`. `thresholds` only ever
/// evaluates interior points.
pub fn standard_normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;

    assert!(p > 0.0 && p < 1.0, "quantile needs p in (0, 1), got {p}");

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_hits_known_values() {
        assert!(standard_normal_quantile(0.5).abs() < 1e-9);
        assert!((standard_normal_quantile(0.975) - 1.959964).abs() < 1e-4);
        assert!((standard_normal_quantile(0.025) + 1.959964).abs() < 1e-4);
        assert!((standard_normal_quantile(0.8413447) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn quantile_is_antisymmetric() {
        for &p in &[0.01, 0.1, 0.3, 0.45] {
            let lo = standard_normal_quantile(p);
            let hi = standard_normal_quantile(1.0 - p);
            assert!((lo + hi).abs() < 1e-7, "p = {p}: {lo} vs {hi}");
        }
    }

    #[test]
    fn thresholds_are_sorted_and_centered() {
        let cfg = BinConfig::new(4, 9).unwrap();
        let q = cfg.thresholds();
        assert!(q.windows(2).all(|w| w[0] < w[1]));
        // Odd bin count: the middle threshold sits at the mean.
        assert!(q[4].abs() < 1e-6);
    }

    #[test]
    fn direction_is_unit_norm_and_seeded() {
        let cfg = BinConfig::new(16, 4).unwrap();
        let a = cfg.sample_direction(9);
        let b = cfg.sample_direction(9);
        let c = cfg.sample_direction(10);
        assert_eq!(a, b);
        assert!((a.dot(&a) - 1.0).abs() < 1e-5);
        assert_ne!(a, c);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        assert!(matches!(
            BinConfig::new(0, 4),
            Err(AttackErr::InvalidBins { .. })
        ));
        assert!(matches!(
            BinConfig::new(4, 0),
            Err(AttackErr::InvalidBins { .. })
        ));
    }
}
