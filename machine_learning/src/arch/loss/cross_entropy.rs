use ndarray::{Array2, ArrayView2, Axis};

/// Softmax cross entropy over one-hot targets, averaged over the batch.
///
/// The softmax is folded into the loss: the model output is expected to be
/// raw logits, which keeps the head delta at the clean `(p - y) / B` form.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropy;

impl CrossEntropy {
    /// Returns a new `CrossEntropy`.
    pub fn new() -> Self {
        Self
    }

    /// Row-wise stable softmax.
    pub fn softmax(&self, logits: ArrayView2<f32>) -> Array2<f32> {
        let mut p = logits.to_owned();
        for mut row in p.rows_mut() {
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            row.mapv_inplace(|v| (v - max).exp());
            let sum = row.sum();
            row.mapv_inplace(|v| v / sum);
        }
        p
    }

    pub fn loss(&self, logits: ArrayView2<f32>, targets: ArrayView2<f32>) -> f32 {
        let p = self.softmax(logits);
        let batch = logits.nrows() as f32;
        let nll = (&targets * &p.mapv(|v| (v + f32::EPSILON).ln()))
            .sum_axis(Axis(1))
            .sum();
        -nll / batch
    }

    /// The head delta `dL/dz = (softmax(z) - y) / B`.
    pub fn delta(&self, logits: ArrayView2<f32>, targets: ArrayView2<f32>) -> Array2<f32> {
        let batch = logits.nrows() as f32;
        (self.softmax(logits) - &targets) / batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn softmax_rows_sum_to_one() {
        let ce = CrossEntropy::new();
        let p = ce.softmax(array![[1.0, 2.0, 3.0], [-4.0, 0.0, 4.0]].view());
        for row in p.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn delta_matches_finite_differences() {
        let ce = CrossEntropy::new();
        let logits = array![[0.2, -0.7, 1.1]];
        let y = array![[0.0, 1.0, 0.0]];
        let delta = ce.delta(logits.view(), y.view());

        let eps = 1e-3;
        for j in 0..3 {
            let mut hi = logits.clone();
            let mut lo = logits.clone();
            hi[(0, j)] += eps;
            lo[(0, j)] -= eps;
            let num = (ce.loss(hi.view(), y.view()) - ce.loss(lo.view(), y.view())) / (2.0 * eps);
            assert!(
                (delta[(0, j)] - num).abs() < 1e-3,
                "delta {} numeric {num}",
                delta[(0, j)]
            );
        }
    }

    #[test]
    fn uniform_logits_give_log_classes_loss() {
        let ce = CrossEntropy::new();
        let logits = array![[0.0, 0.0, 0.0, 0.0]];
        let y = array![[1.0, 0.0, 0.0, 0.0]];
        assert!((ce.loss(logits.view(), y.view()) - 4.0_f32.ln()).abs() < 1e-5);
    }
}
