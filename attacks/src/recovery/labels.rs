//! Label inference from the classification head's bias gradient.

/// Picks the `batch_size` most negative entries of the final bias gradient.
///
/// Under softmax cross entropy the bias gradient of class `c` is
/// `Σ_n (p_n[c] - y_n[c]) / B`, which is negative (almost surely) exactly for
/// classes present in the batch. Repeated labels in a batch are not
/// distinguishable this way; the estimate then degrades to the most plausible
/// distinct set. When the batch outgrows the class count, labels *must*
/// repeat, and the estimate cycles through the classes again in the same
/// most-negative-first order so it always yields one label per sample.
///
/// The result is sorted ascending, matching one-hot target construction.
pub fn infer_labels(bias_grad: &[f32], batch_size: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..bias_grad.len()).collect();
    order.sort_by(|&a, &b| bias_grad[a].total_cmp(&bias_grad[b]));
    let mut picked: Vec<usize> = order.iter().cycle().take(batch_size).copied().collect();
    picked.sort_unstable();
    picked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_entries_win() {
        let grad = [0.02, -0.4, 0.05, -0.1, 0.01];
        assert_eq!(infer_labels(&grad, 2), vec![1, 3]);
    }

    #[test]
    fn oversized_batch_repeats_the_classes() {
        let grad = [0.5, -0.5];
        assert_eq!(infer_labels(&grad, 4), vec![0, 0, 1, 1]);
    }

    #[test]
    fn padding_favors_the_most_negative_class() {
        let grad = [0.1, -0.8, -0.2];
        // Order by gradient: 1, 2, 0; the fourth slot wraps back to class 1.
        assert_eq!(infer_labels(&grad, 4), vec![0, 1, 1, 2]);
    }

    #[test]
    fn result_is_sorted() {
        let grad = [-0.1, 0.3, -0.9, 0.2];
        assert_eq!(infer_labels(&grad, 2), vec![0, 2]);
    }
}
