use ndarray::{Array2, ArrayView1};

use crate::{Result, SimErr};

/// How reconstructions are scored.
#[derive(Debug, Clone, Copy)]
pub struct ReportConfig {
    /// Batches up to this size are matched against the truth by exhaustive
    /// permutation search; larger ones fall back to greedy assignment.
    pub order_batch: usize,
    /// Peak signal value for the PSNR, i.e. the data range.
    pub psnr_peak: f32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            order_batch: 8,
            psnr_peak: 1.0,
        }
    }
}

/// Reconstruction quality against the ground truth.
///
/// Reconstructions carry no sample order (bins sort by projection, restarts
/// shuffle freely), so rows are matched to the truth before scoring.
#[derive(Debug, Clone)]
pub struct Metrics {
    mse: f32,
    psnr: f32,
    order: Vec<usize>,
    per_sample_mse: Vec<f32>,
}

impl Metrics {
    /// Mean squared error over all entries, after row matching.
    pub fn mse(&self) -> f32 {
        self.mse
    }

    /// `10 · log10(peak² / mse)`; infinite for a perfect reconstruction.
    pub fn psnr(&self) -> f32 {
        self.psnr
    }

    /// `order[i]` is the candidate row matched to truth row `i`.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn per_sample_mse(&self) -> &[f32] {
        &self.per_sample_mse
    }
}

/// Scores a candidate batch against the true batch.
///
/// # Errors
/// `SimErr::BatchShapeMismatch` when the two batches disagree on shape,
/// `SimErr::EmptyBatch` when there is nothing to score.
pub fn evaluate(candidate: &Array2<f32>, truth: &Array2<f32>, cfg: &ReportConfig) -> Result<Metrics> {
    if candidate.dim() != truth.dim() {
        return Err(SimErr::BatchShapeMismatch {
            got: candidate.dim(),
            expected: truth.dim(),
        });
    }
    let batch = truth.nrows();
    if batch == 0 {
        return Err(SimErr::EmptyBatch);
    }

    let cost = pairwise_mse(candidate, truth);
    let order = if batch <= cfg.order_batch {
        best_permutation(&cost, batch)
    } else {
        greedy_assignment(&cost, batch)
    };

    let per_sample_mse: Vec<f32> = order
        .iter()
        .enumerate()
        .map(|(t, &c)| cost[t * batch + c])
        .collect();
    let mse = per_sample_mse.iter().sum::<f32>() / batch as f32;
    let psnr = if mse > 0.0 {
        10.0 * (cfg.psnr_peak * cfg.psnr_peak / mse).log10()
    } else {
        f32::INFINITY
    };

    log::info!("reconstruction scored: mse {mse:.6}, psnr {psnr:.2} dB");
    Ok(Metrics {
        mse,
        psnr,
        order,
        per_sample_mse,
    })
}

fn row_mse(a: ArrayView1<f32>, b: ArrayView1<f32>) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        / a.len() as f32
}

/// Row-major cost matrix: `cost[t * batch + c]` is the MSE between truth row
/// `t` and candidate row `c`.
fn pairwise_mse(candidate: &Array2<f32>, truth: &Array2<f32>) -> Vec<f32> {
    let batch = truth.nrows();
    let mut cost = Vec::with_capacity(batch * batch);
    for t in truth.rows() {
        for c in candidate.rows() {
            cost.push(row_mse(t, c));
        }
    }
    cost
}

fn best_permutation(cost: &[f32], batch: usize) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..batch).collect();
    let mut best = perm.clone();
    let mut best_cost = f32::INFINITY;
    permute(&mut perm, 0, &mut |p| {
        let total: f32 = p.iter().enumerate().map(|(t, &c)| cost[t * batch + c]).sum();
        if total < best_cost {
            best_cost = total;
            best.copy_from_slice(p);
        }
    });
    best
}

fn permute(perm: &mut [usize], at: usize, visit: &mut impl FnMut(&[usize])) {
    if at == perm.len() {
        visit(perm);
        return;
    }
    for i in at..perm.len() {
        perm.swap(at, i);
        permute(perm, at + 1, visit);
        perm.swap(at, i);
    }
}

/// Greedy fallback: repeatedly takes the globally cheapest unmatched pair.
fn greedy_assignment(cost: &[f32], batch: usize) -> Vec<usize> {
    let mut order = vec![usize::MAX; batch];
    let mut truth_done = vec![false; batch];
    let mut cand_done = vec![false; batch];
    for _ in 0..batch {
        let mut best = (0, 0, f32::INFINITY);
        for t in 0..batch {
            if truth_done[t] {
                continue;
            }
            for c in 0..batch {
                if cand_done[c] {
                    continue;
                }
                let v = cost[t * batch + c];
                if v < best.2 {
                    best = (t, c, v);
                }
            }
        }
        order[best.0] = best.1;
        truth_done[best.0] = true;
        cand_done[best.1] = true;
    }
    order
}
