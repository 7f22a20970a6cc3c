//! The gradient matching objective and its derivative w.r.t. the candidate.
//!
//! The hard part lives here: the objective compares *gradients*, so its own
//! gradient w.r.t. the candidate input requires differentiating through the
//! backward pass. This is done analytically with a two-phase adjoint sweep
//! over the taped forward/backward traces, which is why every activation
//! exposes a second derivative.

use machine_learning::MlErr;
use machine_learning::arch::loss::Loss;
use machine_learning::arch::{BackwardTrace, ForwardTrace, Sequential};
use ndarray::{Array2, ArrayView2};

use crate::Result;

/// How candidate gradients are compared against the revealed ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Distance {
    /// Squared Euclidean distance, summed over all parameters.
    Euclidean,
    /// One minus the cosine similarity; scale-invariant, which is what makes
    /// it the usual choice for gradient matching.
    #[default]
    Cosine,
}

impl Distance {
    /// Evaluates the distance and its gradient w.r.t. `got`.
    ///
    /// Both slices must have the same length; callers validate that when the
    /// shared data is paired with its payload.
    pub fn value_and_grad(&self, got: &[f32], target: &[f32]) -> (f32, Vec<f32>) {
        match self {
            Distance::Euclidean => {
                let mut value = 0.0;
                let grad = got
                    .iter()
                    .zip(target)
                    .map(|(g, t)| {
                        let d = g - t;
                        value += d * d;
                        2.0 * d
                    })
                    .collect();
                (value, grad)
            }
            Distance::Cosine => {
                let mut s = 0.0_f32;
                let mut p = 0.0_f32;
                let mut q = 0.0_f32;
                for (g, t) in got.iter().zip(target) {
                    s += g * t;
                    p += g * g;
                    q += t * t;
                }
                let denom = p.sqrt() * q.sqrt();
                if denom <= f32::EPSILON {
                    // A zero gradient on either side carries no direction to
                    // match against.
                    return (1.0, vec![0.0; got.len()]);
                }
                let value = 1.0 - s / denom;
                let grad = got
                    .iter()
                    .zip(target)
                    .map(|(g, t)| -t / denom + s * g / (p * denom))
                    .collect();
                (value, grad)
            }
        }
    }
}

/// Pulls an upstream gradient w.r.t. the parameter gradients back to the
/// input batch.
///
/// Given `upstream = dD/d(grads)` for some scalar `D` of the gradients that
/// `Sequential::backward` produced, this returns `dD/dx`. Two sweeps over the
/// taped traces:
///
/// 1. ascending: adjoints of the per-layer deltas (the delta recursion runs
///    backward, so its adjoint recursion runs forward),
/// 2. descending: adjoints of the activations, seeded at the loss head and
///    folded through each layer's first and second activation derivatives.
///
/// # Errors
/// `MlErr::SizeMismatch` when `upstream` doesn't cover the model.
pub(crate) fn input_adjoint(
    model: &Sequential,
    params: &[f32],
    trace: &ForwardTrace,
    backward: &BackwardTrace,
    upstream: &[f32],
    loss: &Loss,
) -> Result<Array2<f32>> {
    if upstream.len() != model.size() {
        return Err(MlErr::SizeMismatch {
            what: "upstream gradient",
            got: upstream.len(),
            expected: model.size(),
        }
        .into());
    }

    let layers = model.layers();
    let nlayers = layers.len();
    let offsets = model.param_offsets();

    let mut u_w = Vec::with_capacity(nlayers);
    let mut u_b = Vec::with_capacity(nlayers);
    for (i, layer) in layers.iter().enumerate() {
        let range = offsets[i]..offsets[i] + layer.size();
        let (w, b) = layer.view_params(&upstream[range]);
        u_w.push(w.to_owned());
        u_b.push(b.to_owned());
    }

    let dact: Vec<Array2<f32>> = layers
        .iter()
        .zip(&trace.preacts)
        .map(|(l, z)| l.dact(z))
        .collect();
    let ddact: Vec<Array2<f32>> = layers
        .iter()
        .zip(&trace.preacts)
        .map(|(l, z)| l.ddact(z))
        .collect();

    // Phase 1: bar_delta[i] = dD/d deltas[i]. deltas[i] feeds grad_W[i],
    // grad_b[i] and (scaled by the activation derivative) deltas[i - 1].
    let mut bar_delta: Vec<Array2<f32>> = Vec::with_capacity(nlayers);
    for i in 0..nlayers {
        let mut bd = trace.acts[i].dot(&u_w[i]);
        bd += &u_b[i];
        if i > 0 {
            let range = offsets[i]..offsets[i] + layers[i].size();
            let (w, _) = layers[i].view_params(&params[range]);
            bd = bd + (&bar_delta[i - 1] * &dact[i - 1]).dot(&w);
        }
        bar_delta.push(bd);
    }

    // Seed at the head: the model output enters the backward pass only
    // through the loss derivative.
    let output = &trace.acts[nlayers];
    let mut bar_acts = match loss {
        Loss::Mse(mse) => {
            let scale = mse.prime_scale(output.view());
            (&bar_delta[nlayers - 1] * &dact[nlayers - 1]) * scale
        }
        Loss::CrossEntropy(ce) => {
            // Softmax Jacobian applied to bar_delta / B, row by row.
            let p = ce.softmax(output.view());
            let batch = output.nrows() as f32;
            let mut seeded = Array2::zeros(output.dim());
            for ((mut out, bar), probs) in seeded
                .rows_mut()
                .into_iter()
                .zip(bar_delta[nlayers - 1].rows())
                .zip(p.rows())
            {
                let dot = bar.dot(&probs);
                for ((o, b), pr) in out.iter_mut().zip(bar).zip(probs) {
                    *o = pr * (b - dot) / batch;
                }
            }
            seeded
        }
    };

    // Phase 2: descend through the layers. Each activation is read twice
    // during backprop (as the matmul operand of grad_W and as the derivative
    // argument), both paths show up here.
    for i in (0..nlayers).rev() {
        let range = offsets[i]..offsets[i] + layers[i].size();
        let (w, _) = layers[i].view_params(&params[range]);
        let bar_z =
            &bar_acts * &dact[i] + &(&bar_delta[i] * &backward.dacts[i]) * &ddact[i];
        bar_acts = bar_z.dot(&w.t()) + backward.deltas[i].dot(&u_w[i].t());
    }

    Ok(bar_acts)
}

/// Anisotropic total variation of a batch and its sign subgradient.
///
/// Each row is read as a `(channels, height, width)` volume; neighbor
/// differences are taken within channels only.
pub(crate) fn total_variation(
    x: ArrayView2<f32>,
    shape: (usize, usize, usize),
) -> (f32, Array2<f32>) {
    let (channels, height, width) = shape;
    let mut value = 0.0;
    let mut grad = Array2::zeros(x.dim());

    for (row, mut grow) in x.rows().into_iter().zip(grad.rows_mut()) {
        for c in 0..channels {
            let base = c * height * width;
            for i in 0..height {
                for j in 0..width {
                    let at = base + i * width + j;
                    if j + 1 < width {
                        let d = row[at + 1] - row[at];
                        value += d.abs();
                        grow[at + 1] += d.signum();
                        grow[at] -= d.signum();
                    }
                    if i + 1 < height {
                        let below = at + width;
                        let d = row[below] - row[at];
                        value += d.abs();
                        grow[below] += d.signum();
                        grow[at] -= d.signum();
                    }
                }
            }
        }
    }

    (value, grad)
}
