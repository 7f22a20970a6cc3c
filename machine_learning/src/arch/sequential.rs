use ndarray::{Array2, ArrayView2, Axis, linalg::general_mat_mul};

use super::activations::ActFn;
use super::layers::Layer;
use super::loss::Loss;
use super::spec::ArchSpec;
use crate::{MlErr, Result};

/// Every intermediate tensor of a forward pass.
///
/// `acts[0]` is the input batch, `acts[i + 1]` is layer `i`'s output and
/// `preacts[i]` its pre-activation. The attack engine replays these when
/// differentiating through the backward pass, so they are kept public.
#[derive(Debug, Clone)]
pub struct ForwardTrace {
    pub acts: Vec<Array2<f32>>,
    pub preacts: Vec<Array2<f32>>,
}

/// Every intermediate tensor of a backward pass.
///
/// `deltas[i]` is `dL/d preacts[i]` and `dacts[i]` is `dL/d acts[i + 1]`,
/// i.e. the delta before the activation derivative is applied.
#[derive(Debug, Clone)]
pub struct BackwardTrace {
    pub loss: f32,
    pub deltas: Vec<Array2<f32>>,
    pub dacts: Vec<Array2<f32>>,
}

/// A sequential model: information flows forward when computing an output and
/// backward when computing parameter gradients.
///
/// The model owns no parameters. Callers hand in a flat `f32` slice and a
/// gradient buffer; gradients are *accumulated* into the buffer so multiple
/// batches can share it.
#[derive(Debug, Clone)]
pub struct Sequential {
    layers: Vec<Layer>,
}

impl Sequential {
    /// Builds the compute model described by an `ArchSpec`.
    pub fn from_spec(spec: &ArchSpec) -> Self {
        Self {
            layers: spec.build(),
        }
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// The total amount of scalar parameters.
    pub fn size(&self) -> usize {
        self.layers.iter().map(Layer::size).sum()
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].in_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].out_dim()
    }

    /// The starting offset of each layer inside the flat parameter slice.
    pub fn param_offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.layers.len());
        let mut cursor = 0;
        for layer in &self.layers {
            offsets.push(cursor);
            cursor += layer.size();
        }
        offsets
    }

    /// Makes a forward pass through the network.
    ///
    /// # Arguments
    /// * `params` - The flat model parameters.
    /// * `x` - The input batch, one sample per row.
    ///
    /// # Returns
    /// The model output for the given batch.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        self.check_params(params.len())?;

        let mut out = x.to_owned();
        let mut cursor = 0;
        for layer in &self.layers {
            let slice = &params[cursor..cursor + layer.size()];
            out = layer.forward(slice, out.view())?;
            cursor += layer.size();
        }
        Ok(out)
    }

    /// Makes a forward pass keeping every intermediate tensor.
    pub fn trace(&self, params: &[f32], x: ArrayView2<f32>) -> Result<ForwardTrace> {
        self.check_params(params.len())?;

        let mut acts = Vec::with_capacity(self.layers.len() + 1);
        let mut preacts = Vec::with_capacity(self.layers.len());
        acts.push(x.to_owned());

        let mut cursor = 0;
        for (i, layer) in self.layers.iter().enumerate() {
            let slice = &params[cursor..cursor + layer.size()];
            let z = layer.affine(slice, acts[i].view())?;
            acts.push(layer.activate(&z));
            preacts.push(z);
            cursor += layer.size();
        }

        Ok(ForwardTrace { acts, preacts })
    }

    /// Backpropagates a loss, accumulating parameter gradients into `grads`.
    ///
    /// # Arguments
    /// * `params` - The flat model parameters.
    /// * `trace` - A forward trace of the batch being differentiated.
    /// * `targets` - One-hot labels or regression targets, one row per sample.
    /// * `loss` - The training loss.
    /// * `grads` - Flat gradient buffer; contributions are added, not assigned.
    ///
    /// # Returns
    /// The loss value together with all per-layer deltas.
    ///
    /// # Errors
    /// `MlErr::SizeMismatch` for inconsistent buffers and
    /// `MlErr::LossRequiresLogits` when a cross entropy loss meets a
    /// non-linear final layer.
    pub fn backward(
        &self,
        params: &[f32],
        trace: &ForwardTrace,
        targets: ArrayView2<f32>,
        loss: &Loss,
        grads: &mut [f32],
    ) -> Result<BackwardTrace> {
        self.check_params(params.len())?;
        self.check_params(grads.len())?;

        let nlayers = self.layers.len();
        if trace.acts.len() != nlayers + 1 || trace.preacts.len() != nlayers {
            return Err(MlErr::SizeMismatch {
                what: "forward trace",
                got: trace.preacts.len(),
                expected: nlayers,
            });
        }

        let output = &trace.acts[nlayers];
        if targets.dim() != output.dim() {
            return Err(MlErr::SizeMismatch {
                what: "targets",
                got: targets.len(),
                expected: output.len(),
            });
        }

        let loss_value = loss.loss(output.view(), targets);
        let mut deltas: Vec<Array2<f32>> = vec![Array2::zeros((0, 0)); nlayers];
        let mut dacts: Vec<Array2<f32>> = vec![Array2::zeros((0, 0)); nlayers];

        match loss {
            Loss::Mse(mse) => {
                let e = mse.loss_prime(output.view(), targets);
                deltas[nlayers - 1] = &e * &self.layers[nlayers - 1].dact(&trace.preacts[nlayers - 1]);
                dacts[nlayers - 1] = e;
            }
            Loss::CrossEntropy(ce) => {
                if !self.has_logit_head() {
                    return Err(MlErr::LossRequiresLogits);
                }
                let d = ce.delta(output.view(), targets);
                dacts[nlayers - 1] = d.clone();
                deltas[nlayers - 1] = d;
            }
        }

        let offsets = self.param_offsets();
        for i in (0..nlayers).rev() {
            let layer = &self.layers[i];
            let range = offsets[i]..offsets[i] + layer.size();

            let (mut dw, mut db) = layer.view_grad(&mut grads[range.clone()]);
            general_mat_mul(1.0, &trace.acts[i].t(), &deltas[i], 1.0, &mut dw);
            db += &deltas[i].sum_axis(Axis(0));

            if i > 0 {
                let (w, _) = layer.view_params(&params[range]);
                let m = deltas[i].dot(&w.t());
                deltas[i - 1] = &m * &self.layers[i - 1].dact(&trace.preacts[i - 1]);
                dacts[i - 1] = m;
            }
        }

        Ok(BackwardTrace {
            loss: loss_value,
            deltas,
            dacts,
        })
    }

    fn has_logit_head(&self) -> bool {
        matches!(
            self.layers.last(),
            Some(Layer::Dense(dense)) if dense.act() == ActFn::Identity
        )
    }

    fn check_params(&self, got: usize) -> Result<()> {
        if got != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "model params",
                got,
                expected: self.size(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::{LayerSpec, spec::ArchSpec};
    use ndarray::array;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn mlp(act: ActFn) -> (ArchSpec, Sequential) {
        let spec = ArchSpec::new(
            "mlp",
            [
                LayerSpec::Dense {
                    inputs: 3,
                    outputs: 4,
                    act,
                },
                LayerSpec::Dense {
                    inputs: 4,
                    outputs: 2,
                    act: ActFn::Identity,
                },
            ],
        )
        .unwrap();
        let model = Sequential::from_spec(&spec);
        (spec, model)
    }

    fn numeric_grad(
        model: &Sequential,
        params: &[f32],
        x: ArrayView2<f32>,
        targets: ArrayView2<f32>,
        loss: &Loss,
    ) -> Vec<f32> {
        let eps = 1e-2;
        let mut grad = vec![0.0; params.len()];
        let mut perturbed = params.to_vec();
        for i in 0..params.len() {
            perturbed[i] = params[i] + eps;
            let hi = loss.loss(model.forward(&perturbed, x).unwrap().view(), targets);
            perturbed[i] = params[i] - eps;
            let lo = loss.loss(model.forward(&perturbed, x).unwrap().view(), targets);
            perturbed[i] = params[i];
            grad[i] = (hi - lo) / (2.0 * eps);
        }
        grad
    }

    fn check_backward(loss: Loss, act: ActFn, targets: Array2<f32>) {
        let (spec, model) = mlp(act);
        let mut rng = StdRng::seed_from_u64(3);
        let params = spec.init_params(&mut rng);
        let x = array![[0.3, -0.2, 0.9], [1.0, 0.1, -0.4]];

        let trace = model.trace(&params, x.view()).unwrap();
        let mut grads = vec![0.0; model.size()];
        model
            .backward(&params, &trace, targets.view(), &loss, &mut grads)
            .unwrap();

        let numeric = numeric_grad(&model, &params, x.view(), targets.view(), &loss);
        for (i, (a, n)) in grads.iter().zip(&numeric).enumerate() {
            assert!(
                (a - n).abs() < 5e-3,
                "param {i}: analytic {a}, numeric {n}"
            );
        }
    }

    #[test]
    fn mse_gradient_matches_finite_differences() {
        check_backward(Loss::mse(), ActFn::Sigmoid, array![[0.5, -1.0], [0.1, 0.7]]);
    }

    #[test]
    fn cross_entropy_gradient_matches_finite_differences() {
        check_backward(
            Loss::cross_entropy(),
            ActFn::Tanh,
            array![[1.0, 0.0], [0.0, 1.0]],
        );
    }

    #[test]
    fn gradients_accumulate_across_calls() {
        let (spec, model) = mlp(ActFn::Sigmoid);
        let params = spec.init_params(&mut StdRng::seed_from_u64(1));
        let x = array![[0.1, 0.2, 0.3]];
        let y = array![[1.0, -1.0]];

        let trace = model.trace(&params, x.view()).unwrap();
        let mut once = vec![0.0; model.size()];
        let mut twice = vec![0.0; model.size()];
        let loss = Loss::mse();
        model
            .backward(&params, &trace, y.view(), &loss, &mut once)
            .unwrap();
        model
            .backward(&params, &trace, y.view(), &loss, &mut twice)
            .unwrap();
        model
            .backward(&params, &trace, y.view(), &loss, &mut twice)
            .unwrap();

        for (a, b) in once.iter().zip(&twice) {
            assert!((2.0 * a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn cross_entropy_rejects_nonlinear_head() {
        let spec = ArchSpec::new(
            "bad-head",
            [LayerSpec::Dense {
                inputs: 2,
                outputs: 2,
                act: ActFn::Sigmoid,
            }],
        )
        .unwrap();
        let model = Sequential::from_spec(&spec);
        let params = vec![0.0; model.size()];
        let x = array![[1.0, 2.0]];
        let y = array![[1.0, 0.0]];

        let trace = model.trace(&params, x.view()).unwrap();
        let mut grads = vec![0.0; model.size()];
        let res = model.backward(&params, &trace, y.view(), &Loss::cross_entropy(), &mut grads);
        assert_eq!(res.unwrap_err(), MlErr::LossRequiresLogits);
    }

    #[test]
    fn mismatched_param_buffer_is_rejected() {
        let (_, model) = mlp(ActFn::Identity);
        let res = model.forward(&[0.0; 3], array![[0.0, 0.0, 0.0]].view());
        assert!(matches!(res, Err(MlErr::SizeMismatch { .. })));
    }

    #[test]
    fn forward_and_trace_agree() {
        let (spec, model) = mlp(ActFn::Tanh);
        let mut rng = StdRng::seed_from_u64(11);
        let params = spec.init_params(&mut rng);
        let x = Array2::from_shape_fn((3, 3), |_| rng.random_range(-1.0..1.0));

        let out = model.forward(&params, x.view()).unwrap();
        let trace = model.trace(&params, x.view()).unwrap();
        assert_eq!(out, trace.acts[trace.acts.len() - 1]);
    }
}
