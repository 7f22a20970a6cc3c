//! Gradient matching reconstruction.
//!
//! Given one or more model payloads and the gradients a user revealed for
//! them, the optimizer searches for an input batch whose gradients match the
//! revealed ones. Labels are taken from the auxiliary info, from the shared
//! data, or inferred from the classification head's bias gradient.

mod labels;
mod objective;
mod stats;

pub use labels::infer_labels;
pub use objective::Distance;
pub use stats::RecoveryStats;

use machine_learning::MlErr;
use machine_learning::arch::Sequential;
use machine_learning::arch::loss::Loss;
use machine_learning::optimization::{Adam, Optimizer};
use ndarray::{Array2, ArrayView2};
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::StandardNormal;
use protocol::{ModelPayload, ProtocolErr, SharedData};
use rand::{Rng, SeedableRng, rngs::StdRng};
use rayon::prelude::*;

use crate::{AttackErr, Result};

/// How reconstruction candidates are initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Init {
    /// Standard normal entries; the usual choice for normalized data.
    #[default]
    Randn,
    /// Uniform entries in `[-1, 1)`.
    Uniform,
    /// All zeros. Useless with more than one restart.
    Zeros,
}

/// Everything that shapes a reconstruction run.
#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// Iteration cap per restart.
    pub max_iterations: usize,
    /// When set, caps iterations *and* disables early stopping, so a run
    /// executes exactly `min(dryrun, max_iterations)` steps. Meant for
    /// estimating run cost and for reproducible pipeline tests.
    pub dryrun_iterations: Option<usize>,
    /// Amount of independently seeded candidates; the best final loss wins.
    pub restarts: usize,
    pub learning_rate: f32,
    /// Multiplier applied to the learning rate at 3/8, 5/8 and 7/8 of the
    /// iteration cap.
    pub decay_factor: f32,
    pub distance: Distance,
    /// The training loss the user is assumed to have computed gradients with.
    pub loss: Loss,
    /// Total variation weight; zero disables the prior.
    pub tv_weight: f32,
    /// `(channels, height, width)` layout of each sample, for the total
    /// variation prior. `None` treats a sample as a flat signal.
    pub image_shape: Option<(usize, usize, usize)>,
    /// Stop a restart after this many iterations without improvement.
    pub patience: Option<usize>,
    /// Stop a restart once the objective falls below this value.
    pub loss_threshold: Option<f32>,
    /// Log and record the trajectory every this many iterations; 0 is off.
    pub callback: usize,
    /// Clamp candidate entries into `[lo, hi]` after every step.
    pub clamp: Option<(f32, f32)>,
    pub init: Init,
    /// Base seed; restart `r` runs from `seed + r`.
    pub seed: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1200,
            dryrun_iterations: None,
            restarts: 1,
            learning_rate: 0.1,
            decay_factor: 0.1,
            distance: Distance::default(),
            loss: Loss::default(),
            tv_weight: 0.0,
            image_shape: None,
            patience: None,
            loss_threshold: None,
            callback: 0,
            clamp: None,
            init: Init::default(),
            seed: 0,
        }
    }
}

/// Side information the attacker may hold about the batch.
#[derive(Debug, Clone, Default)]
pub struct Auxiliary {
    /// Known labels, overriding anything in the shared data.
    pub labels: Option<Vec<usize>>,
    /// Regression targets; required when reconstructing under MSE.
    pub targets: Option<Array2<f32>>,
}

struct RestartOutcome {
    best: Vec<f32>,
    best_loss: f32,
    iterations: usize,
    trajectory: Vec<(usize, f32)>,
}

/// The matching problem after validation: models built, targets resolved.
struct Problem<'a> {
    models: Vec<Sequential>,
    payloads: &'a [ModelPayload],
    shared: &'a [SharedData],
    targets: Array2<f32>,
    batch: usize,
    dim: usize,
    cap: usize,
    dryrun: bool,
}

/// Reconstructs user data from revealed gradients by first-order search.
#[derive(Debug, Clone)]
pub struct RecoveryOptimizer {
    cfg: RecoveryConfig,
}

impl RecoveryOptimizer {
    pub fn new(cfg: RecoveryConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.cfg
    }

    /// Runs the reconstruction.
    ///
    /// # Arguments
    /// * `payloads` - The model snapshots the user computed against.
    /// * `shared` - The matching revealed gradients, one per payload.
    /// * `aux` - Labels and/or targets the attacker already knows.
    ///
    /// # Returns
    /// The best candidate batch (one sample per row) and run statistics.
    ///
    /// # Errors
    /// `AttackErr` configuration errors for inconsistent inputs; numerical
    /// non-convergence is not an error.
    pub fn reconstruct(
        &self,
        payloads: &[ModelPayload],
        shared: &[SharedData],
        aux: &Auxiliary,
    ) -> Result<(Array2<f32>, RecoveryStats)> {
        self.validate(payloads, shared)?;
        let batch = shared[0].batch_size();
        let dim = payloads[0].arch().input_dim();
        let out_dim = payloads[0].arch().output_dim();

        let (targets, inferred) = self.resolve_targets(shared, aux, batch, out_dim)?;

        let cap = match self.cfg.dryrun_iterations {
            Some(dryrun) => dryrun.min(self.cfg.max_iterations),
            None => self.cfg.max_iterations,
        };
        let problem = Problem {
            models: payloads
                .iter()
                .map(|p| Sequential::from_spec(p.arch()))
                .collect(),
            payloads,
            shared,
            targets,
            batch,
            dim,
            cap,
            dryrun: self.cfg.dryrun_iterations.is_some(),
        };

        let restarts = self.cfg.restarts.max(1);
        log::info!(
            "reconstructing a batch of {batch} samples from {} payload(s), {restarts} restart(s), {cap} iteration cap",
            payloads.len()
        );

        let outcomes: Vec<RestartOutcome> = (0..restarts)
            .into_par_iter()
            .map(|restart| self.run_restart(&problem, restart))
            .collect::<Result<_>>()?;

        // Ties between restarts break toward the lower index, keeping the
        // winner independent of rayon's scheduling.
        let winner = outcomes
            .iter()
            .enumerate()
            .min_by(|(ia, a), (ib, b)| a.best_loss.total_cmp(&b.best_loss).then(ia.cmp(ib)))
            .map(|(i, _)| i)
            .unwrap_or(0);

        let restart_losses: Vec<f32> = outcomes.iter().map(|o| o.best_loss).collect();
        let outcome = &outcomes[winner];
        log::info!(
            "restart {winner} wins with objective {:.6} after {} iterations",
            outcome.best_loss,
            outcome.iterations
        );

        let mut candidate = Array2::zeros((batch, dim));
        for (slot, value) in candidate.iter_mut().zip(&outcome.best) {
            *slot = *value;
        }
        let stats = RecoveryStats::new(
            outcome.best_loss,
            outcome.iterations,
            restarts,
            restart_losses,
            outcome.trajectory.clone(),
            inferred,
        );
        Ok((candidate, stats))
    }

    fn validate(&self, payloads: &[ModelPayload], shared: &[SharedData]) -> Result<()> {
        if payloads.is_empty() {
            return Err(AttackErr::EmptyPayloadList);
        }
        if payloads.len() != shared.len() {
            return Err(AttackErr::ListSizeMismatch {
                payloads: payloads.len(),
                shared: shared.len(),
            });
        }

        let batch = shared[0].batch_size();
        let size = payloads[0].arch().size();
        let dim = payloads[0].arch().input_dim();
        for (payload, data) in payloads.iter().zip(shared) {
            data.validate_against(payload)?;
            if data.batch_size() != batch {
                return Err(AttackErr::BatchSizeMismatch {
                    got: data.batch_size(),
                    expected: batch,
                });
            }
            if payload.arch().size() != size || payload.arch().input_dim() != dim {
                return Err(MlErr::SizeMismatch {
                    what: "payload architecture",
                    got: payload.arch().size(),
                    expected: size,
                }
                .into());
            }
        }

        if let Some((c, h, w)) = self.cfg.image_shape {
            if c * h * w != dim {
                return Err(AttackErr::ImageShapeMismatch {
                    got: c * h * w,
                    expected: dim,
                });
            }
        }
        Ok(())
    }

    /// Builds the target matrix the user's loss was computed against, and
    /// reports labels when they had to be inferred.
    fn resolve_targets(
        &self,
        shared: &[SharedData],
        aux: &Auxiliary,
        batch: usize,
        out_dim: usize,
    ) -> Result<(Array2<f32>, Option<Vec<usize>>)> {
        match self.cfg.loss {
            Loss::CrossEntropy(_) => {
                if let Some(labels) = aux
                    .labels
                    .clone()
                    .or_else(|| shared[0].labels().map(<[usize]>::to_vec))
                {
                    if labels.len() != batch {
                        return Err(ProtocolErr::LabelCountMismatch {
                            got: labels.len(),
                            expected: batch,
                        }
                        .into());
                    }
                    Ok((one_hot(&labels, out_dim)?, None))
                } else {
                    // The flat layout always ends with the head's bias.
                    let grads = shared[0].gradients();
                    let head_bias = &grads[grads.len() - out_dim..];
                    let labels = infer_labels(head_bias, batch);
                    log::debug!("inferred labels from the head bias gradient: {labels:?}");
                    let targets = one_hot(&labels, out_dim)?;
                    Ok((targets, Some(labels)))
                }
            }
            Loss::Mse(_) => {
                let targets = aux.targets.clone().ok_or(AttackErr::MissingTargets)?;
                if targets.dim() != (batch, out_dim) {
                    return Err(MlErr::SizeMismatch {
                        what: "regression targets",
                        got: targets.len(),
                        expected: batch * out_dim,
                    }
                    .into());
                }
                Ok((targets, None))
            }
        }
    }

    fn run_restart(&self, problem: &Problem<'_>, restart: usize) -> Result<RestartOutcome> {
        let mut rng = StdRng::seed_from_u64(self.cfg.seed.wrapping_add(restart as u64));
        let shape = (problem.batch, problem.dim);
        let mut x: Vec<f32> = match self.cfg.init {
            Init::Randn => Array2::random_using(shape, StandardNormal, &mut rng)
                .into_iter()
                .collect(),
            Init::Uniform => (0..problem.batch * problem.dim)
                .map(|_| rng.random_range(-1.0..1.0))
                .collect(),
            Init::Zeros => vec![0.0; problem.batch * problem.dim],
        };
        self.clamp(&mut x);

        let mut adam = Adam::with_defaults(x.len(), self.cfg.learning_rate);
        let milestones = [
            problem.cap * 3 / 8,
            problem.cap * 5 / 8,
            problem.cap * 7 / 8,
        ];

        let mut best = x.clone();
        let mut best_loss = f32::INFINITY;
        let mut since_best = 0_usize;
        let mut iterations = 0;
        let mut trajectory = Vec::new();

        for it in 0..problem.cap {
            iterations = it + 1;
            let (loss, grad) = self.step_objective(problem, &x)?;

            // Snapshot before stepping; the last step may overshoot.
            if loss < best_loss {
                best_loss = loss;
                best.copy_from_slice(&x);
                since_best = 0;
            } else {
                since_best += 1;
            }

            if self.cfg.callback > 0 && it % self.cfg.callback == 0 {
                log::debug!("restart {restart} iteration {it}: objective {loss:.6}");
                trajectory.push((it, loss));
            }

            if !problem.dryrun {
                if let Some(threshold) = self.cfg.loss_threshold {
                    if loss <= threshold {
                        break;
                    }
                }
                if let Some(patience) = self.cfg.patience {
                    if since_best > patience {
                        break;
                    }
                }
            }

            adam.update_params(&grad, &mut x)?;
            self.clamp(&mut x);

            if milestones.contains(&(it + 1)) {
                adam.set_learning_rate(adam.learning_rate() * self.cfg.decay_factor);
            }
        }

        Ok(RestartOutcome {
            best,
            best_loss,
            iterations,
            trajectory,
        })
    }

    /// One objective evaluation: mean matching distance over all pairs plus
    /// the total variation prior, with the gradient w.r.t. the candidate.
    /// Averaging keeps `loss_threshold` meaningful regardless of how many
    /// payloads were observed.
    fn step_objective(&self, problem: &Problem<'_>, x: &[f32]) -> Result<(f32, Vec<f32>)> {
        let view = candidate_view(x, problem.batch, problem.dim);
        let mut total = 0.0;
        let mut grad = Array2::zeros((problem.batch, problem.dim));

        for (model, (payload, data)) in problem
            .models
            .iter()
            .zip(problem.payloads.iter().zip(problem.shared))
        {
            let trace = model.trace(payload.params(), view)?;
            let mut candidate_grads = vec![0.0; model.size()];
            let backward = model.backward(
                payload.params(),
                &trace,
                problem.targets.view(),
                &self.cfg.loss,
                &mut candidate_grads,
            )?;
            let (value, upstream) = self
                .cfg
                .distance
                .value_and_grad(&candidate_grads, data.gradients());
            let pulled = objective::input_adjoint(
                model,
                payload.params(),
                &trace,
                &backward,
                &upstream,
                &self.cfg.loss,
            )?;
            total += value;
            grad += &pulled;
        }
        let pairs = problem.models.len() as f32;
        total /= pairs;
        grad.mapv_inplace(|g| g / pairs);

        if self.cfg.tv_weight > 0.0 {
            let shape = self.cfg.image_shape.unwrap_or((1, 1, problem.dim));
            let (tv, tv_grad) = objective::total_variation(view, shape);
            total += self.cfg.tv_weight * tv;
            grad.scaled_add(self.cfg.tv_weight, &tv_grad);
        }

        Ok((total, grad.into_iter().collect()))
    }

    fn clamp(&self, x: &mut [f32]) {
        if let Some((lo, hi)) = self.cfg.clamp {
            for value in x.iter_mut() {
                *value = value.clamp(lo, hi);
            }
        }
    }
}

/// Views a flat candidate as a batch matrix. The slice is sized
/// `batch * dim` by construction, so the shape always fits.
fn candidate_view(x: &[f32], batch: usize, dim: usize) -> ArrayView2<'_, f32> {
    ArrayView2::from_shape((batch, dim), x).unwrap()
}

fn one_hot(labels: &[usize], classes: usize) -> Result<Array2<f32>> {
    let mut targets = Array2::zeros((labels.len(), classes));
    for (row, &label) in labels.iter().enumerate() {
        if label >= classes {
            return Err(MlErr::InvalidDim {
                what: "label class",
                got: label,
            }
            .into());
        }
        targets[(row, label)] = 1.0;
    }
    Ok(targets)
}
