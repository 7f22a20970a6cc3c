use machine_learning::arch::Sequential;
use machine_learning::arch::loss::Loss;
use machine_learning::optimization::{GradientDescent, Optimizer};
use ndarray::Array2;
use protocol::{ModelPayload, SharedData, TrueData};

use crate::{Result, SimErr};

/// The user role: holds a private batch and follows the protocol honestly.
///
/// Honest here means the user computes exactly what it is asked to compute;
/// the attack works *because* of that, not despite it.
pub struct User {
    data: TrueData,
    loss: Loss,
    share_labels: bool,
}

impl User {
    pub fn new(data: TrueData, loss: Loss) -> Self {
        Self {
            data,
            loss,
            share_labels: false,
        }
    }

    /// Whether the revealed updates include the batch labels. Off by default;
    /// the attacker then has to infer them.
    pub fn with_shared_labels(mut self, share: bool) -> Self {
        self.share_labels = share;
        self
    }

    pub fn data(&self) -> &TrueData {
        &self.data
    }

    /// Computes the gradient of the private batch under the payload's model.
    pub fn compute_local_updates(&self, payload: &ModelPayload) -> Result<SharedData> {
        let grads = self.gradients(payload)?;
        let labels = self.share_labels.then(|| self.data.labels.clone());
        let shared = SharedData::new(grads, labels, self.data.inputs.nrows())?;
        log::debug!(
            "computed local updates for a batch of {}",
            self.data.inputs.nrows()
        );
        Ok(shared)
    }

    /// One local SGD step, returning the updated parameters.
    ///
    /// Records flagged non-trainable are skipped, exactly as an honest
    /// training loop would treat frozen layers.
    pub fn local_step(&self, payload: &ModelPayload, learning_rate: f32) -> Result<Vec<f32>> {
        let grads = self.gradients(payload)?;
        let mut params = payload.params().to_vec();
        let mut sgd = GradientDescent::new(learning_rate);
        for record in payload.records() {
            if !record.trainable {
                continue;
            }
            let range = record.range();
            sgd.update_params(&grads[range.clone()], &mut params[range])?;
        }
        Ok(params)
    }

    fn gradients(&self, payload: &ModelPayload) -> Result<Vec<f32>> {
        let classes = payload.arch().output_dim();
        let targets = self.one_hot(classes)?;
        let net = Sequential::from_spec(payload.arch());
        let trace = net.trace(payload.params(), self.data.inputs.view())?;
        let mut grads = vec![0.0; net.size()];
        net.backward(
            payload.params(),
            &trace,
            targets.view(),
            &self.loss,
            &mut grads,
        )?;
        Ok(grads)
    }

    fn one_hot(&self, classes: usize) -> Result<Array2<f32>> {
        let mut targets = Array2::zeros((self.data.labels.len(), classes));
        for (row, &label) in self.data.labels.iter().enumerate() {
            if label >= classes {
                return Err(SimErr::LabelOutOfRange { label, classes });
            }
            targets[(row, label)] = 1.0;
        }
        Ok(targets)
    }
}
