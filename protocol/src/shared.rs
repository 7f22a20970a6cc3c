use ndarray::Array2;

use crate::{ModelPayload, ProtocolErr, Result};

/// What a user reveals after a local computation step: the gradient of its
/// private batch, optionally the labels, and the batch size.
///
/// Gradients are flat and ordered to match the payload's parameter records.
/// A `SharedData` is produced once and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct SharedData {
    gradients: Vec<f32>,
    labels: Option<Vec<usize>>,
    batch_size: usize,
}

impl SharedData {
    /// Creates a new `SharedData`.
    ///
    /// # Errors
    /// `ProtocolErr::EmptyBatch` for a zero batch size and
    /// `ProtocolErr::LabelCountMismatch` when labels don't match it.
    pub fn new(gradients: Vec<f32>, labels: Option<Vec<usize>>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(ProtocolErr::EmptyBatch);
        }
        if let Some(labels) = &labels {
            if labels.len() != batch_size {
                return Err(ProtocolErr::LabelCountMismatch {
                    got: labels.len(),
                    expected: batch_size,
                });
            }
        }

        Ok(Self {
            gradients,
            labels,
            batch_size,
        })
    }

    pub fn gradients(&self) -> &[f32] {
        &self.gradients
    }

    pub fn labels(&self) -> Option<&[usize]> {
        self.labels.as_deref()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Checks that this shared data could have been produced from `payload`.
    ///
    /// # Errors
    /// `ProtocolErr::GradientSizeMismatch` when the gradient vector doesn't
    /// match the payload's parameter count.
    pub fn validate_against(&self, payload: &ModelPayload) -> Result<()> {
        if self.gradients.len() != payload.params().len() {
            return Err(ProtocolErr::GradientSizeMismatch {
                got: self.gradients.len(),
                expected: payload.params().len(),
            });
        }
        Ok(())
    }
}

/// The ground truth a user keeps to itself. Only the evaluation side ever
/// sees this; it must never reach the attacker.
#[derive(Debug, Clone)]
pub struct TrueData {
    pub inputs: Array2<f32>,
    pub labels: Vec<usize>,
}
