//! Splicing a measurement block in front of an honest architecture.

use machine_learning::MlErr;
use machine_learning::arch::{ArchSpec, LayerSpec, activations::ActFn};
use ndarray::{Array1, Array2};
use protocol::{ModelPayload, ParamRecord, PayloadMetadata, param_records};

use crate::imprint::{BinGradients, Measurement};
use crate::{AttackErr, Result};

/// Locates a measurement block's gradients inside a flat gradient buffer.
///
/// The handle outlives the boxed block, so the server can hand it to the
/// inversion side without keeping the assembler's inputs around.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHandle {
    input_dim: usize,
    bins: usize,
    model_size: usize,
}

impl BlockHandle {
    /// Cuts the block's weight and bias gradients out of a full flat gradient.
    ///
    /// # Errors
    /// `ProtocolErr::GradientSizeMismatch` when `grads` doesn't cover the
    /// assembled model.
    pub fn slice_gradients(&self, grads: &[f32]) -> Result<BinGradients> {
        if grads.len() != self.model_size {
            return Err(protocol::ProtocolErr::GradientSizeMismatch {
                got: grads.len(),
                expected: self.model_size,
            }
            .into());
        }
        let w_len = self.input_dim * self.bins;
        let weight =
            Array2::from_shape_fn((self.input_dim, self.bins), |(i, k)| grads[i * self.bins + k]);
        let bias = Array1::from_iter(grads[w_len..w_len + self.bins].iter().copied());
        Ok(BinGradients { weight, bias })
    }

    pub fn bins(&self) -> usize {
        self.bins
    }
}

/// An architecture with a measurement block spliced in front, plus everything
/// needed to distribute and later invert it.
#[derive(Debug, Clone)]
pub struct MaliciousModel {
    arch: ArchSpec,
    params: Vec<f32>,
    records: Vec<ParamRecord>,
    handle: BlockHandle,
}

impl MaliciousModel {
    pub fn arch(&self) -> &ArchSpec {
        &self.arch
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn records(&self) -> &[ParamRecord] {
        &self.records
    }

    pub fn handle(&self) -> BlockHandle {
        self.handle
    }

    /// Wraps the model into a distributable payload.
    ///
    /// # Errors
    /// `ProtocolErr` variants when the assembled buffers are inconsistent;
    /// `assemble` never produces such a model.
    pub fn to_payload(&self, round: u32) -> Result<ModelPayload> {
        let metadata = PayloadMetadata {
            architecture: self.arch.name().to_string(),
            round,
        };
        Ok(ModelPayload::new(
            self.arch.clone(),
            self.params.clone(),
            self.records.clone(),
            metadata,
        )?)
    }
}

/// Splices `block` and its decoder in front of `base`.
///
/// The assembled model computes `base(decode(bins(x)))`:
/// * the bins layer is the block's crafted layer,
/// * the decoder is an identity-activation dense layer whose rows all equal
///   `direction / K`, re-embedding bin activations into the base input space.
///
/// The shared decoder row is what makes the inversion identities hold: during
/// backprop every sample's bias gradient coefficient is the same across all of
/// its active bins, so adjacent bins cancel exactly.
///
/// Block and decoder records are flagged non-trainable; the base records stay
/// trainable.
///
/// # Arguments
/// * `base` - The honest architecture the block is hidden in front of.
/// * `base_params` - Flat parameters for `base`.
/// * `block` - The crafted measurement block.
///
/// # Errors
/// `AttackErr::BlockInputMismatch` when the block and `base` disagree on the
/// input width, `MlErr::SizeMismatch` when `base_params` doesn't cover `base`.
pub fn assemble(
    base: &ArchSpec,
    base_params: &[f32],
    block: &dyn Measurement,
) -> Result<MaliciousModel> {
    let dim = block.config().input_dim();
    let bins = block.config().num_bins();
    if base.input_dim() != dim {
        return Err(AttackErr::BlockInputMismatch {
            got: base.input_dim(),
            expected: dim,
        });
    }
    if base_params.len() != base.size() {
        return Err(MlErr::SizeMismatch {
            what: "base parameters",
            got: base_params.len(),
            expected: base.size(),
        }
        .into());
    }

    let mut layers = Vec::with_capacity(base.layers().len() + 2);
    layers.push(block.layer_spec());
    layers.push(LayerSpec::Dense {
        inputs: bins,
        outputs: dim,
        act: ActFn::Identity,
    });
    layers.extend(base.layers().iter().cloned());
    let arch = ArchSpec::new(format!("{}+imprint", base.name()), layers)?;

    let mut params = block.layer_params();
    params.reserve(arch.size() - params.len());
    let scale = 1.0 / bins as f32;
    let direction = block.direction();
    for _ in 0..bins {
        params.extend(direction.iter().map(|v| v * scale));
    }
    params.extend(std::iter::repeat_n(0.0, dim));
    params.extend_from_slice(base_params);

    let mut records = param_records(&arch, true);
    // First two layers are the measurement apparatus.
    for record in records.iter_mut().take(4) {
        record.trainable = false;
    }

    let handle = BlockHandle {
        input_dim: dim,
        bins,
        model_size: arch.size(),
    };

    Ok(MaliciousModel {
        arch,
        params,
        records,
        handle,
    })
}

/// Reconstructs the decoder weight matrix of an assembled model; handy for
/// debugging what the base network actually sees.
pub fn decoder_weights(model: &MaliciousModel) -> Array2<f32> {
    let bins = model.handle.bins;
    let dim = model.handle.input_dim;
    let offset = (dim + 1) * bins;
    Array2::from_shape_fn((bins, dim), |(k, i)| model.params[offset + k * dim + i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imprint::{BinConfig, BlockVariant};

    fn base() -> (ArchSpec, Vec<f32>) {
        let arch = ArchSpec::new(
            "toy",
            [
                LayerSpec::Dense {
                    inputs: 3,
                    outputs: 4,
                    act: ActFn::Relu,
                },
                LayerSpec::Dense {
                    inputs: 4,
                    outputs: 2,
                    act: ActFn::Identity,
                },
            ],
        )
        .unwrap();
        let params = vec![0.05; arch.size()];
        (arch, params)
    }

    #[test]
    fn assembled_model_chains_block_decoder_base() {
        let (arch, params) = base();
        let block = BlockVariant::Plain
            .build(BinConfig::new(3, 6).unwrap(), 1)
            .unwrap();
        let model = assemble(&arch, &params, block.as_ref()).unwrap();

        assert_eq!(model.arch().layers().len(), 4);
        assert_eq!(model.arch().input_dim(), 3);
        assert_eq!(model.arch().output_dim(), 2);
        assert_eq!(model.params().len(), model.arch().size());

        // Block params head the buffer untouched.
        assert_eq!(&model.params()[..(3 + 1) * 6], &block.layer_params()[..]);
    }

    #[test]
    fn apparatus_records_are_frozen() {
        let (arch, params) = base();
        let block = BlockVariant::Sparse
            .build(BinConfig::new(3, 6).unwrap(), 1)
            .unwrap();
        let model = assemble(&arch, &params, block.as_ref()).unwrap();

        let records = model.records();
        assert_eq!(records[0].name, "bins0.weight");
        assert!(records.iter().take(4).all(|r| !r.trainable));
        assert!(records.iter().skip(4).all(|r| r.trainable));
    }

    #[test]
    fn decoder_rows_share_the_scaled_direction() {
        let (arch, params) = base();
        let block = BlockVariant::Differential
            .build(BinConfig::new(3, 6).unwrap(), 1)
            .unwrap();
        let model = assemble(&arch, &params, block.as_ref()).unwrap();

        let w = decoder_weights(&model);
        assert_eq!(w.dim(), (6, 3));
        for row in w.rows() {
            for (got, want) in row.iter().zip(block.direction().iter()) {
                assert!((got - want / 6.0).abs() < 1e-7);
            }
        }
    }

    #[test]
    fn handle_slices_the_block_gradients() {
        let (arch, params) = base();
        let block = BlockVariant::Plain
            .build(BinConfig::new(3, 2).unwrap(), 1)
            .unwrap();
        let model = assemble(&arch, &params, block.as_ref()).unwrap();

        let mut grads = vec![0.0; model.arch().size()];
        for (i, g) in grads.iter_mut().take(3 * 2 + 2).enumerate() {
            *g = i as f32;
        }
        let sliced = model.handle().slice_gradients(&grads).unwrap();
        assert_eq!(sliced.weight[[0, 0]], 0.0);
        assert_eq!(sliced.weight[[0, 1]], 1.0);
        assert_eq!(sliced.weight[[2, 1]], 5.0);
        assert_eq!(sliced.bias[0], 6.0);
        assert_eq!(sliced.bias[1], 7.0);

        assert!(model.handle().slice_gradients(&grads[1..]).is_err());
    }

    #[test]
    fn mismatched_input_width_is_rejected() {
        let (arch, params) = base();
        let block = BlockVariant::Plain
            .build(BinConfig::new(5, 6).unwrap(), 1)
            .unwrap();
        assert!(matches!(
            assemble(&arch, &params, block.as_ref()),
            Err(AttackErr::BlockInputMismatch { .. })
        ));
    }
}
