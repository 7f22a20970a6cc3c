use machine_learning::arch::{ArchSpec, LayerSpec};

use crate::{ProtocolErr, Result};

/// One named parameter tensor inside a flat parameter buffer.
///
/// The `trainable` flag is the mechanism behind "measurement apparatus"
/// layers: a record flagged non-trainable still produces gradients (that is
/// the whole point of the attack) but any honest update step must skip it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRecord {
    pub name: String,
    pub offset: usize,
    pub len: usize,
    pub trainable: bool,
}

impl ParamRecord {
    /// The record's range inside the flat buffer.
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Builds the ordered weight/bias records for an architecture.
///
/// Tensors are named `dense<i>.weight` / `dense<i>.bias` (or `bins<i>.*`),
/// offsets follow the flat `[W | b]` per-layer layout.
pub fn param_records(arch: &ArchSpec, trainable: bool) -> Vec<ParamRecord> {
    let mut records = Vec::with_capacity(arch.layers().len() * 2);
    let mut offset = 0;
    for (i, layer) in arch.layers().iter().enumerate() {
        let kind = match layer {
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::Bins { .. } => "bins",
        };
        let w_len = layer.in_dim() * layer.out_dim();
        records.push(ParamRecord {
            name: format!("{kind}{i}.weight"),
            offset,
            len: w_len,
            trainable,
        });
        records.push(ParamRecord {
            name: format!("{kind}{i}.bias"),
            offset: offset + w_len,
            len: layer.out_dim(),
            trainable,
        });
        offset += layer.size();
    }
    records
}

/// Free-form payload context distributed alongside the parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayloadMetadata {
    pub architecture: String,
    pub round: u32,
}

/// An immutable snapshot of a model, as handed from the server to a user.
///
/// Once distributed the payload is conceptually shared read-only between the
/// user and the attacker; nothing in the crate mutates one after creation.
#[derive(Debug, Clone)]
pub struct ModelPayload {
    arch: ArchSpec,
    params: Vec<f32>,
    buffers: Vec<f32>,
    records: Vec<ParamRecord>,
    metadata: PayloadMetadata,
}

impl ModelPayload {
    /// Creates a new `ModelPayload`.
    ///
    /// # Arguments
    /// * `arch` - The architecture description.
    /// * `params` - The flat parameter values, in `arch` order.
    /// * `records` - Named per-tensor records covering `params`.
    /// * `metadata` - Round and naming context.
    ///
    /// # Errors
    /// `ProtocolErr::GradientSizeMismatch` when `params` doesn't match the
    /// architecture size, `ProtocolErr::RecordsOutOfBounds` when a record
    /// points past the buffer.
    pub fn new(
        arch: ArchSpec,
        params: Vec<f32>,
        records: Vec<ParamRecord>,
        metadata: PayloadMetadata,
    ) -> Result<Self> {
        if params.len() != arch.size() {
            return Err(ProtocolErr::GradientSizeMismatch {
                got: params.len(),
                expected: arch.size(),
            });
        }
        for record in &records {
            if record.range().end > params.len() {
                return Err(ProtocolErr::RecordsOutOfBounds {
                    record: record.name.clone(),
                    end: record.range().end,
                    len: params.len(),
                });
            }
        }

        Ok(Self {
            arch,
            params,
            buffers: Vec::new(),
            records,
            metadata,
        })
    }

    pub fn arch(&self) -> &ArchSpec {
        &self.arch
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    /// Auxiliary non-parameter state (e.g. normalization statistics). Unused
    /// by the supported layer set but part of the payload contract.
    pub fn buffers(&self) -> &[f32] {
        &self.buffers
    }

    pub fn records(&self) -> &[ParamRecord] {
        &self.records
    }

    pub fn metadata(&self) -> &PayloadMetadata {
        &self.metadata
    }

    /// Looks a record up by tensor name.
    pub fn record(&self, name: &str) -> Option<&ParamRecord> {
        self.records.iter().find(|r| r.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use machine_learning::arch::LayerSpec;
    use machine_learning::arch::activations::ActFn;

    fn arch() -> ArchSpec {
        ArchSpec::new(
            "toy",
            [
                LayerSpec::Bins {
                    inputs: 2,
                    bins: 3,
                    disjoint: false,
                },
                LayerSpec::Dense {
                    inputs: 3,
                    outputs: 2,
                    act: ActFn::Identity,
                },
            ],
        )
        .unwrap()
    }

    #[test]
    fn records_cover_the_whole_buffer_in_order() {
        let arch = arch();
        let records = param_records(&arch, true);
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].name, "bins0.weight");
        assert_eq!(records[1].name, "bins0.bias");
        assert_eq!(records[2].name, "dense1.weight");
        assert_eq!(records[3].name, "dense1.bias");

        let mut offset = 0;
        for record in &records {
            assert_eq!(record.offset, offset);
            offset += record.len;
        }
        assert_eq!(offset, arch.size());
    }

    #[test]
    fn payload_rejects_wrong_param_count() {
        let arch = arch();
        let records = param_records(&arch, true);
        let res = ModelPayload::new(arch, vec![0.0; 3], records, PayloadMetadata::default());
        assert!(matches!(
            res,
            Err(ProtocolErr::GradientSizeMismatch { .. })
        ));
    }

    #[test]
    fn record_lookup_by_name() {
        let arch = arch();
        let params = vec![0.0; arch.size()];
        let records = param_records(&arch, true);
        let payload =
            ModelPayload::new(arch, params, records, PayloadMetadata::default()).unwrap();
        assert!(payload.record("bins0.bias").is_some());
        assert!(payload.record("nope").is_none());
    }
}
