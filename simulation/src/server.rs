use attacks::assembler::{MaliciousModel, assemble};
use attacks::imprint::Measurement;
use machine_learning::arch::ArchSpec;
use protocol::{ModelPayload, PayloadMetadata, param_records};
use rand::{SeedableRng, rngs::StdRng};

use crate::Result;

/// The server role: owns the global model and hands out payload snapshots.
///
/// An honest server distributes its parameters as-is. A malicious one splices
/// a measurement block in front first, keeping the assembled model around so
/// the gradients it later receives can be cut apart and inverted.
pub struct Server {
    arch: ArchSpec,
    params: Vec<f32>,
    round: u32,
}

impl Server {
    /// Creates a server with freshly initialized parameters.
    pub fn new(arch: ArchSpec, seed: u64) -> Self {
        let params = arch.init_params(&mut StdRng::seed_from_u64(seed));
        Self {
            arch,
            params,
            round: 0,
        }
    }

    pub fn arch(&self) -> &ArchSpec {
        &self.arch
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// Distributes the honest model; every record is trainable.
    pub fn distribute(&mut self) -> Result<ModelPayload> {
        self.round += 1;
        let metadata = PayloadMetadata {
            architecture: self.arch.name().to_string(),
            round: self.round,
        };
        let payload = ModelPayload::new(
            self.arch.clone(),
            self.params.clone(),
            param_records(&self.arch, true),
            metadata,
        )?;
        log::info!(
            "round {}: distributing honest payload '{}'",
            self.round,
            self.arch.name()
        );
        Ok(payload)
    }

    /// Distributes a model with a measurement block spliced in front.
    ///
    /// The block itself stays with the caller; it is what inverts the
    /// gradients later.
    ///
    /// # Returns
    /// The payload to send plus the assembled model the attacker keeps.
    pub fn distribute_malicious(
        &mut self,
        block: &dyn Measurement,
    ) -> Result<(ModelPayload, MaliciousModel)> {
        self.round += 1;
        let model = assemble(&self.arch, &self.params, block)?;
        let payload = model.to_payload(self.round)?;
        log::info!(
            "round {}: distributing malicious payload '{}' with {} bins",
            self.round,
            model.arch().name(),
            block.config().num_bins()
        );
        Ok((payload, model))
    }
}
