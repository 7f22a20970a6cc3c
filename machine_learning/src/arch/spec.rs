use rand::Rng;

use super::activations::ActFn;
use super::layers::{Bins, Dense, Layer};
use crate::{MlErr, Result};

/// A declarative layer description.
///
/// Specs are what travels inside a model payload: they are cheap to clone,
/// carry no parameters and can be turned into compute layers on any side of
/// the protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerSpec {
    Dense {
        inputs: usize,
        outputs: usize,
        act: ActFn,
    },
    Bins {
        inputs: usize,
        bins: usize,
        disjoint: bool,
    },
}

impl LayerSpec {
    pub fn in_dim(&self) -> usize {
        match self {
            LayerSpec::Dense { inputs, .. } | LayerSpec::Bins { inputs, .. } => *inputs,
        }
    }

    pub fn out_dim(&self) -> usize {
        match self {
            LayerSpec::Dense { outputs, .. } => *outputs,
            LayerSpec::Bins { bins, .. } => *bins,
        }
    }

    /// The amount of parameters of the described layer: `(in + 1) * out`.
    pub fn size(&self) -> usize {
        (self.in_dim() + 1) * self.out_dim()
    }

    fn validate(&self) -> Result<()> {
        if self.in_dim() == 0 {
            return Err(MlErr::InvalidDim {
                what: "layer inputs",
                got: 0,
            });
        }
        if self.out_dim() == 0 {
            return Err(MlErr::InvalidDim {
                what: "layer outputs",
                got: 0,
            });
        }
        Ok(())
    }

    fn build(&self) -> Layer {
        match *self {
            LayerSpec::Dense {
                inputs,
                outputs,
                act,
            } => Layer::Dense(Dense::new((inputs, outputs), act)),
            LayerSpec::Bins {
                inputs,
                bins,
                disjoint,
            } => Layer::Bins(Bins::new(inputs, bins, disjoint)),
        }
    }
}

/// An ordered architecture description.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchSpec {
    name: String,
    layers: Vec<LayerSpec>,
}

impl ArchSpec {
    /// Creates a new `ArchSpec`, validating dimensions and layer chaining.
    ///
    /// # Arguments
    /// * `name` - A human readable architecture identifier.
    /// * `layers` - The ordered layer descriptions.
    ///
    /// # Errors
    /// `MlErr::EmptyModel` for an empty layer list, `MlErr::InvalidDim` for a
    /// non-positive dimension and `MlErr::DisconnectedLayers` when consecutive
    /// layers don't chain.
    pub fn new<I>(name: impl Into<String>, layers: I) -> Result<Self>
    where
        I: IntoIterator<Item = LayerSpec>,
    {
        let layers: Vec<_> = layers.into_iter().collect();
        if layers.is_empty() {
            return Err(MlErr::EmptyModel);
        }

        for (i, layer) in layers.iter().enumerate() {
            layer.validate()?;
            if i > 0 && layers[i - 1].out_dim() != layer.in_dim() {
                return Err(MlErr::DisconnectedLayers {
                    layer: i,
                    got: layers[i - 1].out_dim(),
                    expected: layer.in_dim(),
                });
            }
        }

        Ok(Self {
            name: name.into(),
            layers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layers(&self) -> &[LayerSpec] {
        &self.layers
    }

    /// The total amount of scalar parameters of this architecture.
    pub fn size(&self) -> usize {
        self.layers.iter().map(LayerSpec::size).sum()
    }

    pub fn input_dim(&self) -> usize {
        self.layers[0].in_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.layers[self.layers.len() - 1].out_dim()
    }

    /// Builds the compute layers described by this spec.
    pub(crate) fn build(&self) -> Vec<Layer> {
        self.layers.iter().map(LayerSpec::build).collect()
    }

    /// Samples a fresh flat parameter vector, Xavier-uniform per layer.
    ///
    /// # Arguments
    /// * `rng` - The random source; seed it for reproducible models.
    pub fn init_params<R: Rng>(&self, rng: &mut R) -> Vec<f32> {
        let mut params = Vec::with_capacity(self.size());
        for layer in &self.layers {
            let (fan_in, fan_out) = (layer.in_dim(), layer.out_dim());
            let limit = (6.0 / (fan_in + fan_out) as f32).sqrt();
            for _ in 0..fan_in * fan_out {
                params.push(rng.random_range(-limit..limit));
            }
            // Biases start at zero.
            params.extend(std::iter::repeat_n(0.0, fan_out));
        }
        params
    }
}
