use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};

use super::{Bins, Dense};
use crate::{MlErr, Result};

/// The layers a model can be composed of.
#[derive(Debug, Clone)]
pub enum Layer {
    Dense(Dense),
    Bins(Bins),
}
use Layer::*;

impl Layer {
    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        match self {
            Dense(l) => l.size(),
            Bins(l) => l.size(),
        }
    }

    pub fn in_dim(&self) -> usize {
        match self {
            Dense(l) => l.in_dim(),
            Bins(l) => l.in_dim(),
        }
    }

    pub fn out_dim(&self) -> usize {
        match self {
            Dense(l) => l.out_dim(),
            Bins(l) => l.out_dim(),
        }
    }

    /// Computes the pre-activation `x · W + b`.
    ///
    /// # Errors
    /// Returns `MlErr::SizeMismatch` if the parameter slice or the input width
    /// doesn't match this layer.
    pub fn affine(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        if params.len() != self.size() {
            return Err(MlErr::SizeMismatch {
                what: "layer params",
                got: params.len(),
                expected: self.size(),
            });
        }
        if x.ncols() != self.in_dim() {
            return Err(MlErr::SizeMismatch {
                what: "layer input",
                got: x.ncols(),
                expected: self.in_dim(),
            });
        }

        Ok(match self {
            Dense(l) => l.affine(params, x),
            Bins(l) => l.affine(params, x),
        })
    }

    /// Applies the layer's nonlinearity to a pre-activation.
    pub fn activate(&self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Dense(l) => l.activate(z),
            Bins(l) => l.activate(z),
        }
    }

    /// Full layer application.
    pub fn forward(&self, params: &[f32], x: ArrayView2<f32>) -> Result<Array2<f32>> {
        Ok(self.activate(&self.affine(params, x)?))
    }

    /// Derivative of the nonlinearity at `z` (the gate mask for `Bins`).
    pub fn dact(&self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Dense(l) => l.dact(z),
            Bins(l) => l.dact(z),
        }
    }

    /// Second derivative of the nonlinearity at `z`.
    pub fn ddact(&self, z: &Array2<f32>) -> Array2<f32> {
        match self {
            Dense(l) => l.ddact(z),
            Bins(l) => l.ddact(z),
        }
    }

    /// Views this layer's parameter slice as `(W, b)`.
    pub fn view_params<'a>(&self, params: &'a [f32]) -> (ArrayView2<'a, f32>, ArrayView1<'a, f32>) {
        match self {
            Dense(l) => l.view_params(params),
            Bins(l) => l.view_params(params),
        }
    }

    /// Views this layer's gradient slice as `(dW, db)`.
    pub fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> (ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>) {
        match self {
            Dense(l) => l.view_grad(grad),
            Bins(l) => l.view_grad(grad),
        }
    }
}
