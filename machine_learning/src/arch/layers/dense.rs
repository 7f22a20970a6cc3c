use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};

use crate::arch::activations::ActFn;

/// A fully connected layer computing `act(x · W + b)`.
///
/// The layer owns no parameters: it interprets a flat `f32` slice as
/// `[W row-major | b]`, so parameter storage, sharing and updates stay
/// outside of the architecture.
#[derive(Debug, Clone)]
pub struct Dense {
    dim: (usize, usize),
    act: ActFn,
    size: usize,
}

impl Dense {
    /// Creates a new `Dense`.
    ///
    /// # Arguments
    /// * `dim` - The `(inputs, outputs)` dimension pair.
    /// * `act` - The activation applied on top of the affine map.
    pub fn new(dim: (usize, usize), act: ActFn) -> Self {
        Self {
            dim,
            act,
            size: (dim.0 + 1) * dim.1,
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_dim(&self) -> usize {
        self.dim.0
    }

    pub fn out_dim(&self) -> usize {
        self.dim.1
    }

    pub fn act(&self) -> ActFn {
        self.act
    }

    /// Computes the pre-activation `x · W + b`.
    pub fn affine(&self, params: &[f32], x: ArrayView2<f32>) -> Array2<f32> {
        let (w, b) = self.view_params(params);
        x.dot(&w) + &b
    }

    /// Applies the activation pointwise.
    pub fn activate(&self, z: &Array2<f32>) -> Array2<f32> {
        z.mapv(|v| self.act.f(v))
    }

    /// First derivative of the activation, evaluated at the pre-activation.
    pub fn dact(&self, z: &Array2<f32>) -> Array2<f32> {
        z.mapv(|v| self.act.df(v))
    }

    /// Second derivative of the activation, evaluated at the pre-activation.
    pub fn ddact(&self, z: &Array2<f32>) -> Array2<f32> {
        z.mapv(|v| self.act.ddf(v))
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    ///
    /// # Arguments
    /// * `params` - This layer's slice of parameters, of length `size()`.
    ///
    /// # Returns
    /// A tuple containing the weights and biases.
    pub fn view_params<'a>(&self, params: &'a [f32]) -> (ArrayView2<'a, f32>, ArrayView1<'a, f32>) {
        let w_size = self.size - self.dim.1;
        let weights = ArrayView2::from_shape(self.dim, &params[..w_size]).unwrap();
        let biases = ArrayView1::from_shape(self.dim.1, &params[w_size..]).unwrap();
        (weights, biases)
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    pub fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> (ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>) {
        let w_size = self.size - self.dim.1;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape(self.dim, dw_raw).unwrap();
        let db = ArrayViewMut1::from_shape(self.dim.1, db_raw).unwrap();
        (dw, db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn affine_matches_manual_computation() {
        let layer = Dense::new((2, 2), ActFn::Identity);
        // W = [[1, 2], [3, 4]], b = [10, 20]
        let params = [1.0, 2.0, 3.0, 4.0, 10.0, 20.0];
        let x = array![[1.0, 1.0], [0.0, 2.0]];

        let z = layer.affine(&params, x.view());
        assert_eq!(z, array![[14.0, 26.0], [16.0, 28.0]]);
    }

    #[test]
    fn relu_activation_clamps_negatives() {
        let layer = Dense::new((1, 2), ActFn::Relu);
        let z = array![[-1.0, 2.0]];
        assert_eq!(layer.activate(&z), array![[0.0, 2.0]]);
        assert_eq!(layer.dact(&z), array![[0.0, 1.0]]);
    }
}
