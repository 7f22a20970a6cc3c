use ndarray::{Array2, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2};

/// A binned measurement layer: `relu(x · W + b)` where every output is one
/// "bin" of a projected scalar range.
///
/// With `disjoint` set, bin `k` is additionally gated off whenever bin `k + 1`
/// is active, so a sample only ever lights up the single bin whose interval
/// contains its projection. The gate is piecewise constant, which keeps the
/// layer piecewise linear: the activation derivative is the cached mask and
/// the second derivative vanishes.
///
/// The layer is pure mechanism. Choosing projection directions and bin
/// thresholds that make the gradients invertible is the caller's business.
#[derive(Debug, Clone)]
pub struct Bins {
    inputs: usize,
    bins: usize,
    disjoint: bool,
    size: usize,
}

impl Bins {
    /// Creates a new `Bins` layer.
    ///
    /// # Arguments
    /// * `inputs` - Input dimension.
    /// * `bins` - Amount of bins (output dimension).
    /// * `disjoint` - Whether a sample activates only its own bin.
    pub fn new(inputs: usize, bins: usize, disjoint: bool) -> Self {
        Self {
            inputs,
            bins,
            disjoint,
            size: (inputs + 1) * bins,
        }
    }

    /// Returns the amount of parameters this layer has.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn in_dim(&self) -> usize {
        self.inputs
    }

    pub fn out_dim(&self) -> usize {
        self.bins
    }

    pub fn disjoint(&self) -> bool {
        self.disjoint
    }

    /// Computes the pre-activation `x · W + b`.
    pub fn affine(&self, params: &[f32], x: ArrayView2<f32>) -> Array2<f32> {
        let (w, b) = self.view_params(params);
        x.dot(&w) + &b
    }

    /// The gate mask: 1 where a bin fires, 0 elsewhere.
    pub fn mask(&self, z: &Array2<f32>) -> Array2<f32> {
        let mut mask = z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
        if self.disjoint {
            for mut row in mask.rows_mut() {
                for k in 0..self.bins.saturating_sub(1) {
                    if row[k + 1] > 0.0 {
                        row[k] = 0.0;
                    }
                }
            }
        }
        mask
    }

    /// Applies the gated rectifier.
    pub fn activate(&self, z: &Array2<f32>) -> Array2<f32> {
        self.mask(z) * z
    }

    /// Activation derivative; equals the gate mask since the layer is
    /// piecewise linear in `z`.
    pub fn dact(&self, z: &Array2<f32>) -> Array2<f32> {
        self.mask(z)
    }

    pub fn ddact(&self, z: &Array2<f32>) -> Array2<f32> {
        Array2::zeros(z.dim())
    }

    /// Gives a view of the raw parameter slice as the weights and biases of this layer.
    pub fn view_params<'a>(&self, params: &'a [f32]) -> (ArrayView2<'a, f32>, ArrayView1<'a, f32>) {
        let w_size = self.size - self.bins;
        let weights = ArrayView2::from_shape((self.inputs, self.bins), &params[..w_size]).unwrap();
        let biases = ArrayView1::from_shape(self.bins, &params[w_size..]).unwrap();
        (weights, biases)
    }

    /// Gives a view of the raw gradient slice as the delta weights and delta biases of this layer.
    pub fn view_grad<'a>(
        &self,
        grad: &'a mut [f32],
    ) -> (ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>) {
        let w_size = self.size - self.bins;
        let (dw_raw, db_raw) = grad.split_at_mut(w_size);
        let dw = ArrayViewMut2::from_shape((self.inputs, self.bins), dw_raw).unwrap();
        let db = ArrayViewMut1::from_shape(self.bins, db_raw).unwrap();
        (dw, db)
    }
}
