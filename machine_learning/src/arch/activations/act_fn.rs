/// Pointwise activation functions.
///
/// Besides the usual value and first derivative, every activation exposes its
/// second derivative. The gradient matching attack differentiates *through*
/// the backward pass, which needs `ddf` of every activation on the path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActFn {
    #[default]
    Identity,
    Relu,
    Sigmoid,
    Tanh,
}
use ActFn::*;

impl ActFn {
    pub fn f(&self, x: f32) -> f32 {
        match self {
            Identity => x,
            Relu => x.max(0.0),
            Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Tanh => x.tanh(),
        }
    }

    pub fn df(&self, x: f32) -> f32 {
        match self {
            Identity => 1.0,
            Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Sigmoid => {
                let s = Sigmoid.f(x);
                s * (1.0 - s)
            }
            Tanh => 1.0 - x.tanh().powi(2),
        }
    }

    pub fn ddf(&self, x: f32) -> f32 {
        match self {
            // Relu is piecewise linear, its curvature is zero almost everywhere.
            Identity | Relu => 0.0,
            Sigmoid => {
                let s = Sigmoid.f(x);
                s * (1.0 - s) * (1.0 - 2.0 * s)
            }
            Tanh => {
                let t = x.tanh();
                -2.0 * t * (1.0 - t.powi(2))
            }
        }
    }
}
