use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning crate.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning crate's error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MlErr {
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    InvalidDim {
        what: &'static str,
        got: usize,
    },
    DisconnectedLayers {
        layer: usize,
        got: usize,
        expected: usize,
    },
    EmptyModel,
    LossRequiresLogits,
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MlErr::SizeMismatch {
                what,
                got,
                expected,
            } => {
                write!(
                    f,
                    "There's a size mismatch for {what}, got {got} and expected {expected}"
                )
            }
            MlErr::InvalidDim { what, got } => {
                write!(f, "The dimension of {what} must be positive, got {got}")
            }
            MlErr::DisconnectedLayers {
                layer,
                got,
                expected,
            } => {
                write!(
                    f,
                    "Layer {layer} expects {expected} inputs but the previous layer produces {got}"
                )
            }
            MlErr::EmptyModel => write!(f, "The model has no layers"),
            MlErr::LossRequiresLogits => {
                write!(
                    f,
                    "The cross entropy loss folds the softmax in, the last layer must be linear"
                )
            }
        }
    }
}

impl Error for MlErr {}
