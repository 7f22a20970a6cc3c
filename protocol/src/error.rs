use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire protocol crate.
pub type Result<T> = std::result::Result<T, ProtocolErr>;

/// The protocol crate's error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErr {
    GradientSizeMismatch { got: usize, expected: usize },
    RecordsOutOfBounds { record: String, end: usize, len: usize },
    EmptyBatch,
    LabelCountMismatch { got: usize, expected: usize },
}

impl Display for ProtocolErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolErr::GradientSizeMismatch { got, expected } => {
                write!(
                    f,
                    "The shared gradient has {got} entries, the payload expects {expected}"
                )
            }
            ProtocolErr::RecordsOutOfBounds { record, end, len } => {
                write!(
                    f,
                    "Parameter record {record} ends at {end}, past the parameter buffer of length {len}"
                )
            }
            ProtocolErr::EmptyBatch => write!(f, "The shared data reports a batch size of zero"),
            ProtocolErr::LabelCountMismatch { got, expected } => {
                write!(f, "Got {got} labels for a batch of {expected} samples")
            }
        }
    }
}

impl Error for ProtocolErr {}
