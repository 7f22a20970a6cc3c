use std::{
    error::Error,
    fmt::{self, Display},
};

use attacks::AttackErr;
use machine_learning::MlErr;
use protocol::ProtocolErr;

/// The result type used in the entire simulation crate.
pub type Result<T> = std::result::Result<T, SimErr>;

/// The simulation crate's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum SimErr {
    LabelOutOfRange {
        label: usize,
        classes: usize,
    },
    BatchShapeMismatch {
        got: (usize, usize),
        expected: (usize, usize),
    },
    EmptyBatch,
    Ml(MlErr),
    Protocol(ProtocolErr),
    Attack(AttackErr),
}

impl Display for SimErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SimErr::LabelOutOfRange { label, classes } => {
                write!(f, "Label {label} is out of range for {classes} classes")
            }
            SimErr::BatchShapeMismatch { got, expected } => {
                write!(
                    f,
                    "Candidate batch shape {got:?} does not match the truth shape {expected:?}"
                )
            }
            SimErr::EmptyBatch => write!(f, "Cannot score an empty batch"),
            SimErr::Ml(e) => write!(f, "{e}"),
            SimErr::Protocol(e) => write!(f, "{e}"),
            SimErr::Attack(e) => write!(f, "{e}"),
        }
    }
}

impl Error for SimErr {}

impl From<MlErr> for SimErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<ProtocolErr> for SimErr {
    fn from(e: ProtocolErr) -> Self {
        Self::Protocol(e)
    }
}

impl From<AttackErr> for SimErr {
    fn from(e: AttackErr) -> Self {
        Self::Attack(e)
    }
}
