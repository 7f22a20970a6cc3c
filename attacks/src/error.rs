use std::{
    error::Error,
    fmt::{self, Display},
};

use machine_learning::MlErr;
use protocol::ProtocolErr;

/// The result type used in the entire attacks crate.
pub type Result<T> = std::result::Result<T, AttackErr>;

/// The attacks crate's error type.
///
/// Every variant is a configuration error: it is raised immediately and never
/// retried. Numerical degradation (bin collisions, non-convergence) is *not*
/// an error — it only shows up in reconstruction quality and stats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttackErr {
    InvalidBins {
        what: &'static str,
        got: usize,
    },
    BlockInputMismatch {
        got: usize,
        expected: usize,
    },
    EmptyPayloadList,
    ListSizeMismatch {
        payloads: usize,
        shared: usize,
    },
    BatchSizeMismatch {
        got: usize,
        expected: usize,
    },
    ImageShapeMismatch {
        got: usize,
        expected: usize,
    },
    MissingTargets,
    Ml(MlErr),
    Protocol(ProtocolErr),
}

impl Display for AttackErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttackErr::InvalidBins { what, got } => {
                write!(f, "A measurement block needs a positive {what}, got {got}")
            }
            AttackErr::BlockInputMismatch { got, expected } => {
                write!(
                    f,
                    "The measurement block expects {expected} inputs but the base architecture consumes {got}"
                )
            }
            AttackErr::EmptyPayloadList => {
                write!(f, "Reconstruction needs at least one payload/shared-data pair")
            }
            AttackErr::ListSizeMismatch { payloads, shared } => {
                write!(
                    f,
                    "Got {payloads} payloads but {shared} shared gradients, the lists must pair up"
                )
            }
            AttackErr::BatchSizeMismatch { got, expected } => {
                write!(
                    f,
                    "Shared data reports batch size {got}, other pairs report {expected}"
                )
            }
            AttackErr::ImageShapeMismatch { got, expected } => {
                write!(
                    f,
                    "The configured image shape covers {got} values but the model consumes {expected}"
                )
            }
            AttackErr::MissingTargets => {
                write!(
                    f,
                    "Reconstructing under a regression loss needs targets in the auxiliary info"
                )
            }
            AttackErr::Ml(e) => write!(f, "{e}"),
            AttackErr::Protocol(e) => write!(f, "{e}"),
        }
    }
}

impl Error for AttackErr {}

impl From<MlErr> for AttackErr {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

impl From<ProtocolErr> for AttackErr {
    fn from(e: ProtocolErr) -> Self {
        Self::Protocol(e)
    }
}
