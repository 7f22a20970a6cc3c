mod error;
mod payload;
mod shared;

pub use error::{ProtocolErr, Result};
pub use payload::{ModelPayload, ParamRecord, PayloadMetadata, param_records};
pub use shared::{SharedData, TrueData};
