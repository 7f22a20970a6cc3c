pub mod assembler;
pub mod error;
pub mod imprint;
pub mod recovery;

pub use error::{AttackErr, Result};
