pub mod activations;
pub mod layers;
pub mod loss;
mod sequential;
mod spec;

pub use sequential::{BackwardTrace, ForwardTrace, Sequential};
pub use spec::{ArchSpec, LayerSpec};
