mod bins;
mod dense;
mod layer;

pub use bins::Bins;
pub use dense::Dense;
pub use layer::Layer;
