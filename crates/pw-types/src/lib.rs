pub mod artifact;
pub mod dataset;
pub mod errors;

pub use artifact::*;
pub use dataset::*;
pub use errors::*;
