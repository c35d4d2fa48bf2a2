//! Adapters between platform data and the reconciler's typed inputs

mod cluster;
mod image;
mod interfaces;
mod model;
mod records;
mod resource_model;
mod secrets;

pub use cluster::*;
pub use image::*;
pub use interfaces::*;
pub use model::*;
pub use records::*;
pub use resource_model::*;
pub use secrets::*;
