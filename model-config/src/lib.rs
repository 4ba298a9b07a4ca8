//! Configuration surface and static fusion topology of the EfficientDet feature network.

mod common;
pub mod config;
pub mod error;
pub mod topology;
pub mod zoo;

pub use config::*;
pub use error::*;
pub use tch_act::Activation;
pub use topology::*;
pub use zoo::*;
