//! The EfficientDet feature network: coarser level construction, repeated
//! bidirectional fusion cells, and shared class/box prediction towers.

mod common;
pub mod arena;
pub mod cell;
pub mod coarser;
pub mod convert;
pub mod fnode;
pub mod model;
pub mod segmentation;
pub mod tower;

pub use arena::*;
pub use cell::*;
pub use coarser::*;
pub use fnode::*;
pub use model::*;
pub use model_config as config;
pub use segmentation::*;
pub use tch_modules as modules;
pub use tch_modules::ShapeMismatch;
pub use tower::*;
pub use model_config::ConfigurationError;
