//! libtorch building blocks of the feature network.

mod common;
pub mod batch_norm;
pub mod conv_2d;
pub mod conv_norm_act;
pub mod drop_connect;
pub mod fuse_2d;
pub mod pool_2d;
pub mod resample_2d;

pub use batch_norm::*;
pub use conv_2d::*;
pub use conv_norm_act::*;
pub use drop_connect::*;
pub use fuse_2d::*;
pub use pool_2d::*;
pub use resample_2d::*;
pub use tch_act::{Activation, TensorActivationExt};
