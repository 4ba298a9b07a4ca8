use crate::Activation;
use tch::{nn, Tensor};

impl nn::Module for Activation {
    fn forward(&self, xs: &Tensor) -> Tensor {
        use Activation::*;

        match *self {
            Swish => xs.silu(),
            SwishNative => swish_native(xs),
            HardSwish => hard_swish(xs),
            Relu => xs.relu(),
            Relu6 => relu6(xs),
            Mish => xs.mish(),
            Gelu => xs.gelu(),
            Linear => xs.shallow_clone(),
        }
    }
}

pub fn swish_native(xs: &Tensor) -> Tensor {
    xs * xs.sigmoid()
}

pub fn hard_swish(xs: &Tensor) -> Tensor {
    xs * relu6(&(xs + 3.0)) / 6.0
}

pub fn relu6(xs: &Tensor) -> Tensor {
    xs.clamp(0.0, 6.0)
}
