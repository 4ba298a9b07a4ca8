use crate::{impls, Activation};
use tch::{nn::Module, Tensor};

pub trait TensorActivationExt {
    fn activation(&self, act: Activation) -> Tensor;

    /// Swish activation computed as `x * sigmoid(x)`.
    fn swish_native(&self) -> Tensor;

    /// Hard-Swish activation function.
    fn hard_swish(&self) -> Tensor;

    fn relu6(&self) -> Tensor;
}

impl TensorActivationExt for Tensor {
    fn activation(&self, act: Activation) -> Tensor {
        act.forward(self)
    }

    fn swish_native(&self) -> Tensor {
        impls::swish_native(self)
    }

    fn hard_swish(&self) -> Tensor {
        impls::hard_swish(self)
    }

    fn relu6(&self) -> Tensor {
        impls::relu6(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind::FLOAT_CPU;

    #[test]
    fn swish_variants_agree() {
        let xs = Tensor::randn(&[2, 3, 4, 4], FLOAT_CPU);
        let lhs = xs.activation(Activation::Swish);
        let rhs = xs.activation(Activation::SwishNative);
        assert!(lhs.allclose(&rhs, 1e-5, 1e-6, false));
    }

    #[test]
    fn relu6_clamps() {
        let xs = Tensor::of_slice(&[-1.0f32, 3.0, 9.0]);
        let ys = xs.relu6();
        let expect = Tensor::of_slice(&[0.0f32, 3.0, 6.0]);
        assert!(ys.allclose(&expect, 1e-6, 1e-6, false));
    }
}
