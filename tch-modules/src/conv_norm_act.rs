use crate::{
    batch_norm::{BatchNorm, BatchNormInit},
    common::*,
    conv_2d::{Conv2D, Conv2DInit},
};

#[derive(Debug, Clone)]
pub struct ConvNormActInit {
    pub conv: Conv2DInit,
    pub batch_norm: Option<BatchNormInit>,
    pub activation: Activation,
    /// Runs activation → conv → norm instead of conv → norm → activation.
    pub pre_activation: bool,
}

impl ConvNormActInit {
    pub fn new(in_c: usize, out_c: usize, k: usize) -> Self {
        Self {
            conv: Conv2DInit::new(in_c, out_c, k),
            batch_norm: Some(Default::default()),
            activation: Activation::Swish,
            pre_activation: false,
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<ConvNormAct>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            conv,
            batch_norm,
            activation,
            pre_activation,
        } = self;

        let out_c = conv.out_c;
        let conv = conv.build(path / "conv")?;
        let bn = batch_norm.map(|init| init.build(path / "bn", out_c));

        Ok(ConvNormAct {
            conv,
            bn,
            activation,
            pre_activation,
        })
    }
}

#[derive(Debug)]
pub struct ConvNormAct {
    conv: Conv2D,
    bn: Option<BatchNorm>,
    activation: Activation,
    pre_activation: bool,
}

impl nn::ModuleT for ConvNormAct {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let Self {
            ref conv,
            ref bn,
            activation,
            pre_activation,
        } = *self;

        let normalize = |xs: Tensor| match bn {
            Some(bn) => bn.forward_t(&xs, train),
            None => xs,
        };

        if pre_activation {
            normalize(xs.activation(activation).apply(conv))
        } else {
            normalize(xs.apply(conv)).activation(activation)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind::FLOAT_CPU;

    #[test]
    fn activation_order() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let input = Tensor::randn(&[1, 4, 6, 6], FLOAT_CPU);

        let post = ConvNormActInit {
            activation: Activation::Relu,
            ..ConvNormActInit::new(4, 8, 3)
        }
        .build(&root / "post")?;
        let output = post.forward_t(&input, false);
        assert_eq!(output.size(), vec![1, 8, 6, 6]);
        // the activation is applied last
        assert!(bool::from(output.ge(0.0).all()));

        let pre = ConvNormActInit {
            activation: Activation::Relu,
            pre_activation: true,
            ..ConvNormActInit::new(4, 8, 3)
        }
        .build(&root / "pre")?;
        let output = pre.forward_t(&input, false);
        assert_eq!(output.size(), vec![1, 8, 6, 6]);
        // the activation is applied to the input, before conv and norm
        let expect = input
            .relu()
            .apply(&pre.conv)
            .apply_t(pre.bn.as_ref().unwrap(), false);
        assert!(output.allclose(&expect, 1e-5, 1e-6, false));
        Ok(())
    }
}
