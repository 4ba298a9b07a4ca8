use crate::common::*;

pub use conv_2d_::*;
pub use conv_init::*;

mod conv_init {
    use super::*;

    /// Kernel initializer of a convolution.
    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum KernelInit {
        KaimingUniform,
        Normal { stdev: f64 },
        /// Normal with variance `1 / fan_in`.
        VarianceScaling,
    }

    impl KernelInit {
        pub fn to_init(&self, fan_in: usize) -> nn::Init {
            match *self {
                Self::KaimingUniform => nn::Init::KaimingUniform,
                Self::Normal { stdev } => nn::Init::Randn { mean: 0.0, stdev },
                Self::VarianceScaling => nn::Init::Randn {
                    mean: 0.0,
                    stdev: (1.0 / fan_in.max(1) as f64).sqrt(),
                },
            }
        }
    }

    /// Options of a stride-1 convolution with "same" padding.
    #[derive(Debug, Clone)]
    pub struct Conv2DInit {
        pub in_c: usize,
        pub out_c: usize,
        pub k: usize,
        pub bias: bool,
        /// Depthwise `k`×`k` convolution followed by a pointwise 1×1 convolution.
        pub separable: bool,
        pub ws_init: KernelInit,
        pub bs_init: nn::Init,
    }

    impl Conv2DInit {
        pub fn new(in_c: usize, out_c: usize, k: usize) -> Self {
            Self {
                in_c,
                out_c,
                k,
                bias: true,
                separable: false,
                ws_init: KernelInit::KaimingUniform,
                bs_init: nn::Init::Const(0.0),
            }
        }

        pub fn build<'p, P>(self, path: P) -> Result<Conv2D>
        where
            P: Borrow<nn::Path<'p>>,
        {
            let path = path.borrow();
            let Self {
                in_c,
                out_c,
                k,
                bias,
                separable,
                ws_init,
                bs_init,
            } = self;

            ensure!(
                in_c > 0 && out_c > 0,
                "channel counts must be positive, but get {} -> {}",
                in_c,
                out_c
            );
            ensure!(k % 2 == 1, "only odd kernel sizes keep the spatial size");

            let conv = if separable {
                let depthwise = nn::conv2d(
                    path / "depthwise",
                    in_c as i64,
                    in_c as i64,
                    k as i64,
                    nn::ConvConfig {
                        padding: (k / 2) as i64,
                        groups: in_c as i64,
                        bias: false,
                        ws_init: ws_init.to_init(k * k),
                        ..Default::default()
                    },
                );
                let pointwise = nn::conv2d(
                    path / "pointwise",
                    in_c as i64,
                    out_c as i64,
                    1,
                    nn::ConvConfig {
                        bias,
                        ws_init: ws_init.to_init(in_c),
                        bs_init,
                        ..Default::default()
                    },
                );
                Conv2D::Separable {
                    depthwise,
                    pointwise,
                }
            } else {
                let conv = nn::conv2d(
                    path,
                    in_c as i64,
                    out_c as i64,
                    k as i64,
                    nn::ConvConfig {
                        padding: (k / 2) as i64,
                        bias,
                        ws_init: ws_init.to_init(in_c * k * k),
                        bs_init,
                        ..Default::default()
                    },
                );
                Conv2D::Regular(conv)
            };

            Ok(conv)
        }
    }
}

mod conv_2d_ {
    use super::*;

    #[derive(Debug)]
    pub enum Conv2D {
        Regular(nn::Conv2D),
        Separable {
            depthwise: nn::Conv2D,
            pointwise: nn::Conv2D,
        },
    }

    impl nn::Module for Conv2D {
        fn forward(&self, xs: &Tensor) -> Tensor {
            match self {
                Self::Regular(conv) => xs.apply(conv),
                Self::Separable {
                    depthwise,
                    pointwise,
                } => xs.apply(depthwise).apply(pointwise),
            }
        }
    }

    impl Conv2D {
        pub fn out_channels(&self) -> i64 {
            let ws = match self {
                Self::Regular(conv) => &conv.ws,
                Self::Separable { pointwise, .. } => &pointwise.ws,
            };
            ws.size()[0]
        }

        pub fn is_separable(&self) -> bool {
            matches!(self, Self::Separable { .. })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind::FLOAT_CPU;

    #[test]
    fn same_padding_keeps_spatial_size() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();

        for separable in [false, true] {
            let conv = Conv2DInit {
                separable,
                ..Conv2DInit::new(6, 10, 3)
            }
            .build(&root / format!("conv_{}", separable))?;
            assert_eq!(conv.is_separable(), separable);
            assert_eq!(conv.out_channels(), 10);

            let output = conv.forward(&Tensor::randn(&[2, 6, 7, 9], FLOAT_CPU));
            assert_eq!(output.size(), vec![2, 10, 7, 9]);
        }
        Ok(())
    }

    #[test]
    fn separable_has_fewer_parameters() -> Result<()> {
        let count = |separable: bool| -> Result<i64> {
            let vs = nn::VarStore::new(Device::Cpu);
            let _conv = Conv2DInit {
                separable,
                ..Conv2DInit::new(32, 32, 3)
            }
            .build(&vs.root())?;
            Ok(vs.trainable_variables().iter().map(|ws| ws.numel() as i64).sum())
        };
        // depthwise 32*9, pointwise 32*32 + 32
        assert_eq!(count(true)?, 32 * 9 + 32 * 32 + 32);
        assert_eq!(count(false)?, 32 * 32 * 9 + 32);
        Ok(())
    }

    #[test]
    fn reject_even_kernel() {
        let vs = nn::VarStore::new(Device::Cpu);
        assert!(Conv2DInit::new(4, 4, 2).build(&vs.root()).is_err());
    }
}
