//! Weighted combination of same-shape feature maps.

use crate::common::*;

const FAST_ATTN_EPS: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum FuseKind {
    Sum,
    Attn,
    FastAttn,
    ChannelAttn,
    ChannelFastAttn,
}

impl FuseKind {
    pub fn is_per_channel(&self) -> bool {
        matches!(self, Self::ChannelAttn | Self::ChannelFastAttn)
    }

    pub fn has_weights(&self) -> bool {
        !matches!(self, Self::Sum)
    }
}

#[derive(Debug, Clone)]
pub struct Fuse2DInit {
    pub kind: FuseKind,
    pub num_inputs: usize,
    pub channels: usize,
}

impl Fuse2DInit {
    pub fn build<'p, P>(self, path: P) -> Result<Fuse2D>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            kind,
            num_inputs,
            channels,
        } = self;
        ensure!(num_inputs > 0, "a fusion needs at least one input");
        ensure!(channels > 0, "channels must be positive");

        // one weight per edge, starting at one
        let weights: Vec<Tensor> = if kind.has_weights() {
            let shape: Vec<i64> = if kind.is_per_channel() {
                vec![channels as i64]
            } else {
                vec![]
            };
            (0..num_inputs)
                .map(|index| {
                    let name = match index {
                        0 => "WSM".to_string(),
                        _ => format!("WSM_{}", index),
                    };
                    path.var(&name, &shape, nn::Init::Const(1.0))
                })
                .collect()
        } else {
            vec![]
        };

        Ok(Fuse2D {
            kind,
            num_inputs,
            channels: channels as i64,
            weights,
        })
    }
}

#[derive(Debug)]
pub struct Fuse2D {
    kind: FuseKind,
    num_inputs: usize,
    channels: i64,
    weights: Vec<Tensor>,
}

impl Fuse2D {
    pub fn kind(&self) -> FuseKind {
        self.kind
    }

    /// The learnable edge weights, one per input. Empty for [FuseKind::Sum].
    pub fn edge_weights(&self) -> &[Tensor] {
        &self.weights
    }

    pub fn forward(
        &self,
        tensors: impl IntoIterator<Item = impl Borrow<Tensor>>,
    ) -> Result<Tensor> {
        let Self {
            kind,
            num_inputs,
            channels,
            ref weights,
        } = *self;

        let tensors: Vec<_> = tensors.into_iter().collect();
        ensure!(
            tensors.len() == num_inputs,
            "expect {} inputs, but get {}",
            num_inputs,
            tensors.len()
        );
        let shape = tensors[0].borrow().size4()?;
        for tensor in &tensors {
            let other = tensor.borrow().size4()?;
            ensure!(
                other == shape,
                "fused inputs must share one shape, but get {:?} and {:?}",
                shape,
                other
            );
        }
        let (_b, c, _h, _w) = shape;
        if kind.is_per_channel() {
            ensure!(
                c == channels,
                "expect {} channels, but get {}",
                channels,
                c
            );
        }
        let dtype = tensors[0].borrow().kind();
        let weights: Vec<Tensor> = weights.iter().map(|ws| ws.to_kind(dtype)).collect();

        let output = match kind {
            FuseKind::Sum => {
                f_sum_tensors(tensors.iter().map(|xs| xs.borrow().shallow_clone()))?
            }
            FuseKind::Attn | FuseKind::ChannelAttn => {
                // [N] or [C, N], normalized across edges
                let normalized = Tensor::f_stack(&weights, -1)?.f_softmax(-1, dtype)?;
                let normalized = match kind {
                    FuseKind::ChannelAttn => {
                        normalized.f_view(&[1, channels, 1, 1, num_inputs as i64])?
                    }
                    _ => normalized,
                };
                let stacked = Tensor::f_stack(&tensors, -1)?;
                stacked
                    .f_mul(&normalized)?
                    .f_sum_dim_intlist(&[-1], false, dtype)?
            }
            FuseKind::FastAttn | FuseKind::ChannelFastAttn => {
                let weights_sum = f_sum_tensors(weights.iter().map(Tensor::shallow_clone))?;
                let denom = weights_sum + FAST_ATTN_EPS;
                let terms: Vec<Tensor> = izip!(&tensors, &weights)
                    .map(|(xs, ws)| -> Result<_> {
                        let scale = ws.f_div(&denom)?;
                        let scale = match kind {
                            FuseKind::ChannelFastAttn => scale.f_view(&[1, channels, 1, 1])?,
                            _ => scale,
                        };
                        Ok(xs.borrow().f_mul(&scale)?)
                    })
                    .try_collect()?;
                f_sum_tensors(terms)?
            }
        };

        Ok(output)
    }
}

/// Adds up tensors one by one, without a reduction over a stacked dimension.
fn f_sum_tensors(tensors: impl IntoIterator<Item = Tensor>) -> Result<Tensor> {
    let mut iter = tensors.into_iter();
    let first = iter
        .next()
        .ok_or_else(|| format_err!("empty input is not allowed"))?;
    let output = iter.try_fold(first, |acc, tensor| acc.f_add(&tensor))?;
    Ok(output)
}
