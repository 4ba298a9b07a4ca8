//! Semantic segmentation head decoding the fused pyramid back to high
//! resolution.

use crate::common::*;
use tch_modules::{BatchNorm, BatchNormInit};

#[derive(Debug, Clone)]
pub struct SegmentationHeadInit {
    pub num_classes: usize,
    pub num_filters: usize,
    pub num_levels: usize,
    pub activation: Activation,
    pub batch_norm: BatchNormInit,
}

impl SegmentationHeadInit {
    pub fn build<'p, P>(self, path: P) -> Result<SegmentationHead>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            num_classes,
            num_filters,
            num_levels,
            activation,
            ref batch_norm,
        } = self;
        ensure!(num_levels > 0, "the segmentation head needs at least one level");
        ensure!(num_classes > 0, "num_classes must be positive");

        let up_config = |bias| nn::ConvTransposeConfig {
            stride: 2,
            padding: 1,
            output_padding: 1,
            bias,
            ..Default::default()
        };

        // every block after the first sees the concatenated skip connection
        let blocks: Vec<_> = (0..(num_levels - 1))
            .map(|index| {
                let in_c = if index == 0 {
                    num_filters
                } else {
                    num_filters * 2
                };
                let deconv = nn::conv_transpose2d(
                    path / format!("up_{}", index),
                    in_c as i64,
                    num_filters as i64,
                    3,
                    up_config(false),
                );
                let bn = batch_norm
                    .clone()
                    .build(path / format!("up_{}_bn", index), num_filters);
                UpBlock { deconv, bn }
            })
            .collect();

        let head_in_c = if num_levels > 1 {
            num_filters * 2
        } else {
            num_filters
        };
        let head = nn::conv_transpose2d(
            path / "head",
            head_in_c as i64,
            num_classes as i64,
            3,
            up_config(true),
        );

        Ok(SegmentationHead {
            num_filters,
            num_levels,
            blocks,
            head,
            activation,
        })
    }
}

#[derive(Debug)]
struct UpBlock {
    deconv: nn::ConvTranspose2D,
    bn: BatchNorm,
}

/// Upsamples from the coarsest level, concatenating each finer level on the
/// way, and predicts per-pixel class logits at twice the finest resolution.
#[derive(Debug)]
pub struct SegmentationHead {
    num_filters: usize,
    num_levels: usize,
    blocks: Vec<UpBlock>,
    head: nn::ConvTranspose2D,
    activation: Activation,
}

impl SegmentationHead {
    pub fn forward_t(&self, features: &[Tensor], train: bool) -> Result<Tensor> {
        ensure!(
            features.len() == self.num_levels,
            "expect {} feature levels, but get {}",
            self.num_levels,
            features.len()
        );
        for (level_index, xs) in features.iter().enumerate() {
            let (_b, c, _h, _w) = xs.size4()?;
            ensure!(
                c == self.num_filters as i64,
                "segmentation head expects {} channels, but level {} has {}",
                self.num_filters,
                level_index,
                c
            );
        }
        let (top, skips) = features
            .split_last()
            .ok_or_else(|| format_err!("at least one feature level is required"))?;

        let xs = izip!(&self.blocks, skips.iter().rev()).try_fold(
            top.shallow_clone(),
            |xs, (block, skip)| -> Result<_> {
                let xs = xs
                    .apply(&block.deconv)
                    .apply_t(&block.bn, train)
                    .activation(self.activation);
                let xs = Tensor::f_cat(&[xs, skip.shallow_clone()], 1)?;
                Ok(xs)
            },
        )?;

        Ok(xs.apply(&self.head))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind::FLOAT_CPU;

    fn head_init() -> SegmentationHeadInit {
        SegmentationHeadInit {
            num_classes: 5,
            num_filters: 8,
            num_levels: 3,
            activation: Activation::Relu,
            batch_norm: Default::default(),
        }
    }

    #[test]
    fn output_doubles_finest_level() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = head_init().build(&vs.root())?;

        let features = vec![
            Tensor::randn(&[2, 8, 16, 16], FLOAT_CPU),
            Tensor::randn(&[2, 8, 8, 8], FLOAT_CPU),
            Tensor::randn(&[2, 8, 4, 4], FLOAT_CPU),
        ];
        let output = head.forward_t(&features, false)?;
        assert_eq!(output.size(), vec![2, 5, 32, 32]);
        Ok(())
    }

    #[test]
    fn wide_level_is_rejected() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let head = head_init().build(&vs.root())?;

        let features = vec![
            Tensor::randn(&[1, 8, 16, 16], FLOAT_CPU),
            Tensor::randn(&[1, 16, 8, 8], FLOAT_CPU),
            Tensor::randn(&[1, 8, 4, 4], FLOAT_CPU),
        ];
        assert!(head.forward_t(&features, false).is_err());
        Ok(())
    }
}
