//! Levels above the backbone output, produced by repeated downsampling.

use crate::common::*;
use tch_modules::{BatchNormInit, PoolKind, Resample2D, Resample2DInit};

#[derive(Debug, Clone)]
pub struct CoarserLevelsInit {
    /// The highest level the backbone produces.
    pub native_max_level: usize,
    pub max_level: usize,
    /// Channels of the highest backbone level.
    pub top_channels: usize,
    pub num_filters: usize,
    pub apply_bn: bool,
    pub conv_after_downsample: bool,
    pub pool_kind: PoolKind,
    pub batch_norm: BatchNormInit,
}

impl CoarserLevelsInit {
    pub fn build<'p, P>(self, path: P) -> Result<CoarserLevels>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            native_max_level,
            max_level,
            top_channels,
            num_filters,
            apply_bn,
            conv_after_downsample,
            pool_kind,
            ref batch_norm,
        } = self;

        let resamplers: Vec<_> = ((native_max_level + 1)..=max_level)
            .scan(top_channels, |in_c, level| {
                let init = Resample2DInit {
                    in_c: *in_c,
                    out_c: num_filters,
                    apply_bn,
                    conv_after_downsample,
                    pool_kind,
                    batch_norm: batch_norm.clone(),
                };
                debug!("coarser level {} from {} channels", level, in_c);
                *in_c = num_filters;
                Some(init.build(path / format!("resample_p{}", level)))
            })
            .try_collect()?;

        Ok(CoarserLevels {
            top_channels,
            resamplers,
        })
    }
}

/// Extends a backbone pyramid to `max_level`. Each extra level halves the
/// previous top level with its own resampler.
#[derive(Debug)]
pub struct CoarserLevels {
    top_channels: usize,
    resamplers: Vec<Resample2D>,
}

impl CoarserLevels {
    pub fn num_extra_levels(&self) -> usize {
        self.resamplers.len()
    }

    /// The channel count of each level after extension.
    pub fn output_channels(&self, backbone_channels: &[usize]) -> Vec<usize> {
        backbone_channels
            .iter()
            .cloned()
            .chain(
                self.resamplers
                    .iter()
                    .map(|resampler| resampler.out_channels() as usize),
            )
            .collect()
    }

    pub fn forward_t(&self, features: &[Tensor], train: bool) -> Result<Vec<Tensor>> {
        let mut features: Vec<_> = features.iter().map(|xs| xs.shallow_clone()).collect();
        let (_b, top_c, _h, _w) = features
            .last()
            .ok_or_else(|| format_err!("at least one backbone level is required"))?
            .size4()?;
        ensure!(
            top_c as usize == self.top_channels,
            "expect {} channels at the top backbone level, but get {}",
            self.top_channels,
            top_c
        );

        for resampler in &self.resamplers {
            let top = features
                .last()
                .ok_or_else(|| format_err!("at least one backbone level is required"))?;
            let next = resampler.forward_t(top, None, train)?;
            features.push(next);
        }

        Ok(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind::FLOAT_CPU;

    #[test]
    fn each_extra_level_halves_the_previous() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let coarser = CoarserLevelsInit {
            native_max_level: 5,
            max_level: 7,
            top_channels: 32,
            num_filters: 16,
            apply_bn: true,
            conv_after_downsample: false,
            pool_kind: PoolKind::Max,
            batch_norm: Default::default(),
        }
        .build(&vs.root())?;
        assert_eq!(coarser.num_extra_levels(), 2);
        assert_eq!(coarser.output_channels(&[8, 32]), vec![8, 32, 16, 16]);

        let outputs = coarser.forward_t(&[Tensor::randn(&[1, 32, 16, 16], FLOAT_CPU)], false)?;
        let sizes: Vec<_> = outputs.iter().map(|xs| xs.size()).collect();
        assert_eq!(
            sizes,
            vec![vec![1, 32, 16, 16], vec![1, 16, 8, 8], vec![1, 16, 4, 4]]
        );

        assert!(coarser
            .forward_t(&[Tensor::randn(&[1, 16, 16, 16], FLOAT_CPU)], false)
            .is_err());
        Ok(())
    }
}
