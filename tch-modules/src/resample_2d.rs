//! Reconciles a feature map with the spatial size and width of another level.

use crate::{
    batch_norm::{BatchNorm, BatchNormInit},
    common::*,
    pool_2d::{PoolKind, SamePool2D},
};

/// The spatial axes of a resampling request move in opposite directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error(
    "incompatible resampling: feature {height}x{width}, target {target_height}x{target_width}"
)]
pub struct ShapeMismatch {
    pub height: i64,
    pub width: i64,
    pub target_height: i64,
    pub target_width: i64,
}

/// The spatial operation chosen for a (source, target) size pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResamplePlan {
    Downsample { stride: [i64; 2] },
    Upsample,
    Identity,
}

impl ResamplePlan {
    pub fn new(
        height: i64,
        width: i64,
        target_height: i64,
        target_width: i64,
    ) -> Result<Self, ShapeMismatch> {
        let plan = if height > target_height && width > target_width {
            let stride_h = (height - 1) / target_height + 1;
            let stride_w = (width - 1) / target_width + 1;
            Self::Downsample {
                stride: [stride_h, stride_w],
            }
        } else if height <= target_height && width <= target_width {
            if height < target_height || width < target_width {
                Self::Upsample
            } else {
                Self::Identity
            }
        } else {
            return Err(ShapeMismatch {
                height,
                width,
                target_height,
                target_width,
            });
        };
        Ok(plan)
    }
}

/// The target size used when no reference level exists: halve each axis, rounding up.
pub fn default_downsample_size(height: i64, width: i64) -> (i64, i64) {
    ((height + 1) / 2, (width + 1) / 2)
}

#[derive(Debug, Clone)]
pub struct Resample2DInit {
    pub in_c: usize,
    pub out_c: usize,
    pub apply_bn: bool,
    /// Project channels after pooling instead of before when downsampling.
    pub conv_after_downsample: bool,
    pub pool_kind: PoolKind,
    pub batch_norm: BatchNormInit,
}

impl Resample2DInit {
    pub fn new(in_c: usize, out_c: usize) -> Self {
        Self {
            in_c,
            out_c,
            apply_bn: true,
            conv_after_downsample: false,
            pool_kind: PoolKind::Max,
            batch_norm: Default::default(),
        }
    }

    pub fn build<'p, P>(self, path: P) -> Result<Resample2D>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            in_c,
            out_c,
            apply_bn,
            conv_after_downsample,
            pool_kind,
            batch_norm,
        } = self;
        ensure!(
            in_c > 0 && out_c > 0,
            "channel counts must be positive, but get {} -> {}",
            in_c,
            out_c
        );

        // the 1x1 projection exists only when the width changes
        let projection = (in_c != out_c).then(|| {
            let conv = nn::conv2d(
                path / "conv2d",
                in_c as i64,
                out_c as i64,
                1,
                Default::default(),
            );
            let bn = apply_bn.then(|| batch_norm.build(path / "bn", out_c));
            Projection { conv, bn }
        });
        debug!(
            "resampler {} -> {} channels, projection: {}, conv_after_downsample: {}",
            in_c,
            out_c,
            projection.is_some(),
            conv_after_downsample
        );

        Ok(Resample2D {
            in_c: in_c as i64,
            out_c: out_c as i64,
            projection,
            conv_after_downsample,
            pool_kind,
        })
    }
}

#[derive(Debug)]
struct Projection {
    conv: nn::Conv2D,
    bn: Option<BatchNorm>,
}

impl nn::ModuleT for Projection {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let xs = xs.apply(&self.conv);
        match &self.bn {
            Some(bn) => bn.forward_t(&xs, train),
            None => xs,
        }
    }
}

#[derive(Debug)]
pub struct Resample2D {
    in_c: i64,
    out_c: i64,
    projection: Option<Projection>,
    conv_after_downsample: bool,
    pool_kind: PoolKind,
}

impl Resample2D {
    pub fn out_channels(&self) -> i64 {
        self.out_c
    }

    pub fn has_projection(&self) -> bool {
        self.projection.is_some()
    }

    /// Resamples `xs` to `target` (height, width), or to half its size when
    /// `target` is `None`. The output always has `out_c` channels.
    pub fn forward_t(&self, xs: &Tensor, target: Option<(i64, i64)>, train: bool) -> Result<Tensor> {
        let Self {
            in_c,
            conv_after_downsample,
            pool_kind,
            ..
        } = *self;
        let (_b, c, height, width) = xs.size4()?;
        ensure!(
            c == in_c,
            "expect {} input channels, but get {}",
            in_c,
            c
        );
        let (target_height, target_width) =
            target.unwrap_or_else(|| default_downsample_size(height, width));
        let plan = ResamplePlan::new(height, width, target_height, target_width)?;

        let output = match plan {
            ResamplePlan::Downsample { stride } => {
                let pool = SamePool2D::new(
                    pool_kind,
                    [stride[0] as usize + 1, stride[1] as usize + 1],
                    [stride[0] as usize, stride[1] as usize],
                )?;
                if conv_after_downsample {
                    let xs = pool.forward(xs)?;
                    self.project(&xs, train)
                } else {
                    let xs = self.project(xs, train);
                    pool.forward(&xs)?
                }
            }
            ResamplePlan::Upsample => {
                let xs = self.project(xs, train);
                // nearest resize runs in full precision
                let kind = xs.kind();
                xs.f_to_kind(Kind::Float)?
                    .f_upsample_nearest2d(&[target_height, target_width], None, None)?
                    .f_to_kind(kind)?
            }
            ResamplePlan::Identity => self.project(xs, train),
        };

        Ok(output)
    }

    fn project(&self, xs: &Tensor, train: bool) -> Tensor {
        match &self.projection {
            Some(projection) => projection.forward_t(xs, train),
            None => xs.shallow_clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind::FLOAT_CPU;

    #[test]
    fn plan_decision_rule() {
        assert_eq!(
            ResamplePlan::new(64, 64, 32, 32),
            Ok(ResamplePlan::Downsample { stride: [2, 2] })
        );
        assert_eq!(
            ResamplePlan::new(65, 33, 16, 16),
            Ok(ResamplePlan::Downsample { stride: [5, 3] })
        );
        assert_eq!(ResamplePlan::new(16, 16, 32, 32), Ok(ResamplePlan::Upsample));
        assert_eq!(ResamplePlan::new(16, 32, 32, 32), Ok(ResamplePlan::Upsample));
        assert_eq!(ResamplePlan::new(32, 32, 32, 32), Ok(ResamplePlan::Identity));
        assert!(ResamplePlan::new(64, 16, 32, 32).is_err());
        // one axis equal and the other shrinking is not a downsample
        assert!(ResamplePlan::new(32, 64, 32, 32).is_err());
    }

    #[test]
    fn identity_when_shapes_match() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let resample = Resample2DInit::new(16, 16).build(&vs.root())?;
        assert!(!resample.has_projection());
        assert!(vs.trainable_variables().is_empty());

        let input = Tensor::randn(&[2, 16, 12, 10], FLOAT_CPU);
        let output = resample.forward_t(&input, Some((12, 10)), true)?;
        assert!(output.equal(&input));
        Ok(())
    }

    #[test]
    fn output_matches_target_shape() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let root = vs.root();
        let cases = [
            // (input hw, target hw)
            ((64, 64), (32, 32)),
            ((64, 64), (8, 8)),
            ((33, 17), (17, 9)),
            ((8, 8), (64, 64)),
            ((8, 4), (16, 16)),
            ((20, 20), (20, 20)),
        ];

        for (index, ((h, w), (th, tw))) in cases.into_iter().enumerate() {
            for conv_after_downsample in [false, true] {
                for pool_kind in [PoolKind::Max, PoolKind::Avg] {
                    let resample = Resample2DInit {
                        conv_after_downsample,
                        pool_kind,
                        ..Resample2DInit::new(40, 64)
                    }
                    .build(&root / format!("resample_{}_{}_{:?}", index, conv_after_downsample, pool_kind))?;
                    let input = Tensor::randn(&[1, 40, h, w], FLOAT_CPU);
                    let output = resample.forward_t(&input, Some((th, tw)), false)?;
                    assert_eq!(output.size(), vec![1, 64, th, tw]);
                }
            }
        }
        Ok(())
    }

    #[test]
    fn downsample_projection_order() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let mut resample = Resample2DInit::new(4, 8).build(&vs.root())?;
        let pool = SamePool2D::new(PoolKind::Max, [3, 3], [2, 2])?;
        let input = Tensor::randn(&[1, 4, 8, 8], FLOAT_CPU);

        let project_first = resample.forward_t(&input, Some((4, 4)), false)?;
        let expect = pool.forward(&resample.project(&input, false))?;
        assert!(project_first.allclose(&expect, 1e-5, 1e-6, false));

        resample.conv_after_downsample = true;
        let pool_first = resample.forward_t(&input, Some((4, 4)), false)?;
        let expect = resample.project(&pool.forward(&input)?, false);
        assert!(pool_first.allclose(&expect, 1e-5, 1e-6, false));

        assert!(!project_first.allclose(&pool_first, 1e-5, 1e-6, false));
        Ok(())
    }

    #[test]
    fn default_target_halves_size() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let resample = Resample2DInit::new(8, 4).build(&vs.root())?;
        let output = resample.forward_t(&Tensor::randn(&[1, 8, 15, 16], FLOAT_CPU), None, false)?;
        assert_eq!(output.size(), vec![1, 4, 8, 8]);
        Ok(())
    }

    #[test]
    fn mixed_direction_is_shape_mismatch() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let resample = Resample2DInit::new(8, 8).build(&vs.root())?;
        let err = resample
            .forward_t(&Tensor::randn(&[1, 8, 32, 8], FLOAT_CPU), Some((16, 16)), false)
            .unwrap_err();
        let mismatch = err.downcast_ref::<ShapeMismatch>().unwrap();
        assert_eq!(mismatch.height, 32);
        assert_eq!(mismatch.target_width, 16);
        Ok(())
    }

    #[test]
    fn wrong_input_width_is_rejected() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let resample = Resample2DInit::new(8, 16).build(&vs.root())?;
        assert!(resample
            .forward_t(&Tensor::randn(&[1, 4, 8, 8], FLOAT_CPU), None, false)
            .is_err());
        Ok(())
    }

    #[test]
    fn nearest_upsample_repeats_cells() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let resample = Resample2DInit::new(1, 1).build(&vs.root())?;
        let input = Tensor::of_slice(&[1.0f32, 2.0, 3.0, 4.0]).view([1, 1, 2, 2]);
        let output = resample.forward_t(&input, Some((4, 4)), false)?;
        let expect = Tensor::of_slice(&[
            1.0f32, 1.0, 2.0, 2.0, //
            1.0, 1.0, 2.0, 2.0, //
            3.0, 3.0, 4.0, 4.0, //
            3.0, 3.0, 4.0, 4.0,
        ])
        .view([1, 1, 4, 4]);
        assert!(output.equal(&expect));
        Ok(())
    }
}
