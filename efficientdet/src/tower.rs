//! Class and box prediction towers shared across pyramid levels.

use crate::common::*;
use tch_modules::{BatchNorm, BatchNormInit, Conv2D, Conv2DInit, DropConnect, KernelInit};

/// Prior probability of the foreground class at initialization.
const CLASS_PRIOR: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TowerKind {
    Class { num_classes: usize },
    Box,
}

impl TowerKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Class { .. } => "class",
            Self::Box => "box",
        }
    }

    /// Output channels per anchor.
    pub fn outputs_per_anchor(&self) -> usize {
        match *self {
            Self::Class { num_classes } => num_classes,
            Self::Box => 4,
        }
    }

    fn bias_init(&self) -> nn::Init {
        match self {
            Self::Class { .. } => nn::Init::Const(-((1.0 - CLASS_PRIOR) / CLASS_PRIOR).ln()),
            Self::Box => nn::Init::Const(0.0),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PredictionTowerInit {
    pub kind: TowerKind,
    pub num_anchors: usize,
    pub num_filters: usize,
    pub min_level: usize,
    pub num_levels: usize,
    pub repeats: usize,
    pub separable_conv: bool,
    pub activation: Activation,
    pub survival_prob: Option<R64>,
    /// Skip the prediction conv and emit tower features.
    pub feature_only: bool,
    pub batch_norm: BatchNormInit,
}

impl PredictionTowerInit {
    pub fn build<'p, P>(self, path: P) -> Result<PredictionTower>
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            kind,
            num_anchors,
            num_filters,
            min_level,
            num_levels,
            repeats,
            separable_conv,
            activation,
            survival_prob,
            feature_only,
            ref batch_norm,
        } = self;
        ensure!(num_levels > 0, "a tower needs at least one level");
        let name = kind.name();
        let ws_init = if separable_conv {
            KernelInit::VarianceScaling
        } else {
            KernelInit::Normal { stdev: 0.01 }
        };

        let convs: Vec<_> = (0..repeats)
            .map(|index| {
                Conv2DInit {
                    separable: separable_conv,
                    ws_init,
                    ..Conv2DInit::new(num_filters, num_filters, 3)
                }
                .build(path / format!("{}-{}", name, index))
            })
            .try_collect()?;

        // normalization statistics are never shared across levels
        let bns: Vec<Vec<_>> = (0..repeats)
            .map(|index| {
                (min_level..(min_level + num_levels))
                    .map(|level| {
                        batch_norm
                            .clone()
                            .build(path / format!("{}-{}-bn-{}", name, index, level), num_filters)
                    })
                    .collect()
            })
            .collect();

        let drop_connect = survival_prob.map(DropConnect::new).transpose()?;

        let predict = (!feature_only)
            .then(|| {
                Conv2DInit {
                    separable: separable_conv,
                    ws_init,
                    bs_init: kind.bias_init(),
                    ..Conv2DInit::new(num_filters, kind.outputs_per_anchor() * num_anchors, 3)
                }
                .build(path / format!("{}-predict", name))
            })
            .transpose()?;

        Ok(PredictionTower {
            kind,
            num_filters,
            num_levels,
            convs,
            bns,
            activation,
            drop_connect,
            predict,
        })
    }
}

/// Repeated conv/BN/activation blocks whose conv weights are shared by all
/// levels, followed by a prediction conv.
#[derive(Debug)]
pub struct PredictionTower {
    kind: TowerKind,
    num_filters: usize,
    num_levels: usize,
    convs: Vec<Conv2D>,
    bns: Vec<Vec<BatchNorm>>,
    activation: Activation,
    drop_connect: Option<DropConnect>,
    predict: Option<Conv2D>,
}

impl PredictionTower {
    pub fn kind(&self) -> TowerKind {
        self.kind
    }

    pub fn repeats(&self) -> usize {
        self.convs.len()
    }

    pub fn out_channels(&self) -> i64 {
        match &self.predict {
            Some(predict) => predict.out_channels(),
            None => self.num_filters as i64,
        }
    }

    fn forward_level(&self, level_index: usize, xs: &Tensor, train: bool) -> Tensor {
        let features = izip!(&self.convs, &self.bns).enumerate().fold(
            xs.shallow_clone(),
            |features, (index, (conv, bns))| {
                let output = features
                    .apply(conv)
                    .apply_t(&bns[level_index], train)
                    .activation(self.activation);

                match &self.drop_connect {
                    Some(drop_connect) if index > 0 => {
                        output.apply_t(drop_connect, train) + features
                    }
                    _ => output,
                }
            },
        );

        match &self.predict {
            Some(predict) => features.apply(predict),
            None => features,
        }
    }

    /// Applies the tower to every level independently.
    pub fn forward_t(&self, features: &[Tensor], train: bool) -> Result<Vec<Tensor>> {
        ensure!(
            features.len() == self.num_levels,
            "{} tower expects {} levels, but get {}",
            self.kind.name(),
            self.num_levels,
            features.len()
        );
        for (level_index, xs) in features.iter().enumerate() {
            let (_b, c, _h, _w) = xs.size4()?;
            ensure!(
                c == self.num_filters as i64,
                "{} tower expects {} channels, but level {} has {}",
                self.kind.name(),
                self.num_filters,
                level_index,
                c
            );
        }
        let outputs = features
            .iter()
            .enumerate()
            .map(|(level_index, xs)| self.forward_level(level_index, xs, train))
            .collect();
        Ok(outputs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use tch::kind::FLOAT_CPU;

    fn tower_init(kind: TowerKind) -> PredictionTowerInit {
        PredictionTowerInit {
            kind,
            num_anchors: 9,
            num_filters: 16,
            min_level: 3,
            num_levels: 2,
            repeats: 2,
            separable_conv: true,
            activation: Activation::Swish,
            survival_prob: None,
            feature_only: false,
            batch_norm: Default::default(),
        }
    }

    #[test]
    fn class_bias_prior() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let tower = tower_init(TowerKind::Class { num_classes: 3 }).build(&vs.root())?;
        assert_eq!(tower.out_channels(), 27);

        let variables = vs.variables();
        let bias = variables
            .iter()
            .find(|(name, _)| name.starts_with("class-predict") && name.ends_with("bias"))
            .map(|(_, tensor)| tensor)
            .unwrap();
        assert_abs_diff_eq!(
            f64::from(bias.mean(Kind::Float)),
            -(99f64.ln()),
            epsilon = 1e-5
        );
        Ok(())
    }

    #[test]
    fn one_norm_per_repeat_and_level() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let _tower = tower_init(TowerKind::Box).build(&vs.root())?;
        let num_bn = vs
            .variables()
            .keys()
            .filter(|name| name.contains("-bn-") && name.ends_with("running_mean"))
            .count();
        assert_eq!(num_bn, 4);
        Ok(())
    }

    #[test]
    fn drop_connect_residual_keeps_shape() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let tower = PredictionTowerInit {
            survival_prob: Some(r64(0.8)),
            feature_only: true,
            ..tower_init(TowerKind::Box)
        }
        .build(&vs.root())?;

        let features = vec![
            Tensor::randn(&[2, 16, 8, 8], FLOAT_CPU),
            Tensor::randn(&[2, 16, 4, 4], FLOAT_CPU),
        ];
        let outputs = tower.forward_t(&features, true)?;
        assert_eq!(outputs[0].size(), vec![2, 16, 8, 8]);
        assert_eq!(outputs[1].size(), vec![2, 16, 4, 4]);
        assert!(tower.forward_t(&features[..1], false).is_err());
        Ok(())
    }

    #[test]
    fn narrow_level_is_rejected() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let tower = tower_init(TowerKind::Box).build(&vs.root())?;

        let features = vec![
            Tensor::randn(&[1, 16, 8, 8], FLOAT_CPU),
            Tensor::randn(&[1, 8, 4, 4], FLOAT_CPU),
        ];
        assert!(tower.forward_t(&features, false).is_err());
        Ok(())
    }

    #[test]
    fn residual_block_in_eval() -> Result<()> {
        let vs = nn::VarStore::new(Device::Cpu);
        let tower = PredictionTowerInit {
            num_levels: 1,
            activation: Activation::Relu,
            survival_prob: Some(r64(0.8)),
            feature_only: true,
            ..tower_init(TowerKind::Box)
        }
        .build(&vs.root())?;

        let input = Tensor::randn(&[2, 16, 6, 6], FLOAT_CPU);
        let outputs = tower.forward_t(&[input.shallow_clone()], false)?;

        // the first repeat has no residual, the second adds its input back
        let first = input
            .apply(&tower.convs[0])
            .apply_t(&tower.bns[0][0], false)
            .relu();
        let expect = first
            .apply(&tower.convs[1])
            .apply_t(&tower.bns[1][0], false)
            .relu()
            + &first;
        assert!(outputs[0].allclose(&expect, 1e-5, 1e-6, false));
        Ok(())
    }
}
