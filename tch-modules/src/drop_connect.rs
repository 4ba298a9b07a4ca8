use crate::common::*;

/// Stochastic depth: during training, zeroes the whole sample with probability
/// `1 - survival_prob` and scales the kept samples by `1 / survival_prob`.
pub fn drop_connect(xs: &Tensor, train: bool, survival_prob: f64) -> Tensor {
    if !train {
        return xs.shallow_clone();
    }

    let mut shape = vec![1; xs.dim()];
    shape[0] = xs.size()[0];
    let mask = (Tensor::rand(&shape, (xs.kind(), xs.device())) + survival_prob).floor();
    xs / survival_prob * mask
}

#[derive(Debug, Clone)]
pub struct DropConnect {
    survival_prob: f64,
}

impl DropConnect {
    pub fn new(survival_prob: R64) -> Result<Self> {
        let survival_prob = survival_prob.raw();
        ensure!(
            survival_prob > 0.0 && survival_prob <= 1.0,
            "survival_prob must be in (0, 1], but get {}",
            survival_prob
        );
        Ok(Self { survival_prob })
    }

    pub fn survival_prob(&self) -> f64 {
        self.survival_prob
    }
}

impl nn::ModuleT for DropConnect {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        drop_connect(xs, train, self.survival_prob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind::FLOAT_CPU;

    #[test]
    fn identity_in_eval() -> Result<()> {
        let drop = DropConnect::new(r64(0.5))?;
        let input = Tensor::randn(&[8, 3, 4, 4], FLOAT_CPU);
        assert!(drop.forward_t(&input, false).equal(&input));
        Ok(())
    }

    #[test]
    fn samples_are_dropped_or_scaled() -> Result<()> {
        let drop = DropConnect::new(r64(0.5))?;
        let input = Tensor::ones(&[64, 2, 3, 3], FLOAT_CPU);
        let output = drop.forward_t(&input, true);

        for index in 0..64 {
            let sample = output.get(index);
            let min = f64::from(sample.min());
            let max = f64::from(sample.max());
            assert_eq!(min, max);
            assert!(min == 0.0 || (min - 2.0).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn full_survival_keeps_everything() -> Result<()> {
        let drop = DropConnect::new(r64(1.0))?;
        let input = Tensor::randn(&[4, 2, 3, 3], FLOAT_CPU);
        assert!(drop.forward_t(&input, true).allclose(&input, 1e-6, 1e-6, false));
        assert!(DropConnect::new(r64(0.0)).is_err());
        Ok(())
    }
}
