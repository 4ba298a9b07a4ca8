use crate::common::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum PoolKind {
    Max,
    Avg,
}

/// Returns the (before, after) padding of TF "SAME" pooling along one axis.
pub fn same_padding(size: i64, kernel: i64, stride: i64) -> (i64, i64) {
    let out = (size + stride - 1) / stride;
    let total = ((out - 1) * stride + kernel - size).max(0);
    let before = total / 2;
    (before, total - before)
}

/// Pads the last two axes with a constant, in the order `[left, right, top, bottom]`.
pub fn f_constant_pad_2d(xs: &Tensor, padding: [i64; 4], value: f64) -> Result<Tensor> {
    let [left, right, top, bottom] = padding;
    let (b, c, h, _w) = xs.size4()?;
    let opts = (xs.kind(), xs.device());

    let xs = Tensor::f_cat(
        &[
            Tensor::full(&[b, c, h, left], value, opts),
            xs.shallow_clone(),
            Tensor::full(&[b, c, h, right], value, opts),
        ],
        3,
    )?;
    let w = xs.size()[3];
    let xs = Tensor::f_cat(
        &[
            Tensor::full(&[b, c, top, w], value, opts),
            xs,
            Tensor::full(&[b, c, bottom, w], value, opts),
        ],
        2,
    )?;
    Ok(xs)
}

/// Max or average pooling with TF "SAME" padding. The output has
/// `ceil(size / stride)` cells per axis, and padded cells never contribute.
#[derive(Debug, Clone)]
pub struct SamePool2D {
    kind: PoolKind,
    kernel: [i64; 2],
    stride: [i64; 2],
}

impl SamePool2D {
    pub fn new(kind: PoolKind, kernel: [usize; 2], stride: [usize; 2]) -> Result<Self> {
        ensure!(
            kernel.iter().chain(stride.iter()).all(|&size| size > 0),
            "kernel and stride must be positive, but get kernel {:?} and stride {:?}",
            kernel,
            stride
        );
        Ok(Self {
            kind,
            kernel: [kernel[0] as i64, kernel[1] as i64],
            stride: [stride[0] as i64, stride[1] as i64],
        })
    }

    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    pub fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let Self {
            kind,
            kernel,
            stride,
        } = *self;
        let (_b, _c, h, w) = xs.size4()?;
        let (top, bottom) = same_padding(h, kernel[0], stride[0]);
        let (left, right) = same_padding(w, kernel[1], stride[1]);
        let padding = [left, right, top, bottom];

        let output = match kind {
            PoolKind::Max => {
                let padded = f_constant_pad_2d(xs, padding, f64::NEG_INFINITY)?;
                padded.f_max_pool2d(&kernel, &stride, &[0, 0], &[1, 1], false)?
            }
            PoolKind::Avg => {
                // divide by the number of valid cells under each window
                let padded = f_constant_pad_2d(xs, padding, 0.0)?;
                let sum = padded.f_avg_pool2d(&kernel, &stride, &[0, 0], false, true, None)?;
                let mask = Tensor::ones(&[1, 1, h, w], (xs.kind(), xs.device()));
                let mask = f_constant_pad_2d(&mask, padding, 0.0)?;
                let count = mask.f_avg_pool2d(&kernel, &stride, &[0, 0], false, true, None)?;
                sum.f_div(&count)?
            }
        };

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::prelude::*;
    use tch::kind::FLOAT_CPU;

    #[test]
    fn same_padding_geometry() {
        // 5 cells, kernel 3, stride 2 -> 3 outputs, 2 padding cells
        assert_eq!(same_padding(5, 3, 2), (1, 1));
        // 4 cells, kernel 3, stride 2 -> 2 outputs, 1 padding cell at the end
        assert_eq!(same_padding(4, 3, 2), (0, 1));
        assert_eq!(same_padding(8, 1, 1), (0, 0));
    }

    #[test]
    fn output_size_is_ceil_division() -> Result<()> {
        let mut rng = rand::thread_rng();

        for _ in 0..20 {
            let h = rng.gen_range(1..40);
            let w = rng.gen_range(1..40);
            let sh = rng.gen_range(1..5);
            let sw = rng.gen_range(1..5);

            for kind in [PoolKind::Max, PoolKind::Avg] {
                let pool = SamePool2D::new(kind, [sh + 1, sw + 1], [sh, sw])?;
                let output = pool.forward(&Tensor::randn(&[1, 2, h as i64, w as i64], FLOAT_CPU))?;
                let expect_h = (h + sh - 1) / sh;
                let expect_w = (w + sw - 1) / sw;
                assert_eq!(output.size(), vec![1, 2, expect_h as i64, expect_w as i64]);
            }
        }
        Ok(())
    }

    #[test]
    fn max_pool_ignores_padding() -> Result<()> {
        let input = -Tensor::ones(&[1, 1, 4, 4], FLOAT_CPU);
        let pool = SamePool2D::new(PoolKind::Max, [3, 3], [2, 2])?;
        let output = pool.forward(&input)?;
        assert_eq!(output.size(), vec![1, 1, 2, 2]);
        assert_abs_diff_eq!(f64::from(output.max()), -1.0);
        Ok(())
    }

    #[test]
    fn avg_pool_excludes_padding() -> Result<()> {
        let input = Tensor::ones(&[1, 3, 5, 5], FLOAT_CPU) * 2.0;
        let pool = SamePool2D::new(PoolKind::Avg, [3, 3], [2, 2])?;
        let output = pool.forward(&input)?;
        assert_eq!(output.size(), vec![1, 3, 3, 3]);
        assert_abs_diff_eq!(f64::from(output.min()), 2.0, epsilon = 1e-6);
        assert_abs_diff_eq!(f64::from(output.max()), 2.0, epsilon = 1e-6);
        Ok(())
    }
}
