use crate::common::*;

#[cfg(debug_assertions)]
static SMALL_VARIANCE_WARN: Once = Once::new();

/// Batch normalization options. The defaults follow the TF Keras layer,
/// with momentum expressed in the libtorch convention.
#[derive(Debug, Clone)]
pub struct BatchNormInit {
    pub cudnn_enabled: bool,
    pub eps: R64,
    pub momentum: R64,
    pub affine: bool,
}

impl Default for BatchNormInit {
    fn default() -> Self {
        Self {
            cudnn_enabled: true,
            eps: r64(1e-3),
            momentum: r64(0.01),
            affine: true,
        }
    }
}

impl BatchNormInit {
    pub fn build<'a>(self, path: impl Borrow<nn::Path<'a>>, out_dim: usize) -> BatchNorm {
        let path = path.borrow();
        let Self {
            cudnn_enabled,
            eps,
            momentum,
            affine,
        } = self;
        let out_dim = out_dim as i64;

        let ws = affine.then(|| path.var("weight", &[out_dim], nn::Init::Const(1.0)));
        let bs = affine.then(|| path.var("bias", &[out_dim], nn::Init::Const(0.0)));

        BatchNorm {
            running_mean: path.zeros_no_train("running_mean", &[out_dim]),
            running_var: path.ones_no_train("running_var", &[out_dim]),
            ws,
            bs,
            cudnn_enabled,
            eps: eps.raw(),
            momentum: momentum.raw(),
        }
    }
}

/// Batch normalization over the channel axis of NCHW features.
///
/// The running statistics are the only state mutated by a forward pass, and
/// only when `train` is set.
#[derive(Debug)]
pub struct BatchNorm {
    running_mean: Tensor,
    running_var: Tensor,
    ws: Option<Tensor>,
    bs: Option<Tensor>,
    cudnn_enabled: bool,
    eps: f64,
    momentum: f64,
}

impl nn::ModuleT for BatchNorm {
    fn forward_t(&self, input: &Tensor, train: bool) -> Tensor {
        let Self {
            ref running_mean,
            ref running_var,
            ref ws,
            ref bs,
            momentum,
            eps,
            cudnn_enabled,
        } = *self;

        let output = Tensor::batch_norm(
            input,
            ws.as_ref(),
            bs.as_ref(),
            Some(running_mean),
            Some(running_var),
            train,
            momentum,
            eps,
            cudnn_enabled,
        );

        #[cfg(debug_assertions)]
        {
            let has_small_var = bool::from(running_var.abs().le(1e-15).any());
            if has_small_var {
                SMALL_VARIANCE_WARN.call_once(|| {
                    warn!(
                        "running variance {} is too small",
                        f64::from(running_var.abs().min())
                    );
                });
            }
        }

        output
    }
}

impl BatchNorm {
    pub fn num_features(&self) -> i64 {
        self.running_mean.size()[0]
    }

    pub fn running_mean(&self) -> &Tensor {
        &self.running_mean
    }

    pub fn running_var(&self) -> &Tensor {
        &self.running_var
    }

    pub fn has_nan(&self) -> bool {
        let Self {
            ws,
            bs,
            running_mean,
            running_var,
            ..
        } = self;

        let has_nan = |tensor: &Tensor| bool::from(tensor.isnan().any());
        ws.as_ref().map(has_nan).unwrap_or(false)
            || bs.as_ref().map(has_nan).unwrap_or(false)
            || has_nan(running_mean)
            || has_nan(running_var)
    }
}
