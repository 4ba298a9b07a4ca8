pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use itertools::{izip, Itertools as _};
pub use log::{debug, info};
pub use model_config::{ensure_config, ConfigurationError};
pub use noisy_float::prelude::*;
pub use std::{borrow::Borrow, iter};
pub use tch::{
    nn::{self, Module as _, ModuleT as _},
    Device, Kind, Tensor,
};
pub use tch_act::{Activation, TensorActivationExt as _};
pub use tch_tensor_like::TensorLike;
