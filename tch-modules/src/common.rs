pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use itertools::{izip, Itertools as _};
pub use log::{debug, warn};
pub use noisy_float::prelude::*;
pub use std::{
    borrow::Borrow,
    fmt::{self, Display},
    sync::Once,
};
pub use strum::AsRefStr;
pub use tch::{
    nn::{self, Module as _, ModuleT as _},
    Device, Kind, Tensor,
};
pub use tch_act::{Activation, TensorActivationExt as _};
