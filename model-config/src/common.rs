pub use anyhow::{bail, ensure, format_err, Context as _, Error, Result};
pub use itertools::Itertools as _;
pub use log::{debug, info};
pub use noisy_float::prelude::*;
pub use serde::{Deserialize, Serialize};
pub use std::{
    fmt::{self, Display},
    ops::RangeInclusive,
    path::Path,
    str::FromStr,
};
pub use strum::{AsRefStr, EnumString};
pub use crate::{ensure_config, error::ConfigurationError};
