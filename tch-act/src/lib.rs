#[cfg(feature = "tch")]
pub use impls::*;
#[cfg(feature = "tch")]
mod impls;

#[cfg(feature = "tch")]
pub use r#trait::*;
#[cfg(feature = "tch")]
mod r#trait;

use strum::{AsRefStr, EnumString};

/// Activation applied after normalization in fusion nodes and prediction towers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Activation {
    #[strum(serialize = "swish", serialize = "silu")]
    #[cfg_attr(feature = "serde", serde(alias = "silu"))]
    Swish,
    /// Same as swish, computed with elementary ops only.
    SwishNative,
    #[strum(serialize = "hswish")]
    #[cfg_attr(feature = "serde", serde(rename = "hswish"))]
    HardSwish,
    Relu,
    Relu6,
    Mish,
    Gelu,
    /// Identity.
    Linear,
}

impl Default for Activation {
    fn default() -> Self {
        Self::Swish
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parse_activation_tags() {
        assert_eq!(Activation::from_str("swish").unwrap(), Activation::Swish);
        assert_eq!(Activation::from_str("silu").unwrap(), Activation::Swish);
        assert_eq!(
            Activation::from_str("hswish").unwrap(),
            Activation::HardSwish
        );
        assert_eq!(Activation::from_str("relu6").unwrap(), Activation::Relu6);
        assert!(Activation::from_str("leaky").is_err());
        assert_eq!(Activation::Relu6.as_ref(), "relu6");
    }
}
