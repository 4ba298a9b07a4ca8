use crate::common::*;

/// The network cannot be built from the given options.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("configuration error: {message}")]
pub struct ConfigurationError {
    pub message: String,
}

impl ConfigurationError {
    pub fn new(message: impl Display) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

/// Parses a closed tag such as a weighting scheme or pooling type.
pub fn parse_tag<T>(kind: &str, text: &str) -> Result<T, ConfigurationError>
where
    T: FromStr,
{
    text.parse()
        .map_err(|_| ConfigurationError::new(format!("unknown {} '{}'", kind, text)))
}

/// Like `ensure!`, but the error is a [ConfigurationError].
#[macro_export]
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::ConfigurationError::new(format!($($arg)+)).into());
        }
    };
}
