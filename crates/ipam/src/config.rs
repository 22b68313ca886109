//! Engine configuration

use crate::error::IpamError;
use std::env;

/// Default ceiling for every read-modify-write retry loop
pub const DEFAULT_MAX_RETRIES: usize = 10;

/// Environment variable overriding [`IpamConfig::max_retries`]
pub const MAX_RETRIES_ENV: &str = "IPAM_MAX_RETRIES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IpamConfig {
    /// Attempts per retry loop before giving up with `MaxRetries`
    pub max_retries: usize,
}

impl Default for IpamConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl IpamConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, IpamError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, IpamError> {
        let mut config = Self::default();
        if let Some(raw) = lookup(MAX_RETRIES_ENV) {
            config.max_retries = match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(IpamError::InvalidConfig(format!(
                        "{} must be a positive integer, got '{}'",
                        MAX_RETRIES_ENV, raw
                    )));
                }
            };
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        let config = IpamConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, IpamConfig::default());
        assert_eq!(config.max_retries, 10);
    }

    #[test]
    fn test_max_retries_override() {
        let config = IpamConfig::from_lookup(|_| Some(" 25 ".to_string())).unwrap();
        assert_eq!(config.max_retries, 25);
    }

    #[test]
    fn test_rejects_zero_and_garbage() {
        for raw in ["0", "-1", "ten"] {
            let result = IpamConfig::from_lookup(|_| Some(raw.to_string()));
            assert!(matches!(result, Err(IpamError::InvalidConfig(_))), "accepted {raw}");
        }
    }
}
