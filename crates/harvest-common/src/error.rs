//! Error types shared across Harvest crates

use thiserror::Error;

/// Result type alias for Harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Workspace-level error for configuration and plumbing failures.
///
/// Component errors (fetching, checkpointing, output) live next to the
/// component that raises them; this type covers what they share.
#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value for {key}: '{value}'")]
    InvalidSetting { key: String, value: String },
}

impl HarvestError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid setting error for an environment key
    pub fn invalid_setting(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidSetting {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_message() {
        let err = HarvestError::config("at least one project is required");
        assert_eq!(
            err.to_string(),
            "Configuration error: at least one project is required"
        );
    }

    #[test]
    fn test_invalid_setting_message() {
        let err = HarvestError::invalid_setting("HARVEST_PAGE_SIZE", "abc");
        assert_eq!(err.to_string(), "Invalid value for HARVEST_PAGE_SIZE: 'abc'");
    }
}
