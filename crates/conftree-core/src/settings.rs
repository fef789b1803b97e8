//! Tree settings.
//!
//! Settings are plain serde structs so they can be embedded in whatever
//! configuration document the host application already loads.

use serde::{Deserialize, Serialize};

use crate::path::DEFAULT_DELIMITER;

/// Errors that can occur when loading settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("invalid path delimiter {0:?}: must be a visible, non-alphanumeric character")]
    InvalidDelimiter(char),

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Settings for a [`ConfigTree`](crate::ConfigTree).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeSettings {
    /// Character separating path segments
    pub delimiter: char,
}

impl Default for TreeSettings {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER,
        }
    }
}

impl TreeSettings {
    /// Parse settings from JSON and validate them. Missing fields take their
    /// defaults.
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let settings: TreeSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let c = self.delimiter;
        if c.is_whitespace() || c.is_control() || c.is_alphanumeric() {
            return Err(SettingsError::InvalidDelimiter(c));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = TreeSettings::default();
        assert_eq!(settings.delimiter, ':');
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_json_defaults_missing_fields() {
        let settings = TreeSettings::from_json("{}").unwrap();
        assert_eq!(settings, TreeSettings::default());
    }

    #[test]
    fn test_from_json_custom_delimiter() {
        let settings = TreeSettings::from_json(r#"{"delimiter": "/"}"#).unwrap();
        assert_eq!(settings.delimiter, '/');
    }

    #[test]
    fn test_invalid_delimiter() {
        for json in [r#"{"delimiter": " "}"#, r#"{"delimiter": "a"}"#] {
            let err = TreeSettings::from_json(json).unwrap_err();
            assert!(matches!(err, SettingsError::InvalidDelimiter(_)));
        }
    }

    #[test]
    fn test_malformed_json() {
        let err = TreeSettings::from_json("{").unwrap_err();
        assert!(matches!(err, SettingsError::Parse(_)));
    }

    #[test]
    fn test_settings_serialize() {
        let json = serde_json::to_string(&TreeSettings::default()).unwrap();
        assert_eq!(json, r#"{"delimiter":":"}"#);
    }
}
