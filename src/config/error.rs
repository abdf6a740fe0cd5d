//! Configuration Error Types
//!
//! Errors raised while loading and validating the engine configuration.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors with detailed context
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// The configuration directory does not exist
    #[error("Configuration directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// A configuration source could not be read or parsed
    #[error("Failed to load configuration from {source_name}: {error}")]
    SourceError { source_name: String, error: String },

    /// Merged configuration does not match the expected schema
    #[error("Failed to deserialize configuration: {error}")]
    DeserializationError { error: String },

    /// Invalid configuration value
    #[error("Invalid value '{value}' for field '{field}': {context}")]
    InvalidValue {
        field: String,
        value: String,
        context: String,
    },

    /// Missing required configuration field
    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },
}

impl ConfigurationError {
    /// Create a source loading error
    pub fn source_error<S: Into<String>, E: std::fmt::Display>(source_name: S, error: E) -> Self {
        Self::SourceError {
            source_name: source_name.into(),
            error: error.to_string(),
        }
    }

    /// Create an invalid value error
    pub fn invalid_value<F: Into<String>, V: ToString, C: Into<String>>(
        field: F,
        value: V,
        context: C,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            context: context.into(),
        }
    }

    /// Create a missing required field error
    pub fn missing_required_field<F: Into<String>, C: Into<String>>(field: F, context: C) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        match error {
            config::ConfigError::Foreign(_) | config::ConfigError::FileParse { .. } => {
                Self::source_error("configuration file", error)
            }
            other => Self::DeserializationError {
                error: other.to_string(),
            },
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigurationError>;
