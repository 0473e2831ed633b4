//! Error types for the medcalc_core library.

use crate::types::{PluginId, ValidationResult};
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for medcalc_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No module is registered for the requested plugin id
    #[error("Plugin not found: {0}")]
    PluginNotFound(PluginId),

    /// Structural or smoke-test failure during install/validate
    #[error("Plugin validation failed for {id}: {reason}")]
    PluginValidation { id: PluginId, reason: String },

    /// `calculate` was reached with inputs that do not validate
    #[error("Calculation precondition failed for {id}: {count} invalid field(s)", count = .errors.errors.len())]
    CalculationPrecondition {
        id: PluginId,
        errors: ValidationResult,
    },

    /// Lifecycle action not allowed from the current state
    #[error("Cannot {action} plugin {id} from state {from}")]
    InvalidTransition {
        id: PluginId,
        from: crate::lifecycle::PluginState,
        action: &'static str,
    },

    /// A calculator failed while computing a result
    #[error("Calculation error: {0}")]
    Calculation(String),

    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Plugin id this error refers to, if any
    pub fn plugin_id(&self) -> Option<&PluginId> {
        match self {
            Error::PluginNotFound(id)
            | Error::PluginValidation { id, .. }
            | Error::CalculationPrecondition { id, .. }
            | Error::InvalidTransition { id, .. } => Some(id),
            _ => None,
        }
    }
}
