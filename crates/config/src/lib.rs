// Configuration loading

pub mod settings;

pub use settings::{
    GeocoderSettings, InputSettings, OverpassSettings, ReconcileSettings, RetrySettings,
    Settings, ThrottleSettings,
};

use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    /// Settings file could not be read.
    Io { path: String, message: String },
    /// TOML parse / deserialization error.
    Parse(String),
    /// Semantically invalid settings (empty URL, zero retry cap, ...).
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, message } => write!(f, "cannot read settings '{path}': {message}"),
            Self::Parse(msg) => write!(f, "settings parse error: {msg}"),
            Self::Validation(msg) => write!(f, "invalid settings: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
