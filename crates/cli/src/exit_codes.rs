//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Schedulers and wrapper scripts branch on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args)               |
//! | 3-9     | inputs           | Spreadsheet inputs unreadable            |
//! | 10-19   | config           | Settings file or overrides               |
//! | 20-29   | store            | Record store open/commit                 |
//! | 30-39   | services         | Geocoder / Overpass / cancellation       |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Map it in `pipeline_exit_code` if a pipeline error produces it

use gorodindex_config::ConfigError;
use gorodindex_io::{LoadError, StoreError};

use crate::pipeline::PipelineError;

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, invalid filter.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Inputs (3-9)
// =============================================================================

/// One of the three input spreadsheets does not exist.
/// Raised before any network traffic.
pub const EXIT_INPUT_MISSING: u8 = 3;

/// Input workbook could not be opened or has no rows.
pub const EXIT_INPUT_UNREADABLE: u8 = 4;

/// Input sheet lacks a required column (name, code, tax, population, year).
pub const EXIT_INPUT_COLUMN: u8 = 5;

// =============================================================================
// Config (10-19)
// =============================================================================

/// Settings file could not be read or written.
pub const EXIT_CONFIG_IO: u8 = 10;

/// Settings file is not valid TOML for the schema.
pub const EXIT_CONFIG_PARSE: u8 = 11;

/// Settings failed validation (no contact email, bad window, zero attempts).
pub const EXIT_CONFIG_INVALID: u8 = 12;

// =============================================================================
// Store (20-29)
// =============================================================================

/// SQLite error opening the store or committing the batch.
/// A failed commit leaves the store unchanged.
pub const EXIT_STORE: u8 = 20;

// =============================================================================
// Services (30-39)
// =============================================================================

/// HTTP client could not be constructed (TLS backend, bad user agent).
pub const EXIT_CLIENT: u8 = 30;

/// Run cancelled or deadline reached before commit; nothing was written.
pub const EXIT_CANCELLED: u8 = 31;

/// `locate` could not geocode the requested city.
pub const EXIT_NOT_FOUND: u8 = 32;

// =============================================================================
// Error Mapping
// =============================================================================

pub fn config_exit_code(err: &ConfigError) -> u8 {
    match err {
        ConfigError::Io { .. } => EXIT_CONFIG_IO,
        ConfigError::Parse(_) => EXIT_CONFIG_PARSE,
        ConfigError::Validation(_) => EXIT_CONFIG_INVALID,
    }
}

pub fn load_exit_code(err: &LoadError) -> u8 {
    match err {
        LoadError::MissingFile { .. } => EXIT_INPUT_MISSING,
        LoadError::Open { .. } | LoadError::EmptySheet { .. } => EXIT_INPUT_UNREADABLE,
        LoadError::MissingColumn { .. } => EXIT_INPUT_COLUMN,
    }
}

pub fn store_exit_code(err: &StoreError) -> u8 {
    match err {
        StoreError::Sqlite(_) => EXIT_STORE,
        StoreError::InvalidFilter(_) => EXIT_USAGE,
    }
}

/// Map a PipelineError to its exit code.
pub fn pipeline_exit_code(err: &PipelineError) -> u8 {
    match err {
        PipelineError::Config(e) => config_exit_code(e),
        PipelineError::Load(e) => load_exit_code(e),
        PipelineError::Store(e) => store_exit_code(e),
        PipelineError::Client(_) => EXIT_CLIENT,
        PipelineError::Cancelled => EXIT_CANCELLED,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_INPUT_MISSING,
            EXIT_INPUT_UNREADABLE,
            EXIT_INPUT_COLUMN,
            EXIT_CONFIG_IO,
            EXIT_CONFIG_PARSE,
            EXIT_CONFIG_INVALID,
            EXIT_STORE,
            EXIT_CLIENT,
            EXIT_CANCELLED,
            EXIT_NOT_FOUND,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }

    #[test]
    fn missing_input_maps_to_input_range() {
        let err = PipelineError::Load(LoadError::MissingFile {
            path: PathBuf::from("data/tax.xlsx"),
        });
        assert_eq!(pipeline_exit_code(&err), EXIT_INPUT_MISSING);
    }

    #[test]
    fn invalid_filter_is_usage() {
        let err = PipelineError::Store(StoreError::InvalidFilter("min > max".into()));
        assert_eq!(pipeline_exit_code(&err), EXIT_USAGE);
        assert_eq!(pipeline_exit_code(&PipelineError::Cancelled), EXIT_CANCELLED);
    }
}
