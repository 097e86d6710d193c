//! Error types for mastering
//!
//! Every variant here is fatal to a run. Recoverable conditions (constraint
//! violations, skipped optional parameters) are modelled as values, not errors.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for mastering operations
pub type Result<T> = std::result::Result<T, Error>;

/// Mastering errors
#[derive(Error, Debug)]
pub enum Error {
    /// No device on the track matched the requested name
    #[error("Device '{name}' not found on track {track}; devices found: [{}]", available.join(", "))]
    DeviceNotFound {
        name: String,
        track: i32,
        available: Vec<String>,
    },

    /// A required parameter could not be mapped onto the device
    #[error("Parameter '{parameter}' not found on device '{device}'; parameters found: [{}]", available.join(", "))]
    ParameterNotFound {
        device: String,
        parameter: String,
        available: Vec<String>,
    },

    /// Buffer handed to the analyzer holds no frames
    #[error("Cannot analyze empty audio")]
    EmptyAudio,

    /// Loudness meter rejected the stream format or samples
    #[error("Loudness meter error: {0}")]
    Meter(String),

    /// Audio file could not be decoded
    #[error("Failed to decode {path}: {detail}")]
    Decode { path: PathBuf, detail: String },

    /// Export did not produce a stable file in time
    #[error("Render of {path} timed out after {waited_s}s")]
    RenderTimeout { path: PathBuf, waited_s: u64 },

    /// Export collaborator reported failure
    #[error("Render of {path} failed: {detail}")]
    RenderFailed { path: PathBuf, detail: String },

    /// A precondition check failed and the operator did not override it
    #[error("Precondition '{check}' failed: {detail}")]
    PreconditionFailed { check: String, detail: String },

    /// Invalid run or chain configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Ledger line that does not parse as a record
    #[error("Corrupt ledger {path} at line {line}: {detail}")]
    LedgerCorrupt { path: PathBuf, line: usize, detail: String },

    /// Ledger record not found
    #[error("No ledger record for artifact '{0}'")]
    RecordNotFound(String),

    /// Remote control failure
    #[error(transparent)]
    Osc(#[from] flaas_osc::OscError),

    /// Shared helper failure (config, hashing)
    #[error(transparent)]
    Common(#[from] flaas_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
