//! Common error types for flaas

use thiserror::Error;

/// Common result type for flaas operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across flaas crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML file could not be parsed into the requested shape
    #[error("Config parse error in {path}: {source}")]
    ConfigParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}
