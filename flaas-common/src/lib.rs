//! # flaas common library
//!
//! Shared code for the flaas crates:
//! - Error type used by configuration and file helpers
//! - TOML configuration discovery and loading
//! - Content hashing of rendered artifacts
//! - UTC timestamp helpers

pub mod config;
pub mod error;
pub mod hash;
pub mod time;

pub use error::{Error, Result};
