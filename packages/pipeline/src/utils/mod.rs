// packages/pipeline/src/utils/mod.rs
//! Configuration and error types shared across the crate

pub mod config;
pub mod errors;

pub use config::{LoggerConfig, ObservabilityConfig, WriterEntry};
pub use errors::{LoggerError, Result};
