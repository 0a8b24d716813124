// packages/pipeline/src/lib.rs
//! Aspect Logger
//!
//! Persists intercepted method calls ("events") to one or more storage
//! backends. The instrumentation layer hands every captured call to the
//! façade, which fans it out to each live writer and keeps going when one
//! of them fails.
//!
//! # Architecture
//!
//! - **logger**: `AspectLogger` façade, startup and shutdown
//! - **writers**: backend contract, registry, file/socket/database writers,
//!   and the deduplicating writer collection
//! - **encoding**: flattening of nested parameters into key/value text
//! - **model**: page context, events and parameter values
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration and errors

pub mod encoding;
pub mod logger;
pub mod model;
pub mod observability;
pub mod utils;
pub mod writers;

// Re-export commonly used types
pub use logger::AspectLogger;
pub use model::{Event, ObjectRef, PageContext, ParamMap, ParamValue, StackFrame};
pub use utils::config::{LoggerConfig, WriterEntry};
pub use utils::errors::{LoggerError, Result};
pub use writers::{EventFormatter, EventWriter, WriteSummary, WriterCollection, WriterKey, WriterKind};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
