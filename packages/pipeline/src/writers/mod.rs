// packages/pipeline/src/writers/mod.rs
//! Event writer backends
//!
//! Every backend persists events to one physical medium and goes through
//! the same lifecycle: `init` → `open` → `write`* → `close`.
//!
//! - **FileWriter**: append-only text records
//! - **SocketWriter**: one JSON document per non-blocking send
//! - **DatabaseWriter**: pipelined inserts over a single connection
//! - **WriterCollection**: deduplicated set fanning the lifecycle out
//!
//! # Architecture
//!
//! ```text
//! AspectLogger::write(event)
//!     │
//!     └─ WriterCollection::write ─┬─ FileWriter     → format → append
//!                                 ├─ SocketWriter   → format → send
//!                                 └─ DatabaseWriter → page insert (once)
//!                                                     → flatten params
//!                                                     → pipelined execute
//! ```

pub mod collection;
pub mod database;
pub mod file;
pub mod pipeline;
pub mod socket;

use crate::model::Event;
use crate::utils::config::WriterEntry;
use crate::utils::errors::{LoggerError, Result};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use collection::{WriteSummary, WriterCollection};
pub use database::{DatabaseConfig, DatabaseWriter};
pub use file::{FileConfig, FileWriter};
pub use pipeline::{Connector, PendingResult, PipelineConnection, SqliteConnector, SqlitePipeline};
pub use socket::{SocketConfig, SocketWriter};

/// Backend lifecycle
pub trait EventWriter: Send {
    /// Backend kind
    fn kind(&self) -> WriterKind;

    /// Content-derived identity
    fn key(&self) -> &WriterKey;

    /// Validate configuration and acquire anything that does not need the
    /// remote side
    fn init(&mut self) -> Result<()>;

    /// Connect to the medium. Failure removes the backend for good.
    fn open(&mut self) -> Result<()>;

    /// Persist one event. Failure is transient.
    fn write(&mut self, event: &Event) -> Result<()>;

    /// Release the medium. Must be safe to call more than once.
    fn close(&mut self) -> Result<()>;
}

/// Backend-specific rendering of an event
pub trait EventFormatter {
    type Output;

    fn format(&self, event: &Event) -> Result<Self::Output>;
}

type WriterConstructor = fn(&WriterEntry) -> Result<Box<dyn EventWriter>>;

/// Closed set of backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WriterKind {
    File,
    Socket,
    Database,
}

impl WriterKind {
    pub const ALL: [WriterKind; 3] = [WriterKind::File, WriterKind::Socket, WriterKind::Database];

    pub fn as_str(&self) -> &'static str {
        match self {
            WriterKind::File => "file",
            WriterKind::Socket => "socket",
            WriterKind::Database => "database",
        }
    }

    fn constructor(self) -> WriterConstructor {
        match self {
            WriterKind::File => build_file,
            WriterKind::Socket => build_socket,
            WriterKind::Database => build_database,
        }
    }

    /// Construct the backend for an entry of this kind
    pub fn build(self, entry: &WriterEntry) -> Result<Box<dyn EventWriter>> {
        (self.constructor())(entry)
    }

    /// Check that an entry's settings decode for this kind
    pub fn validate(self, entry: &WriterEntry) -> Result<()> {
        match self {
            WriterKind::File => entry.settings::<FileConfig>().map(|_| ()),
            WriterKind::Socket => entry.settings::<SocketConfig>().map(|_| ()),
            WriterKind::Database => entry.settings::<DatabaseConfig>().map(|_| ()),
        }
    }
}

fn build_file(entry: &WriterEntry) -> Result<Box<dyn EventWriter>> {
    Ok(Box::new(FileWriter::new(entry.settings()?)?))
}

fn build_socket(entry: &WriterEntry) -> Result<Box<dyn EventWriter>> {
    Ok(Box::new(SocketWriter::new(entry.settings()?)?))
}

fn build_database(entry: &WriterEntry) -> Result<Box<dyn EventWriter>> {
    Ok(Box::new(DatabaseWriter::sqlite(entry.settings()?)?))
}

impl FromStr for WriterKind {
    type Err = LoggerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(WriterKind::File),
            "socket" => Ok(WriterKind::Socket),
            "database" | "sqlite" => Ok(WriterKind::Database),
            _ => Err(LoggerError::UnknownWriterKind(s.to_string())),
        }
    }
}

impl fmt::Display for WriterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a writer: kind plus serialized configuration.
///
/// Two writers with equal keys are the same writer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WriterKey(String);

impl WriterKey {
    pub fn new<C: Serialize>(kind: WriterKind, config: &C) -> Result<Self> {
        let config = serde_json::to_string(config)?;
        Ok(Self(format!("{}:{}", kind.as_str(), config)))
    }

    /// Key from an already-rendered identity string
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WriterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
