// packages/pipeline/src/writers/collection.rs
//! Deduplicated set of writers driven as one
//!
//! Failure policy per lifecycle step:
//! - `init`: a backend that fails is discarded
//! - `open`: a backend that fails is pruned and never called again
//! - `write`: failures are logged, the backend stays
//! - `close`: failures are logged, every backend still gets closed

use crate::model::Event;
use crate::utils::config::WriterEntry;
use crate::utils::errors::{LoggerError, Result};
use crate::writers::{EventWriter, WriterKey};
use tracing::{debug, error, info, warn};

/// Outcome of fanning one event out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// Backends that accepted the event
    pub delivered: usize,

    /// Backends that failed it
    pub failed: usize,
}

/// Writers keyed by identity, in registration order
#[derive(Default)]
pub struct WriterCollection {
    writers: Vec<(WriterKey, Box<dyn EventWriter>)>,
}

impl WriterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and initialize a backend per entry.
    ///
    /// Entries with an unknown kind, bad settings or a failing `init` are
    /// logged and skipped. Fails only if no backend survives.
    pub fn init(&mut self, entries: &[WriterEntry]) -> Result<()> {
        for entry in entries {
            let built = entry.writer_kind().and_then(|kind| kind.build(entry));

            let mut writer = match built {
                Ok(writer) => writer,
                Err(e) => {
                    error!("Skipping {} writer: {}", entry.kind, e);
                    continue;
                }
            };

            if let Err(e) = writer.init() {
                error!("Failed to initialize {} writer: {}", writer.key(), e);
                continue;
            }

            self.add(writer);
        }

        info!("Initialized {} of {} writers", self.writers.len(), entries.len());

        self.ensure_usable("init")
    }

    /// Open every backend, pruning the ones that fail
    pub fn open(&mut self) -> Result<()> {
        self.writers.retain_mut(|(key, writer)| match writer.open() {
            Ok(()) => {
                debug!("Opened writer {}", key);
                true
            }
            Err(e) => {
                error!("Pruning writer {}: {}", key, e);
                metrics::counter!("aspect_logger_writers_pruned_total", "writer" => writer.kind().as_str())
                    .increment(1);
                false
            }
        });

        self.ensure_usable("open")
    }

    /// Deliver an event to every live backend
    pub fn write(&mut self, event: &Event) -> WriteSummary {
        let mut summary = WriteSummary::default();

        for (key, writer) in self.writers.iter_mut() {
            let kind = writer.kind().as_str();

            match writer.write(event) {
                Ok(()) => {
                    summary.delivered += 1;
                    metrics::counter!("aspect_logger_events_written_total", "writer" => kind).increment(1);
                }
                Err(e) => {
                    summary.failed += 1;
                    metrics::counter!("aspect_logger_write_failures_total", "writer" => kind).increment(1);
                    if e.is_fatal_for_backend() {
                        error!("Writer {} failed to write {}::{}: {}", key, event.class, event.action, e);
                    } else {
                        warn!("Writer {} failed to write {}::{}: {}", key, event.class, event.action, e);
                    }
                }
            }
        }

        summary
    }

    /// Close every backend, logging and swallowing individual failures
    pub fn close(&mut self) {
        for (key, writer) in self.writers.iter_mut() {
            if let Err(e) = writer.close() {
                warn!("Failed to close writer {}: {}", key, e);
            }
        }
    }

    /// A collection has no single rendering of an event
    pub fn format(&self, _event: &Event) -> Result<()> {
        Err(LoggerError::InvalidOperation(
            "format is not defined for a writer collection".to_string(),
        ))
    }

    /// Add a writer, replacing any writer with the same key
    pub fn add(&mut self, writer: Box<dyn EventWriter>) {
        let key = writer.key().clone();

        match self.writers.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => {
                debug!("Replacing writer {}", key);
                slot.1 = writer;
            }
            None => self.writers.push((key, writer)),
        }
    }

    /// Remove and return the writer with the given key
    pub fn remove(&mut self, key: &WriterKey) -> Option<Box<dyn EventWriter>> {
        let index = self.writers.iter().position(|(k, _)| k == key)?;
        Some(self.writers.remove(index).1)
    }

    pub fn contains(&self, key: &WriterKey) -> bool {
        self.writers.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &WriterKey> {
        self.writers.iter().map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    fn ensure_usable(&self, step: &str) -> Result<()> {
        if self.writers.is_empty() {
            return Err(LoggerError::NoWriters(step.to_string()));
        }

        Ok(())
    }
}
