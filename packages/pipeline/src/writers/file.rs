// packages/pipeline/src/writers/file.rs
//! Append-only text file writer
//!
//! Each event becomes one multi-line record terminated by a blank line.

use crate::model::Event;
use crate::utils::errors::{LoggerError, Result};
use crate::writers::{EventFormatter, EventWriter, WriterKey, WriterKind};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::{debug, error, warn};

/// File writer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    /// Target file, created if missing
    pub path: PathBuf,
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

/// Appends formatted records to a file
pub struct FileWriter {
    config: FileConfig,
    key: WriterKey,
    file: Option<File>,
}

impl FileWriter {
    /// Create a new file writer. Nothing is opened yet.
    pub fn new(config: FileConfig) -> Result<Self> {
        let key = WriterKey::new(WriterKind::File, &config)?;

        Ok(Self {
            config,
            key,
            file: None,
        })
    }

    /// Whether a handle is currently held
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn config(&self) -> &FileConfig {
        &self.config
    }
}

impl EventFormatter for FileWriter {
    type Output = String;

    fn format(&self, event: &Event) -> Result<String> {
        let object = match &event.object {
            Some(object) => object.render(),
            None => "null".to_string(),
        };
        let stack = serde_json::to_string(&event.stack_trace)?;
        let params = serde_json::to_string(&event.params)?;

        Ok(format!(
            "Action captured:\n\t time:\t{}\n\t user:\t{}\n\t class\t{}\n\t object\t{}\n\t action\t{}\n\t stack\t{}\n\t params\t{}\n\n",
            event.time.format("%Y-%m-%d %H:%M:%S"),
            event.page.user.as_deref().unwrap_or("-"),
            event.class,
            object,
            event.action,
            stack,
            params,
        ))
    }
}

impl EventWriter for FileWriter {
    fn kind(&self) -> WriterKind {
        WriterKind::File
    }

    fn key(&self) -> &WriterKey {
        &self.key
    }

    fn init(&mut self) -> Result<()> {
        if self.config.path.as_os_str().is_empty() {
            return Err(LoggerError::Configuration("file writer path is empty".to_string()));
        }

        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.config.path)
            .map_err(|e| {
                error!("Failed to open log file {:?}: {}", self.config.path, e);
                LoggerError::Connection(format!("failed to open {:?}: {}", self.config.path, e))
            })?;

        debug!("Opened log file {:?}", self.config.path);
        self.file = Some(file);

        Ok(())
    }

    fn write(&mut self, event: &Event) -> Result<()> {
        let message = self.format(event)?;

        if self.file.is_none() {
            warn!("Log file {:?} not open, reopening", self.config.path);
            self.open()?;
        }

        let Some(file) = self.file.as_mut() else {
            return Err(LoggerError::Write(format!("{:?} is not open", self.config.path)));
        };

        if let Err(e) = file.write_all(message.as_bytes()) {
            // Drop the handle so the next write reopens it
            self.file = None;
            return Err(LoggerError::Write(format!(
                "failed to write to {:?}: {}",
                self.config.path, e
            )));
        }

        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            debug!("Closed log file {:?}", self.config.path);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObjectRef, PageContext, ParamMap, StackFrame};
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn event() -> Event {
        let page = Arc::new(PageContext::new("/cart", Utc::now()).with_user("u-17"));
        Event::new(page, "Foo", "bar")
            .at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 5).unwrap())
            .with_object(ObjectRef::from_serialize("Foo", json!({"n": 2})))
            .with_params(ParamMap::new().with("x", 1i64))
            .with_stack_trace(vec![StackFrame::new("bar").in_class("Foo")])
    }

    #[test]
    fn test_format_record() {
        let writer = FileWriter::new(FileConfig::new("/unused")).unwrap();
        let record = writer.format(&event()).unwrap();

        assert!(record.starts_with("Action captured:\n"));
        assert!(record.contains("\t time:\t2024-03-01 12:30:05\n"));
        assert!(record.contains("\t user:\tu-17\n"));
        assert!(record.contains("\t class\tFoo\n"));
        assert!(record.contains("\t object\tFoo:{\"n\":2}\n"));
        assert!(record.contains("\t action\tbar\n"));
        assert!(record.contains("\t params\t{\"x\":1}\n"));
        assert!(record.ends_with("\n\n"));
    }

    #[test]
    fn test_write_appends_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        let mut writer = FileWriter::new(FileConfig::new(&path)).unwrap();

        writer.init().unwrap();
        writer.open().unwrap();
        writer.write(&event()).unwrap();
        writer.write(&event()).unwrap();
        writer.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.matches("Action captured:").count(), 2);
        assert_eq!(contents.split("\n\n").filter(|r| !r.is_empty()).count(), 2);
    }

    #[test]
    fn test_write_reopens_closed_handle() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        let mut writer = FileWriter::new(FileConfig::new(&path)).unwrap();

        writer.open().unwrap();
        writer.close().unwrap();
        assert!(!writer.is_open());

        writer.write(&event()).unwrap();
        assert!(writer.is_open());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("bar"));
    }

    #[test]
    fn test_close_twice() {
        let dir = tempdir().unwrap();
        let mut writer = FileWriter::new(FileConfig::new(dir.path().join("a.log"))).unwrap();

        writer.open().unwrap();
        assert!(writer.close().is_ok());
        assert!(writer.close().is_ok());
    }

    #[test]
    fn test_open_failure_reported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("a.log");
        let mut writer = FileWriter::new(FileConfig::new(path)).unwrap();

        let result = writer.open();
        assert!(matches!(result, Err(LoggerError::Connection(_))));
        assert!(!writer.is_open());
    }

    #[test]
    fn test_empty_path_rejected_at_init() {
        let mut writer = FileWriter::new(FileConfig::new("")).unwrap();
        assert!(matches!(writer.init(), Err(LoggerError::Configuration(_))));
    }
}
