// packages/pipeline/src/writers/database.rs
//! Database writer
//!
//! Holds one connection and two prepared statements: a page insert that
//! returns the assigned id, and an event insert. Commands on the connection
//! never overlap: before anything is sent the writer spin-polls until the
//! connection is idle and no result is left to drain. Event inserts are
//! fire-and-forget; an error in one surfaces when the next write drains it.

use crate::encoding;
use crate::model::{Event, PageContext};
use crate::utils::errors::{LoggerError, Result};
use crate::writers::pipeline::{Connector, PendingResult, PipelineConnection, SqliteConnector};
use crate::writers::{EventFormatter, EventWriter, WriterKey, WriterKind};
use rusqlite::types::Value;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const PAGES_STATEMENT: &str = "pages";
const EVENTS_STATEMENT: &str = "events";

const INSERT_PAGE: &str = r#"
INSERT INTO "pages" ("uri", "query", "session", "time")
  VALUES (?1, ?2, ?3, ?4)
  RETURNING id
"#;

const INSERT_EVENT: &str = r#"
INSERT INTO "events" ("pageId", "time", "class", "object", "action", "params")
  VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#;

/// Database writer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Connection string handed to the connector
    #[serde(alias = "connection_string", alias = "connectionstring")]
    pub connection_string: String,

    /// Sleep between idle checks, in microseconds
    #[serde(
        default = "default_poll_interval_micros",
        alias = "poll_interval_micros",
        alias = "pollintervalmicros"
    )]
    pub poll_interval_micros: u64,

    /// Give up waiting for an idle connection after this many milliseconds
    #[serde(
        default = "default_poll_timeout_millis",
        alias = "poll_timeout_millis",
        alias = "polltimeoutmillis"
    )]
    pub poll_timeout_millis: u64,
}

fn default_poll_interval_micros() -> u64 {
    100
}

fn default_poll_timeout_millis() -> u64 {
    5000
}

impl DatabaseConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            poll_interval_micros: default_poll_interval_micros(),
            poll_timeout_millis: default_poll_timeout_millis(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_micros(self.poll_interval_micros)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_millis)
    }
}

/// Writes pages and events through a pipelined connection
pub struct DatabaseWriter<K: Connector = SqliteConnector> {
    config: DatabaseConfig,
    key: WriterKey,
    connector: K,
    connection: Option<K::Connection>,
}

impl DatabaseWriter<SqliteConnector> {
    /// Create a writer backed by SQLite
    pub fn sqlite(config: DatabaseConfig) -> Result<Self> {
        Self::with_connector(config, SqliteConnector)
    }
}

impl<K: Connector> DatabaseWriter<K> {
    /// Create a writer using a custom connector
    pub fn with_connector(config: DatabaseConfig, connector: K) -> Result<Self> {
        let key = WriterKey::new(WriterKind::Database, &config)?;

        Ok(Self {
            config,
            key,
            connector,
            connection: None,
        })
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn connection_mut(&mut self) -> Result<&mut K::Connection> {
        self.connection
            .as_mut()
            .ok_or_else(|| LoggerError::Write("database connection is not open".to_string()))
    }

    /// Wait until the connection is idle with nothing left to drain.
    ///
    /// Every drained result that carries an error is logged.
    fn wait_idle(conn: &mut K::Connection, interval: Duration, timeout: Duration, purpose: &str) -> Result<()> {
        let deadline = Instant::now() + timeout;

        loop {
            let drained = conn.take_result();
            let nothing_pending = drained.is_none();

            if let Some(result) = drained {
                log_failed_result(&result);
            }

            if nothing_pending && !conn.is_busy() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(LoggerError::Timeout(format!(
                    "connection still busy after {:?} waiting to {}",
                    timeout, purpose
                )));
            }

            std::thread::sleep(interval);
        }
    }

    fn prepare(&mut self, name: &str, sql: &str) -> Result<()> {
        let (interval, timeout) = (self.config.poll_interval(), self.config.poll_timeout());
        let conn = self.connection_mut()?;

        Self::wait_idle(conn, interval, timeout, &format!("prepare {}", name))?;
        conn.send_prepare(name, sql)?;

        // Unlike event inserts, a failed prepare leaves the writer unusable
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(result) = conn.take_result() {
                return match result.error {
                    Some(message) => Err(LoggerError::Connection(format!(
                        "prepare {} failed: {}",
                        name, message
                    ))),
                    None => Ok(()),
                };
            }

            if !conn.is_busy() {
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(LoggerError::Timeout(format!("prepare {} still running after {:?}", name, timeout)));
            }

            std::thread::sleep(interval);
        }
    }

    /// Insert the page and return its id
    fn insert_page(
        conn: &mut K::Connection,
        page: &PageContext,
        interval: Duration,
        timeout: Duration,
    ) -> Result<i64> {
        Self::wait_idle(conn, interval, timeout, "insert page")?;

        let params = vec![
            Value::Text(page.uri.clone()),
            Value::Text(encoding::encode(&page.query)),
            Value::Text(encoding::encode(&page.session)),
            Value::Text(page.request_time.to_rfc3339()),
        ];

        let id = conn.query_id(PAGES_STATEMENT, &params)?;
        metrics::counter!("aspect_logger_pages_inserted_total").increment(1);
        debug!("Page {} stored with id {}", page.uri, id);

        Ok(id)
    }

    /// Send the event insert and return whatever result is available
    /// immediately, which may be none while the command is in flight.
    ///
    /// The page is inserted first, synchronously, if it has no id yet.
    ///
    /// A connection that stays busy past the poll timeout fails this event
    /// only, as a write error.
    pub fn submit(&mut self, event: &Event) -> Result<Option<PendingResult>> {
        self.send_event(event).map_err(|e| match e {
            LoggerError::Timeout(message) => LoggerError::Write(message),
            other => other,
        })
    }

    fn send_event(&mut self, event: &Event) -> Result<Option<PendingResult>> {
        let (interval, timeout) = (self.config.poll_interval(), self.config.poll_timeout());
        let conn = self.connection_mut()?;

        event
            .page
            .id_or_try_insert(|page| Self::insert_page(conn, page, interval, timeout))?;

        let params = self.format(event)?;
        let conn = self.connection_mut()?;

        Self::wait_idle(conn, interval, timeout, "insert event")?;
        conn.send_execute(EVENTS_STATEMENT, &params)?;

        Ok(conn.take_result())
    }
}

fn log_failed_result(result: &PendingResult) {
    if let Some(message) = &result.error {
        warn!("Statement {} failed: {}", result.statement, message);
    }
}

impl<K: Connector> EventFormatter for DatabaseWriter<K> {
    type Output = Vec<Value>;

    fn format(&self, event: &Event) -> Result<Vec<Value>> {
        let page_id = event
            .page
            .id()
            .ok_or_else(|| LoggerError::InvalidOperation(format!("page {} has no id", event.page.uri)))?;

        let object = match &event.object {
            Some(object) => Value::Text(object.render()),
            None => Value::Null,
        };

        Ok(vec![
            Value::Integer(page_id),
            Value::Text(event.time.format("%Y-%m-%d %H:%M:%S%.6f").to_string()),
            Value::Text(event.class.clone()),
            object,
            Value::Text(event.action.clone()),
            Value::Text(encoding::encode(&event.params)),
        ])
    }
}

impl<K: Connector> EventWriter for DatabaseWriter<K> {
    fn kind(&self) -> WriterKind {
        WriterKind::Database
    }

    fn key(&self) -> &WriterKey {
        &self.key
    }

    fn init(&mut self) -> Result<()> {
        if self.config.connection_string.trim().is_empty() {
            return Err(LoggerError::Configuration(
                "database connection string is empty".to_string(),
            ));
        }

        Ok(())
    }

    fn open(&mut self) -> Result<()> {
        let conn = self.connector.connect(&self.config.connection_string).map_err(|e| {
            error!("Failed to connect to event database: {}", e);
            match e {
                LoggerError::Connection(_) => e,
                other => LoggerError::Connection(other.to_string()),
            }
        })?;
        self.connection = Some(conn);

        let prepared = self
            .prepare(PAGES_STATEMENT, INSERT_PAGE)
            .and_then(|_| self.prepare(EVENTS_STATEMENT, INSERT_EVENT));

        if let Err(e) = prepared {
            error!("Failed to prepare event statements: {}", e);
            self.close()?;
            return Err(e);
        }

        Ok(())
    }

    fn write(&mut self, event: &Event) -> Result<()> {
        match self.submit(event)? {
            Some(result) if result.is_error() => Err(LoggerError::Write(format!(
                "statement {} failed: {}",
                result.statement,
                result.error.unwrap_or_default()
            ))),
            _ => Ok(()),
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut conn) = self.connection.take() {
            conn.close()?;
        }

        Ok(())
    }
}
