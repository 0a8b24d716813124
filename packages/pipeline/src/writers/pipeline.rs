// packages/pipeline/src/writers/pipeline.rs
//! Pipelined database connection
//!
//! A connection accepts one command at a time: a command is *sent*, and its
//! outcome later *taken* as a pending result. Callers must not send while
//! the connection is busy or a result is still waiting to be taken.
//!
//! `SqlitePipeline` runs each command to completion when it is sent and
//! parks the outcome, so the protocol is observable without a server.

use crate::utils::errors::{LoggerError, Result};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::collections::HashMap;
use tracing::{debug, info};

/// Outcome of a previously sent command
#[derive(Debug, Clone, PartialEq)]
pub struct PendingResult {
    /// Statement name the command was sent for
    pub statement: String,

    /// Rows affected on success
    pub rows: usize,

    /// Error text on failure
    pub error: Option<String>,
}

impl PendingResult {
    pub fn ok(statement: impl Into<String>, rows: usize) -> Self {
        Self {
            statement: statement.into(),
            rows,
            error: None,
        }
    }

    pub fn failed(statement: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            rows: 0,
            error: Some(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// A single database connection driven one command at a time
pub trait PipelineConnection: Send {
    /// Whether a sent command is still being processed
    fn is_busy(&mut self) -> bool;

    /// Take the next available result without waiting
    fn take_result(&mut self) -> Option<PendingResult>;

    /// Send a prepare request for a named statement
    fn send_prepare(&mut self, name: &str, sql: &str) -> Result<()>;

    /// Send an execute request for a prepared statement
    fn send_execute(&mut self, name: &str, params: &[Value]) -> Result<()>;

    /// Execute a prepared statement synchronously and return the integer in
    /// the first column of its single row
    fn query_id(&mut self, name: &str, params: &[Value]) -> Result<i64>;

    /// Close the connection
    fn close(&mut self) -> Result<()>;
}

/// Opens connections from a connection string
pub trait Connector: Send {
    type Connection: PipelineConnection;

    fn connect(&self, connection_string: &str) -> Result<Self::Connection>;
}

/// Connector for `SqlitePipeline`
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl Connector for SqliteConnector {
    type Connection = SqlitePipeline;

    fn connect(&self, connection_string: &str) -> Result<SqlitePipeline> {
        SqlitePipeline::open(connection_string)
    }
}

/// SQLite-backed pipeline
pub struct SqlitePipeline {
    conn: Option<Connection>,
    statements: HashMap<String, String>,
    pending: Option<PendingResult>,
}

impl SqlitePipeline {
    /// Open a database and make sure the schema exists.
    ///
    /// Accepts a file path, `:memory:`, or either prefixed with `sqlite://`.
    pub fn open(connection_string: &str) -> Result<Self> {
        let path = connection_string
            .strip_prefix("sqlite://")
            .unwrap_or(connection_string);

        if path.is_empty() {
            return Err(LoggerError::Configuration("empty connection string".to_string()));
        }

        let conn = Connection::open(path)
            .map_err(|e| LoggerError::Connection(format!("Failed to open database {}: {}", path, e)))?;

        let pipeline = Self {
            conn: Some(conn),
            statements: HashMap::new(),
            pending: None,
        };

        pipeline.init_schema()?;

        info!("Event database opened at {}", path);

        Ok(pipeline)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<()> {
        let conn = self.connection()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                uri TEXT NOT NULL,
                query TEXT NOT NULL DEFAULT '',
                session TEXT NOT NULL DEFAULT '',
                time TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pageId INTEGER NOT NULL REFERENCES pages(id),
                time TEXT NOT NULL,
                class TEXT NOT NULL,
                object TEXT,
                action TEXT NOT NULL,
                params TEXT NOT NULL DEFAULT ''
            );

            CREATE INDEX IF NOT EXISTS idx_events_page ON events(pageId);
            "#,
        )
        .map_err(|e| LoggerError::Connection(format!("Schema creation failed: {}", e)))?;

        Ok(())
    }

    fn connection(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| LoggerError::InvalidOperation("connection is closed".to_string()))
    }

    fn statement_sql(&self, name: &str) -> Result<&str> {
        self.statements
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| LoggerError::InvalidOperation(format!("statement {} is not prepared", name)))
    }

    fn ensure_idle(&self, action: &str, name: &str) -> Result<()> {
        match &self.pending {
            Some(pending) => Err(LoggerError::InvalidOperation(format!(
                "cannot {} {} while result for {} is pending",
                action, name, pending.statement
            ))),
            None => Ok(()),
        }
    }
}

impl PipelineConnection for SqlitePipeline {
    fn is_busy(&mut self) -> bool {
        // Commands complete before send returns
        false
    }

    fn take_result(&mut self) -> Option<PendingResult> {
        self.pending.take()
    }

    fn send_prepare(&mut self, name: &str, sql: &str) -> Result<()> {
        self.ensure_idle("prepare", name)?;

        let outcome = self.connection()?.prepare_cached(sql).map(|_| ());
        self.statements.insert(name.to_string(), sql.to_string());

        self.pending = Some(match outcome {
            Ok(()) => PendingResult::ok(name, 0),
            Err(e) => PendingResult::failed(name, e.to_string()),
        });

        debug!("Prepared statement {}", name);
        Ok(())
    }

    fn send_execute(&mut self, name: &str, params: &[Value]) -> Result<()> {
        self.ensure_idle("execute", name)?;

        let sql = self.statement_sql(name)?.to_string();
        let conn = self.connection()?;

        let outcome = conn
            .prepare_cached(&sql)
            .and_then(|mut stmt| stmt.execute(params_from_iter(params.iter())));

        self.pending = Some(match outcome {
            Ok(rows) => PendingResult::ok(name, rows),
            Err(e) => PendingResult::failed(name, e.to_string()),
        });

        Ok(())
    }

    fn query_id(&mut self, name: &str, params: &[Value]) -> Result<i64> {
        self.ensure_idle("query", name)?;

        let sql = self.statement_sql(name)?.to_string();
        let conn = self.connection()?;

        let mut stmt = conn.prepare_cached(&sql)?;
        let id = stmt.query_row(params_from_iter(params.iter()), |row| row.get::<_, i64>(0))?;

        Ok(id)
    }

    fn close(&mut self) -> Result<()> {
        self.pending = None;

        if let Some(conn) = self.conn.take() {
            conn.close().map_err(|(_, e)| LoggerError::Sqlite(e))?;
            debug!("Event database closed");
        }

        Ok(())
    }
}
