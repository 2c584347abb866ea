// sql-rag-agent/crates/sql-rag-agent/src/database/mod.rs

//! Query execution gateway.
//!
//! Every call borrows its own pooled connection, runs exactly one statement
//! under a deadline, reads at most `max_rows` rows and reports the outcome as
//! a [`QueryResult`]. Execution errors never cross this boundary as `Err`.

pub mod diagnostics;
pub mod worker;

pub use diagnostics::{run_diagnostics, CheckGroup, DiagnosticReport};
pub use worker::{run_isolated, ToolExecution};

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::config::Config;

pub type Row = Map<String, Value>;

/// Status code reported for every failed statement.
pub const QUERY_ERROR_STATUS: u16 = 400;
pub const DEFAULT_MAX_ROWS: usize = 1000;

/// SQLite VM instructions between deadline checks.
const PROGRESS_CHECK_INTERVAL: i32 = 1000;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub success: bool,
    pub data: Option<Vec<Row>>,
    pub error: Option<String>,
    pub status_code: u16,
}

impl QueryResult {
    pub fn ok(rows: Vec<Row>) -> Self {
        Self {
            success: true,
            data: Some(rows),
            error: None,
            status_code: 200,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
            status_code: QUERY_ERROR_STATUS,
        }
    }

    pub fn row_count(&self) -> usize {
        self.data.as_ref().map(Vec::len).unwrap_or(0)
    }
}

#[async_trait]
pub trait QueryGateway: Send + Sync {
    async fn execute(&self, sql: &str, timeout: Duration) -> QueryResult;

    async fn list_columns(&self, table: &str) -> anyhow::Result<Vec<String>>;

    async fn test_connectivity(&self) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct SqliteGateway {
    pool: Arc<Pool<SqliteConnectionManager>>,
    path: PathBuf,
    max_rows: usize,
}

impl SqliteGateway {
    pub fn new(db_path: &Path, pool_size: u32, max_rows: usize) -> anyhow::Result<Self> {
        info!("Opening query database at: {}", db_path.display());
        let manager = SqliteConnectionManager::file(db_path).with_flags(
            OpenFlags::SQLITE_OPEN_READ_ONLY
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        );
        // Unchecked so an unreachable database surfaces through test_connectivity.
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .min_idle(Some(0))
            .connection_timeout(Duration::from_secs(5))
            .build_unchecked(manager);

        Ok(Self {
            pool: Arc::new(pool),
            path: db_path.to_path_buf(),
            max_rows,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(&config.database_path, config.db_pool_size, config.max_result_rows)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    fn get_conn(&self) -> anyhow::Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| anyhow::anyhow!("Failed to get connection from pool: {}", e))
    }

    /// User tables, for connectivity reports.
    pub fn list_tables(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    fn execute_blocking(&self, sql: &str, timeout: Duration) -> QueryResult {
        let conn = match self.get_conn() {
            Ok(conn) => conn,
            Err(e) => return QueryResult::failure(e.to_string()),
        };

        let deadline = Instant::now() + timeout;
        conn.progress_handler(
            PROGRESS_CHECK_INTERVAL,
            Some(move || Instant::now() >= deadline),
        );
        let outcome = read_rows(&conn, sql, self.max_rows);
        conn.progress_handler(0, None::<fn() -> bool>);

        match outcome {
            Ok(rows) => {
                debug!("Query returned {} rows", rows.len());
                QueryResult::ok(rows)
            }
            Err(e) if e.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) => {
                error!("Query exceeded statement timeout of {:?}", timeout);
                QueryResult::failure(format!(
                    "canceling statement due to statement timeout ({}s)",
                    timeout.as_secs()
                ))
            }
            Err(e) => {
                error!("Query execution failed: {}", e);
                QueryResult::failure(e.to_string())
            }
        }
    }
}

fn read_rows(conn: &Connection, sql: &str, max_rows: usize) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while out.len() < max_rows {
        let row = match rows.next()? {
            Some(row) => row,
            None => break,
        };
        let mut record = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            record.insert(name.clone(), value_to_json(row.get_ref(i)?));
        }
        out.push(record);
    }
    Ok(out)
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

#[async_trait]
impl QueryGateway for SqliteGateway {
    async fn execute(&self, sql: &str, timeout: Duration) -> QueryResult {
        debug!("Executing query: {}", sql);
        let gateway = self.clone();
        let sql = sql.to_string();
        match tokio::task::spawn_blocking(move || gateway.execute_blocking(&sql, timeout)).await {
            Ok(result) => result,
            Err(e) => QueryResult::failure(format!("query task failed: {}", e)),
        }
    }

    async fn list_columns(&self, table: &str) -> anyhow::Result<Vec<String>> {
        let gateway = self.clone();
        let table = table.to_string();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<String>> {
            let conn = gateway.get_conn()?;
            let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1) ORDER BY cid")?;
            let names = stmt
                .query_map([&table], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
        .map_err(|e| anyhow::anyhow!("column lookup task failed: {}", e))?
    }

    async fn test_connectivity(&self) -> anyhow::Result<()> {
        let gateway = self.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let conn = gateway.get_conn()?;
            let one: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            if one != 1 {
                return Err(anyhow::anyhow!("unexpected connectivity check result {}", one));
            }
            Ok(())
        })
        .await
        .map_err(|e| anyhow::anyhow!("connectivity task failed: {}", e))?
    }
}
