// sql-rag-agent/crates/sql-rag-agent/src/database/diagnostics.rs

//! Built-in statement battery used by `debug` when no SQL is given.

use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use super::{QueryGateway, QueryResult};
use crate::identifiers::{quote_identifier, SqlLiteral};

pub const CONNECTION_CHECKS: [&str; 3] = [
    "SELECT 1 AS test;",
    "SELECT sqlite_version() AS version;",
    "SELECT name AS current_database FROM pragma_database_list WHERE seq = 0;",
];

pub const SCHEMA_CHECKS: [&str; 2] = [
    "SELECT type, name FROM sqlite_master WHERE type IN ('table', 'view') LIMIT 5;",
    "SELECT m.name AS table_name, p.name AS column_name, p.type AS data_type \
     FROM sqlite_master m JOIN pragma_table_info(m.name) p \
     WHERE m.type = 'table' LIMIT 10;",
];

/// Statements sent through the query tool rather than the gateway.
pub const TOOL_CHECKS: [&str; 2] = [
    "SELECT 1 AS test;",
    "SELECT COUNT(*) AS table_count FROM sqlite_master WHERE type = 'table';",
];

const TABLE_LIST: &str = "SELECT name AS table_name FROM sqlite_master \
     WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name LIMIT 5;";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckGroup {
    Connection,
    Schema,
    Table,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    pub group: CheckGroup,
    pub sql: String,
    pub result: QueryResult,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiagnosticReport {
    pub outcomes: Vec<CheckOutcome>,
    /// First few user tables, as seen by the table listing.
    pub tables: Vec<String>,
}

impl DiagnosticReport {
    pub fn passed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.passed()
    }

    pub fn group(&self, group: CheckGroup) -> impl Iterator<Item = &CheckOutcome> {
        self.outcomes.iter().filter(move |o| o.group == group)
    }
}

/// Checks for the first table: row count, one row and its column names.
pub fn table_checks(table: &str) -> Vec<String> {
    let quoted = quote_identifier(table);
    vec![
        format!("SELECT COUNT(*) AS row_count FROM {};", quoted),
        format!("SELECT * FROM {} LIMIT 1;", quoted),
        format!(
            "SELECT name AS column_name FROM pragma_table_info({}) LIMIT 5;",
            SqlLiteral::Text(table.to_string())
        ),
    ]
}

pub async fn run_diagnostics(gateway: &dyn QueryGateway, timeout: Duration) -> DiagnosticReport {
    let mut report = DiagnosticReport::default();

    for sql in CONNECTION_CHECKS {
        run_check(gateway, &mut report, CheckGroup::Connection, sql.to_string(), timeout).await;
    }
    for sql in SCHEMA_CHECKS {
        run_check(gateway, &mut report, CheckGroup::Schema, sql.to_string(), timeout).await;
    }

    let listing = gateway.execute(TABLE_LIST, timeout).await;
    report.tables = listing
        .data
        .unwrap_or_default()
        .iter()
        .filter_map(|row| row.get("table_name").and_then(|v| v.as_str()).map(String::from))
        .collect();

    match report.tables.first().cloned() {
        Some(first) => {
            for sql in table_checks(&first) {
                run_check(gateway, &mut report, CheckGroup::Table, sql, timeout).await;
            }
        }
        None => warn!("No user tables found; skipping table checks"),
    }

    info!(
        "Diagnostics finished: {} passed, {} failed",
        report.passed(),
        report.failed()
    );
    report
}

async fn run_check(
    gateway: &dyn QueryGateway,
    report: &mut DiagnosticReport,
    group: CheckGroup,
    sql: String,
    timeout: Duration,
) {
    let result = gateway.execute(&sql, timeout).await;
    report.outcomes.push(CheckOutcome { group, sql, result });
}
