// sql-rag-agent/crates/sql-rag-agent/src/agent/tools.rs

//! The two tools exposed to the model. Every outcome, including failures,
//! comes back as observation text; nothing here returns an error.

use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::database::{run_isolated, QueryGateway, ToolExecution};
use crate::llm::ToolSpec;
use crate::memory::ToolCall;
use crate::schema_index::SchemaIndex;

use super::AgentCounters;

pub const SCHEMA_LOOKUP_TOOL: &str = "rag_schema_query";
pub const QUERY_TOOL: &str = "sql_db_query";

pub const QUERY_TIMED_OUT: &str = "❌ Query execution timed out. Try a simpler query.";
pub const QUERY_EMPTY: &str = "✅ Query ran but returned no results.";
pub const LOOKUP_ALREADY_DONE: &str = "Schema lookup already completed for this question. \
Do NOT call 'rag_schema_query' again; call the 'sql_db_query' tool now with the tables you have.";

const SAMPLE_ROWS: usize = 3;

pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: SCHEMA_LOOKUP_TOOL.to_string(),
            description: "Look up which tables and columns to use. Use only once per user question. \
                          Returns a minimal, concise list of table and column names relevant to the question."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "What to look up in the schema"}
                },
                "required": ["query"]
            }),
        },
        ToolSpec {
            name: QUERY_TOOL.to_string(),
            description: "Run a SELECT SQL query on the healthcare database. \
                          Use UPPERCASE table/column names (ID, PATIENT, etc)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "A single SQL SELECT statement"}
                },
                "required": ["query"]
            }),
        },
    ]
}

#[derive(Debug, Deserialize)]
struct QueryArgument {
    query: String,
}

/// Per-question bookkeeping, reset for every user question.
#[derive(Debug, Default)]
pub struct QuestionState {
    pub schema_lookups: usize,
    pub queries: usize,
}

#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub rag_top_k: usize,
    pub statement_timeout: Duration,
    pub tool_timeout: Duration,
    pub enforce_single_schema_lookup: bool,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            rag_top_k: 3,
            statement_timeout: Duration::from_secs(30),
            tool_timeout: Duration::from_secs(45),
            enforce_single_schema_lookup: true,
        }
    }
}

pub struct ToolBox {
    index: Arc<SchemaIndex>,
    gateway: Arc<dyn QueryGateway>,
    settings: ToolSettings,
    counters: Arc<AgentCounters>,
}

impl ToolBox {
    pub fn new(
        index: Arc<SchemaIndex>,
        gateway: Arc<dyn QueryGateway>,
        settings: ToolSettings,
        counters: Arc<AgentCounters>,
    ) -> Self {
        Self {
            index,
            gateway,
            settings,
            counters,
        }
    }

    pub fn settings(&self) -> &ToolSettings {
        &self.settings
    }

    pub async fn dispatch(&self, call: &ToolCall, state: &mut QuestionState) -> String {
        let argument = match serde_json::from_str::<QueryArgument>(&call.arguments) {
            Ok(arg) => arg.query,
            Err(e) => {
                warn!("Tool {} received unusable arguments: {}", call.name, call.arguments);
                return format!("❌ Tool error: invalid arguments for '{}': {}", call.name, e);
            }
        };
        info!(target: "audit", tool = %call.name, argument = %argument, "tool invoked");

        match call.name.as_str() {
            SCHEMA_LOOKUP_TOOL => {
                if self.settings.enforce_single_schema_lookup && state.schema_lookups > 0 {
                    warn!("Repeated schema lookup refused for this question");
                    return LOOKUP_ALREADY_DONE.to_string();
                }
                state.schema_lookups += 1;
                self.schema_lookup(&argument).await
            }
            QUERY_TOOL => {
                state.queries += 1;
                self.run_query(&argument).await
            }
            other => {
                warn!("Model requested unknown tool '{}'", other);
                format!("❌ Tool error: unknown tool '{}'", other)
            }
        }
    }

    pub async fn schema_lookup(&self, query: &str) -> String {
        self.counters.inc_schema_lookups();
        self.index.query(query, self.settings.rag_top_k).await
    }

    pub async fn run_query(&self, sql: &str) -> String {
        let statement = normalize_statement(sql);
        self.counters.inc_queries_executed();
        let outcome = run_isolated(
            Arc::clone(&self.gateway),
            statement,
            self.settings.statement_timeout,
            self.settings.tool_timeout,
        )
        .await;
        match &outcome {
            ToolExecution::Completed(result) if !result.success => self.counters.inc_query_failures(),
            ToolExecution::WorkerFailed(_) => self.counters.inc_query_failures(),
            ToolExecution::TimedOut => self.counters.inc_query_timeouts(),
            ToolExecution::Completed(_) => 0,
        };
        format_query_outcome(&outcome)
    }
}

/// Trims and ensures exactly one trailing `;`.
pub fn normalize_statement(sql: &str) -> String {
    let body = sql.trim().trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    format!("{};", body)
}

pub fn format_query_outcome(outcome: &ToolExecution) -> String {
    match outcome {
        ToolExecution::TimedOut => QUERY_TIMED_OUT.to_string(),
        ToolExecution::WorkerFailed(message) => {
            error!("Query worker failed: {}", message);
            format!("❌ Query failed: Thread execution error: {}", message)
        }
        ToolExecution::Completed(result) if result.success => match result.data.as_deref() {
            Some(rows) if !rows.is_empty() => {
                let sample = &rows[..rows.len().min(SAMPLE_ROWS)];
                let preview = serde_json::to_string_pretty(sample)
                    .unwrap_or_else(|e| format!("<unprintable sample: {}>", e));
                format!(
                    "✅ Query executed successfully! Found {} records.\nSample: {}\n\
                     After this, DO NOT call any more tools. Respond to the user.",
                    rows.len(),
                    preview
                )
            }
            _ => QUERY_EMPTY.to_string(),
        },
        ToolExecution::Completed(result) => format!(
            "❌ Query failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::QueryResult;
    use serde_json::Map;

    #[test]
    fn test_normalize_statement() {
        assert_eq!(normalize_statement("SELECT 1"), "SELECT 1;");
        assert_eq!(normalize_statement("  SELECT 1;  "), "SELECT 1;");
        assert_eq!(normalize_statement("SELECT 1;;\n ; "), "SELECT 1;");
    }

    #[test]
    fn test_format_success_with_sample() {
        let rows: Vec<Map<String, serde_json::Value>> = (0..5)
            .map(|i| {
                let mut row = Map::new();
                row.insert("ID".into(), json!(i));
                row
            })
            .collect();
        let text = format_query_outcome(&ToolExecution::Completed(QueryResult::ok(rows)));
        assert!(text.starts_with("✅ Query executed successfully! Found 5 records.\nSample: ["));
        assert!(text.contains("\"ID\": 2"));
        assert!(!text.contains("\"ID\": 3"));
        assert!(text.ends_with("After this, DO NOT call any more tools. Respond to the user."));
    }

    #[test]
    fn test_format_other_outcomes() {
        assert_eq!(
            format_query_outcome(&ToolExecution::Completed(QueryResult::ok(Vec::new()))),
            QUERY_EMPTY
        );
        assert_eq!(
            format_query_outcome(&ToolExecution::Completed(QueryResult::failure(
                "no such table: PATIENT"
            ))),
            "❌ Query failed: no such table: PATIENT"
        );
        assert_eq!(format_query_outcome(&ToolExecution::TimedOut), QUERY_TIMED_OUT);
        assert!(format_query_outcome(&ToolExecution::WorkerFailed("boom".into()))
            .starts_with("❌ Query failed: Thread execution error"));
    }

    #[test]
    fn test_tool_specs_names() {
        let names: Vec<String> = tool_specs().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec![SCHEMA_LOOKUP_TOOL, QUERY_TOOL]);
    }
}
