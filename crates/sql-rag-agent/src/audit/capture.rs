// sql-rag-agent/crates/sql-rag-agent/src/audit/capture.rs

//! Exhaustive SQL scraping for the audit trail.
//!
//! Unlike [`crate::utils::TextMiner::extract_sql`], which wants one statement,
//! this records every statement each pattern finds, so the same SQL is often
//! captured more than once. [`SqlCapture::unique`] removes the repeats.

use chrono::{DateTime, Local};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};

use crate::memory::Message;
use crate::utils::TextUtils;

const SQL_KEYWORDS: [&str; 6] = ["SELECT", "FROM", "INSERT", "UPDATE", "DELETE", "CREATE"];
const MIN_SQL_CHARS: usize = 6;
const LOG_PREVIEW_CHARS: usize = 50;

/// How a captured statement has to end before it counts.
#[derive(Debug, Clone, Copy)]
enum Terminator {
    Any,
    /// Match must run to the end of a line that is followed by a letter, a
    /// blank line or the end of the text.
    LineEnd,
}

struct SqlPattern {
    name: &'static str,
    regex: Regex,
    terminator: Terminator,
}

fn pattern(name: &'static str, re: &str) -> SqlPattern {
    SqlPattern {
        name,
        regex: Regex::new(&format!("(?is){}", re)).unwrap(),
        terminator: Terminator::Any,
    }
}

fn line_pattern(name: &'static str, re: &str) -> SqlPattern {
    SqlPattern {
        terminator: Terminator::LineEnd,
        ..pattern(name, re)
    }
}

lazy_static! {
    static ref PATTERNS: Vec<SqlPattern> = vec![
        // code blocks
        pattern("sql_code_block", r"```sql\s*(.*?)```"),
        pattern("generic_code_block", r"```\s*(SELECT.*?)```"),
        pattern("insert_code_block", r"```\s*(INSERT.*?)```"),
        pattern("update_code_block", r"```\s*(UPDATE.*?)```"),
        pattern("delete_code_block", r"```\s*(DELETE.*?)```"),
        pattern("create_code_block", r"```\s*(CREATE.*?)```"),
        // prefixed
        pattern("sql_prefix", r"SQL:\s*(SELECT[^;]*;?)"),
        pattern("query_prefix", r"Query:\s*(SELECT[^;]*;?)"),
        pattern("generated_prefix", r"Generated[^:]*:\s*(SELECT[^;]*;?)"),
        pattern("executing_prefix", r"Executing[^:]*:\s*(SELECT[^;]*;?)"),
        pattern("running_prefix", r"Running[^:]*:\s*(SELECT[^;]*;?)"),
        pattern("tool_emoji_prefix", r"🔧[^:]*:\s*(SELECT[^;]*;?)"),
        pattern("chart_emoji_prefix", r"📊[^:]*:\s*(SELECT[^;]*;?)"),
        pattern("lightning_emoji_prefix", r"⚡[^:]*:\s*(SELECT[^;]*;?)"),
        // raw statements
        pattern("raw_select_with_semicolon", r"(SELECT[^;]*;)"),
        pattern("raw_insert_with_semicolon", r"(INSERT[^;]*;)"),
        pattern("raw_update_with_semicolon", r"(UPDATE[^;]*;)"),
        pattern("raw_delete_with_semicolon", r"(DELETE[^;]*;)"),
        pattern("raw_create_with_semicolon", r"(CREATE[^;]*;)"),
        line_pattern("raw_select_no_semicolon", r"(SELECT[^`\n]*)"),
        line_pattern("raw_insert_no_semicolon", r"(INSERT[^`\n]*)"),
        line_pattern("raw_update_no_semicolon", r"(UPDATE[^`\n]*)"),
        // quoted and call forms
        pattern("quoted_select", r#""(SELECT[^"]*)""#),
        pattern("single_quoted_select", r"'(SELECT[^']*)'"),
        pattern("execute_query_call", r#"execute_query\s*\(\s*["']?(SELECT[^"']*)["']?"#),
        pattern("query_assignment", r#"query\s*=\s*["']?(SELECT[^"']*)["']?"#),
    ];
}

fn line_terminated(text: &str, end: usize) -> bool {
    let rest = &text[end..];
    let mut chars = rest.chars();
    match chars.next() {
        None => true,
        Some('\n') => match chars.next() {
            None | Some('\n') => true,
            Some(c) => c.is_alphabetic(),
        },
        Some(_) => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueryKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Other,
}

impl QueryKind {
    pub fn detect(sql: &str) -> Self {
        let upper = sql.trim().to_uppercase();
        [
            ("SELECT", QueryKind::Select),
            ("INSERT", QueryKind::Insert),
            ("UPDATE", QueryKind::Update),
            ("DELETE", QueryKind::Delete),
            ("CREATE", QueryKind::Create),
            ("ALTER", QueryKind::Alter),
            ("DROP", QueryKind::Drop),
        ]
        .into_iter()
        .find(|(keyword, _)| upper.starts_with(keyword))
        .map(|(_, kind)| kind)
        .unwrap_or(QueryKind::Other)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::Select => "SELECT",
            QueryKind::Insert => "INSERT",
            QueryKind::Update => "UPDATE",
            QueryKind::Delete => "DELETE",
            QueryKind::Create => "CREATE",
            QueryKind::Alter => "ALTER",
            QueryKind::Drop => "DROP",
            QueryKind::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CapturedQuery {
    pub sql: String,
    pub source: String,
    pub context: String,
    pub timestamp: DateTime<Local>,
    pub length: usize,
    pub query_type: QueryKind,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CaptureSummary {
    pub total_queries: usize,
    pub unique_queries: usize,
    pub query_types: BTreeMap<String, usize>,
    pub sources: BTreeMap<String, usize>,
    pub average_length: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SqlCapture {
    captured: Vec<CapturedQuery>,
    extraction_log: Vec<String>,
}

impl SqlCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one statement. Blank input is ignored.
    pub fn add(&mut self, sql: &str, source: &str, context: &str) {
        let sql = sql.trim();
        if sql.is_empty() {
            return;
        }
        let preview: String = sql.chars().take(LOG_PREVIEW_CHARS).collect();
        self.extraction_log.push(format!("[{}] {}...", source, preview));
        self.captured.push(CapturedQuery {
            sql: sql.to_string(),
            source: source.to_string(),
            context: context.to_string(),
            timestamp: Local::now(),
            length: sql.chars().count(),
            query_type: QueryKind::detect(sql),
        });
    }

    /// Runs every pattern over `text` and records each plausible statement.
    pub fn extract(&mut self, text: &str, source: &str, context: &str) {
        if text.is_empty() {
            return;
        }
        for pattern in PATTERNS.iter() {
            for caps in pattern.regex.captures_iter(text) {
                let (Some(whole), Some(group)) = (caps.get(0), caps.get(1)) else {
                    continue;
                };
                if let Terminator::LineEnd = pattern.terminator {
                    if !line_terminated(text, whole.end()) {
                        continue;
                    }
                }
                let sql = TextUtils::normalize_whitespace(group.as_str());
                if !is_meaningful(&sql) {
                    continue;
                }
                let full_source = if context.is_empty() {
                    format!("{}:{}", source, pattern.name)
                } else {
                    format!("{}:{}:{}", source, pattern.name, context)
                };
                self.add(&sql, &full_source, context);
            }
        }
    }

    /// Message text and tool-call arguments of a finished transcript.
    pub fn extract_from_transcript(&mut self, transcript: &[Message]) {
        for (i, message) in transcript.iter().enumerate() {
            self.extract(
                message.content(),
                &format!("agent_message_{}", i),
                &format!("message_index_{}", i),
            );
            for (j, call) in message.tool_calls().iter().enumerate() {
                self.extract(
                    &call.arguments,
                    &format!("tool_call_{}_{}", i, j),
                    &format!("tool_{}", call.name),
                );
            }
        }
    }

    /// Every string field of a serialized response, recursing into objects.
    /// Only strings held directly in arrays are scanned.
    pub fn extract_from_response(&mut self, response: &Value) {
        let Value::Object(fields) = response else {
            return;
        };
        for (name, value) in fields {
            match value {
                Value::String(text) => {
                    self.extract(text, &format!("response_field_{}", name), name)
                }
                Value::Object(_) => self.extract_nested(value, &format!("response_{}", name)),
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if let Value::String(text) = item {
                            self.extract(
                                text,
                                &format!("response_list_{}_{}", name, i),
                                &format!("{}_item_{}", name, i),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn extract_nested(&mut self, value: &Value, prefix: &str) {
        let Value::Object(fields) = value else {
            return;
        };
        for (key, value) in fields {
            let source = format!("{}_{}", prefix, key);
            match value {
                Value::String(text) => self.extract(text, &source, key),
                Value::Object(_) => self.extract_nested(value, &source),
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        if let Value::String(text) = item {
                            self.extract(
                                text,
                                &format!("{}_{}", source, i),
                                &format!("{}_item_{}", key, i),
                            );
                        }
                    }
                }
                _ => {}
            }
        }
    }

    /// Copies another capture in, re-tagged with the question number.
    pub fn absorb(&mut self, other: &SqlCapture, question_no: usize) {
        for query in &other.captured {
            self.add(
                &query.sql,
                &format!("query_{}_{}", question_no, query.source),
                &format!("user_query_{}", question_no),
            );
        }
    }

    pub fn all(&self) -> &[CapturedQuery] {
        &self.captured
    }

    /// First occurrence of each statement, compared upper-cased with
    /// whitespace collapsed.
    pub fn unique(&self) -> Vec<&CapturedQuery> {
        let mut seen = HashSet::new();
        self.captured
            .iter()
            .filter(|q| seen.insert(TextUtils::normalize_whitespace(&q.sql).to_uppercase()))
            .collect()
    }

    pub fn extraction_log(&self) -> &[String] {
        &self.extraction_log
    }

    pub fn len(&self) -> usize {
        self.captured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }

    pub fn summary(&self) -> CaptureSummary {
        let mut query_types = BTreeMap::new();
        let mut sources = BTreeMap::new();
        for query in &self.captured {
            *query_types.entry(query.query_type.as_str().to_string()).or_insert(0) += 1;
            *sources.entry(query.source.clone()).or_insert(0) += 1;
        }
        let total = self.captured.len();
        let total_length: usize = self.captured.iter().map(|q| q.length).sum();
        CaptureSummary {
            total_queries: total,
            unique_queries: self.unique().len(),
            query_types,
            sources,
            average_length: total_length as f64 / total.max(1) as f64,
        }
    }
}

fn is_meaningful(sql: &str) -> bool {
    if sql.chars().count() <= MIN_SQL_CHARS {
        return false;
    }
    let upper = sql.to_uppercase();
    SQL_KEYWORDS.iter().any(|k| upper.contains(k))
}
