// sql-rag-agent/crates/sql-rag-agent/src/audit/transcript.rs

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{json, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use super::capture::SqlCapture;
use crate::agent::AgentRun;
use crate::response::AGENT_TYPE;
use crate::utils::TextUtils;

const MAX_SLUG_CHARS: usize = 30;
const CAPTURE_METHOD: &str = "comprehensive_all_sources";

#[derive(Debug, Clone, Serialize)]
struct SessionEntry {
    query: String,
    response: Value,
    sql_queries_captured: usize,
    unique_sql_queries: usize,
    timestamp: DateTime<Local>,
    processing_time: f64,
}

/// Writes one JSON audit file per question and a session summary at the end.
///
/// Failures are logged and reported as `None`; auditing never stops a session.
pub struct TranscriptWriter {
    dir: PathBuf,
    session_id: String,
    embedding_model: String,
    chat_model: String,
    responses: Vec<SessionEntry>,
    session_capture: SqlCapture,
}

impl TranscriptWriter {
    pub fn new(
        dir: impl Into<PathBuf>,
        embedding_model: impl Into<String>,
        chat_model: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            session_id: format!("comprehensive_sql_{}", Local::now().format("%Y%m%d_%H%M%S")),
            embedding_model: embedding_model.into(),
            chat_model: chat_model.into(),
            responses: Vec::new(),
            session_capture: SqlCapture::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn question_count(&self) -> usize {
        self.responses.len()
    }

    pub fn session_capture(&self) -> &SqlCapture {
        &self.session_capture
    }

    /// Captures SQL from `run`, saves the per-question file and folds the
    /// result into the session.
    pub fn record(&mut self, question: &str, run: &AgentRun, processing_time: f64) -> Option<PathBuf> {
        let question_no = self.responses.len() + 1;
        let started = Local::now();
        let response = match serde_json::to_value(&run.response) {
            Ok(value) => value,
            Err(e) => {
                error!("Could not serialize response for audit: {}", e);
                Value::Null
            }
        };

        let mut capture = SqlCapture::new();
        capture.extract_from_transcript(&run.transcript);
        capture.extract_from_response(&response);
        self.session_capture.absorb(&capture, question_no);

        let saved = match self.write_question(question, run, &response, &capture, started) {
            Ok(path) => {
                info!(
                    "Saved audit record {} ({} SQL captured, {} unique)",
                    path.display(),
                    capture.len(),
                    capture.unique().len()
                );
                Some(path)
            }
            Err(e) => {
                error!("Audit JSON save failed: {:#}", e);
                None
            }
        };

        self.responses.push(SessionEntry {
            query: question.to_string(),
            response,
            sql_queries_captured: capture.len(),
            unique_sql_queries: capture.unique().len(),
            timestamp: started,
            processing_time,
        });
        saved
    }

    fn write_question(
        &self,
        question: &str,
        run: &AgentRun,
        response: &Value,
        capture: &SqlCapture,
        timestamp: DateTime<Local>,
    ) -> Result<PathBuf> {
        let filename = format!(
            "{}_{}_ALL_SQL.json",
            timestamp.format("%Y%m%d_%H%M%S"),
            TextUtils::sanitize_filename(question, MAX_SLUG_CHARS)
        );
        let unique = capture.unique();
        let document = json!({
            "query_metadata": {
                "original_query": question,
                "timestamp": timestamp,
                "session_id": self.session_id,
                "filename": filename,
                "agent_type": AGENT_TYPE,
                "sql_capture_method": CAPTURE_METHOD,
            },
            "sql_comprehensive": {
                "total_sql_queries_found": capture.len(),
                "unique_sql_queries": unique.len(),
                "sql_summary": capture.summary(),
                "extraction_log": capture.extraction_log(),
                "all_sql_queries": capture.all(),
                "unique_sql_queries_list": unique,
            },
            "response": response,
            "original_agent_result": {
                "message_count": run.transcript.len(),
                "has_tool_calls": run.tool_turns() > 0,
            },
            "system_info": {
                "embedding_model": self.embedding_model,
                "chat_model": self.chat_model,
            },
        });
        self.write_json(&filename, &document)
    }

    /// Writes the session summary. Nothing is written for an empty session.
    pub fn finish(&self) -> Option<PathBuf> {
        if self.responses.is_empty() {
            return None;
        }
        let filename = format!("session_{}_COMPREHENSIVE_SQL.json", self.session_id);
        let unique = self.session_capture.unique();
        let document = json!({
            "session_metadata": {
                "session_id": self.session_id,
                "total_queries": self.responses.len(),
                "total_sql_queries_captured": self.session_capture.len(),
                "unique_sql_queries_captured": unique.len(),
                "created_at": Local::now(),
                "capture_method": CAPTURE_METHOD,
            },
            "session_sql_summary": self.session_capture.summary(),
            "all_session_sql_queries": self.session_capture.all(),
            "unique_session_sql_queries": unique,
            "responses": self.responses,
        });
        match self.write_json(&filename, &document) {
            Ok(path) => {
                info!("Session audit saved: {}", path.display());
                Some(path)
            }
            Err(e) => {
                error!("Could not save session: {:#}", e);
                None
            }
        }
    }

    fn write_json(&self, filename: &str, document: &Value) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let path = self.dir.join(filename);
        let body = serde_json::to_string_pretty(document)?;
        fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
