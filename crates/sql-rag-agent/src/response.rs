// sql-rag-agent/crates/sql-rag-agent/src/response.rs

//! Turns a finished transcript into a [`StructuredResponse`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, error};

use crate::memory::Message;
use crate::utils::{TextMiner, TextUtils};

pub const AGENT_TYPE: &str = "enhanced_structured_rag";
pub const POWERED_BY: &str = "Column-Level RAG Agent";
pub const MAX_MESSAGE_CHARS: usize = 800;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub success: bool,
    pub message: String,
    pub query_understanding: String,
    pub sql_query: Option<String>,
    pub result_count: usize,
    pub results: Vec<Value>,
    pub business_insights: Vec<String>,
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
    pub powered_by: String,
}

#[derive(Debug)]
enum ParseFailure {
    NoMessages,
    NoFinalMessage,
}

impl std::fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseFailure::NoMessages => f.write_str("No messages in agent result"),
            ParseFailure::NoFinalMessage => f.write_str("No final message found"),
        }
    }
}

impl StructuredResponse {
    /// Never fails: a transcript without usable assistant text becomes a
    /// failure-shaped response carrying the reason in `metadata.parse_error`.
    pub fn from_transcript(messages: &[Message], question: &str) -> Self {
        match Self::parse(messages, question) {
            Ok(response) => response,
            Err(reason) => {
                error!("Error parsing enhanced response: {}", reason);
                Self::parse_failure(question, &reason.to_string())
            }
        }
    }

    fn parse(messages: &[Message], question: &str) -> Result<Self, ParseFailure> {
        if messages.is_empty() {
            return Err(ParseFailure::NoMessages);
        }

        let mut sql_query = None;
        let mut final_message: Option<&str> = None;
        for message in messages {
            let content = match message {
                Message::Assistant { content, .. } if !content.is_empty() => content,
                _ => continue,
            };
            if sql_query.is_none() {
                sql_query = TextMiner::extract_sql(content);
            }
            final_message = Some(content.as_str());
        }
        let final_message = final_message.ok_or(ParseFailure::NoFinalMessage)?;

        let score = TextMiner::score_keywords(final_message);
        let result_count = TextMiner::extract_result_count(final_message);
        let insights = TextMiner::extract_insights(final_message);
        debug!(
            "Response scored success={} error={} count={}",
            score.success, score.error, result_count
        );

        let mut metadata = Map::new();
        metadata.insert("agent_type".into(), json!(AGENT_TYPE));
        metadata.insert("vector_db_used".into(), json!(true));
        metadata.insert("structured_chunks".into(), json!(true));
        metadata.insert("success_score".into(), json!(score.success));
        metadata.insert("error_score".into(), json!(score.error));
        metadata.insert("has_business_context".into(), json!(!insights.is_empty()));
        metadata.insert("uppercase_columns_enforced".into(), json!(true));

        Ok(Self {
            success: score.is_success(),
            message: TextUtils::truncate_with_ellipsis(final_message, MAX_MESSAGE_CHARS)
                .into_owned(),
            query_understanding: format!("Enhanced analysis of: {}", question),
            sql_query,
            result_count,
            results: Vec::new(),
            business_insights: insights,
            metadata,
            timestamp: Utc::now(),
            powered_by: POWERED_BY.to_string(),
        })
    }

    pub fn parse_failure(question: &str, reason: &str) -> Self {
        let mut metadata = Map::new();
        metadata.insert("parse_error".into(), json!(reason));
        metadata.insert("agent_type".into(), json!(AGENT_TYPE));
        Self {
            success: false,
            message: "Enhanced response parsing failed".to_string(),
            query_understanding: question.to_string(),
            sql_query: None,
            result_count: 0,
            results: Vec::new(),
            business_insights: Vec::new(),
            metadata,
            timestamp: Utc::now(),
            powered_by: POWERED_BY.to_string(),
        }
    }
}
