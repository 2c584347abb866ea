//! Best-effort extraction from model-written text.
//!
//! Every extractor walks a fixed, ordered pattern list and the first pattern
//! that matches wins. The input is free text, so none of this attempts to
//! parse SQL.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref SQL_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?is)```sql\s*(SELECT.*?)```").unwrap(),
        Regex::new(r"(?is)```\s*(SELECT.*?)```").unwrap(),
        Regex::new(r"(?is)(SELECT[^;]*;)").unwrap(),
        Regex::new(r#"(?is)sql_db_query.*?"(SELECT[^"]*)""#).unwrap(),
    ];
    static ref COUNT_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)found (\d+) records").unwrap(),
        Regex::new(r"(?i)(\d+) records returned").unwrap(),
        Regex::new(r"(?i)returned (\d+) results").unwrap(),
        Regex::new(r"(?i)found (\d+) results").unwrap(),
        Regex::new(r"(?i)(\d+) rows").unwrap(),
    ];
    static ref INSIGHT_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?i)insights?:([^\.]+)").unwrap(),
        Regex::new(r"(?i)analysis:([^\.]+)").unwrap(),
        Regex::new(r"(?i)finding:([^\.]+)").unwrap(),
        Regex::new(r"(?i)observation:([^\.]+)").unwrap(),
        Regex::new(r"💡([^\.]+)").unwrap(),
        Regex::new(r"📊([^\.]+)").unwrap(),
        Regex::new(r"📈([^\.]+)").unwrap(),
    ];
}

pub const SUCCESS_INDICATORS: [&str; 10] = [
    "✅",
    "successful",
    "found",
    "results",
    "records",
    "data",
    "query executed",
    "retrieved",
    "analysis",
    "insights",
];

pub const ERROR_INDICATORS: [&str; 10] = [
    "❌",
    "error",
    "failed",
    "exception",
    "invalid",
    "syntax",
    "not found",
    "cannot",
    "unable",
    "does not exist",
];

const RESULT_TERMS: [&str; 4] = ["records", "data", "results", "found"];
const MAX_INSIGHTS: usize = 5;
const MIN_INSIGHT_CHARS: usize = 10;

/// Keyword tallies over lower-cased text. Each indicator counts at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordScore {
    pub success: usize,
    pub error: usize,
    pub has_sql_result: bool,
    pub has_data_terms: bool,
    pub has_missing_column: bool,
}

impl KeywordScore {
    pub fn is_success(&self) -> bool {
        if self.has_missing_column {
            return false;
        }
        self.success > self.error || self.has_sql_result || self.has_data_terms
    }
}

pub struct TextMiner;

impl TextMiner {
    /// First SQL statement found by the ordered pattern list.
    pub fn extract_sql(text: &str) -> Option<String> {
        SQL_PATTERNS
            .iter()
            .find_map(|re| re.captures(text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
    }

    pub fn score_keywords(text: &str) -> KeywordScore {
        let lower = text.to_lowercase();
        KeywordScore {
            success: SUCCESS_INDICATORS.iter().filter(|t| lower.contains(*t)).count(),
            error: ERROR_INDICATORS.iter().filter(|t| lower.contains(*t)).count(),
            has_sql_result: lower.contains("query executed successfully"),
            has_data_terms: RESULT_TERMS.iter().any(|t| lower.contains(t)),
            has_missing_column: lower.contains("column") && lower.contains("does not exist"),
        }
    }

    /// Row count from the first matching phrasing; zero when none match.
    pub fn extract_result_count(text: &str) -> usize {
        COUNT_PATTERNS
            .iter()
            .find_map(|re| re.captures(text))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    }

    pub fn extract_insights(text: &str) -> Vec<String> {
        INSIGHT_PATTERNS
            .iter()
            .flat_map(|re| re.captures_iter(text))
            .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()))
            .filter(|insight| insight.chars().count() > MIN_INSIGHT_CHARS)
            .take(MAX_INSIGHTS)
            .collect()
    }
}
