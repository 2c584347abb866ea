// sql-rag-agent/crates/sql-rag-agent/src/audit/mod.rs

//! SQL audit trail: scrape every statement a question produced and persist
//! it as JSON next to the response.

pub mod capture;
pub mod transcript;

pub use capture::{CaptureSummary, CapturedQuery, QueryKind, SqlCapture};
pub use transcript::TranscriptWriter;
