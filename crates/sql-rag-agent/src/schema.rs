// sql-rag-agent/crates/sql-rag-agent/src/schema.rs

//! Structured schema description consumed by the chunker.
//!
//! The document is JSON with a top-level `tables` array and an optional
//! `relationships` array. Loading never fails: a missing or malformed file
//! yields an empty description, which in turn yields zero chunks.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaDescription {
    /// `None` when the document has no `tables` field at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<Table>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identification_fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    #[serde(rename = "type", default = "unknown_label")]
    pub data_type: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub from_table: String,
    pub from_column: String,
    pub to_table: String,
    pub to_column: String,
    #[serde(rename = "relationship", default = "unknown_label")]
    pub kind: String,
}

fn unknown_label() -> String {
    "unknown".to_string()
}

impl SchemaDescription {
    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content.trim()).context("Invalid JSON in schema description")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read schema description {}", path.display()))?;
        Self::from_json(&content)
    }

    /// Loads the first candidate file that exists. Returns an empty
    /// description (and the path it tried, if any) on any failure.
    pub fn load_first(candidates: &[PathBuf]) -> (Self, Option<PathBuf>) {
        for path in candidates {
            if !path.exists() {
                continue;
            }
            return match Self::from_file(path) {
                Ok(schema) => {
                    info!(
                        "Loaded database schema from {} ({} tables, {} relationships)",
                        path.display(),
                        schema.table_count(),
                        schema.relationships.len()
                    );
                    (schema, Some(path.clone()))
                }
                Err(e) => {
                    error!("Could not load schema description {}: {:#}", path.display(), e);
                    (Self::default(), Some(path.clone()))
                }
            };
        }
        warn!(
            "No schema description found (tried: {})",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        (Self::default(), None)
    }

    pub fn tables(&self) -> &[Table] {
        self.tables.as_deref().unwrap_or(&[])
    }

    pub fn table_count(&self) -> usize {
        self.tables().len()
    }

    /// Content digest used to detect a persisted index built from a different schema.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_vec(self).unwrap_or_default();
        blake3::hash(&canonical).to_hex().to_string()
    }
}
