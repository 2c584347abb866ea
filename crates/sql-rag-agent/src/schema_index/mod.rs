// sql-rag-agent/crates/sql-rag-agent/src/schema_index/mod.rs

//! Vector index over schema chunks.
//!
//! Lifecycle: `uninitialized -> loaded` when a compatible persisted index is
//! found, otherwise `uninitialized -> built` from the chunker output (which is
//! then persisted). Queries are read-only and never fail outright; they
//! degrade to a fixed instruction string.

pub mod store;

pub use store::{IndexEntry, IndexMeta, IndexStore, INDEX_FILE_NAME};

use anyhow::Result;
use chrono::Utc;
use lazy_static::lazy_static;
use regex::Regex;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

use crate::chunker::{Chunk, ChunkType, SchemaChunker};
use crate::embedding::{cosine_similarity, Embedder};
use crate::schema::SchemaDescription;

pub const NOT_INITIALIZED: &str = "RAG system not initialized";
pub const NO_TABLES_HINT: &str =
    "Schema lookup completed. Now call the 'sql_db_query' tool with your best guess for table names.";

const EMBED_BATCH_SIZE: usize = 64;

lazy_static! {
    static ref COLUMN_NAME: Regex = Regex::new(r"Column: ([A-Z_]+)").unwrap();
    static ref TABLE_MENTION: Regex = Regex::new(r"(?:Table|table):\s*([A-Z_]{3,})").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Uninitialized,
    Loaded { entries: usize },
    Built { entries: usize },
}

impl IndexStatus {
    pub fn is_ready(&self) -> bool {
        !matches!(self, IndexStatus::Uninitialized)
    }
}

#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub score: f32,
}

struct LoadedIndex {
    status: IndexStatus,
    entries: Vec<IndexEntry>,
}

enum IndexState {
    Uninitialized,
    Ready(LoadedIndex),
}

pub struct SchemaIndex {
    embedder: Arc<dyn Embedder>,
    store: IndexStore,
    state: RwLock<IndexState>,
}

impl SchemaIndex {
    pub fn new(embedder: Arc<dyn Embedder>, dir: impl Into<PathBuf>) -> Self {
        Self {
            embedder,
            store: IndexStore::new(dir),
            state: RwLock::new(IndexState::Uninitialized),
        }
    }

    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    pub fn status(&self) -> IndexStatus {
        match self.state.read() {
            Ok(guard) => match &*guard {
                IndexState::Uninitialized => IndexStatus::Uninitialized,
                IndexState::Ready(index) => index.status,
            },
            Err(_) => IndexStatus::Uninitialized,
        }
    }

    /// Loads the persisted index if it is compatible, otherwise builds one.
    pub async fn initialize(
        &self,
        schema: &SchemaDescription,
        chunker: &SchemaChunker,
    ) -> Result<IndexStatus> {
        match self.store.load() {
            Ok(Some((meta, entries))) => match self.check_compatible(&meta, schema) {
                Ok(()) => {
                    let status = IndexStatus::Loaded {
                        entries: entries.len(),
                    };
                    info!(
                        "Loaded existing schema index from {} ({} entries)",
                        self.store.file_path().display(),
                        entries.len()
                    );
                    self.install(status, entries)?;
                    return Ok(status);
                }
                Err(reason) => warn!("Persisted schema index is incompatible: {}. Rebuilding...", reason),
            },
            Ok(None) => info!("No persisted schema index found; building a new one"),
            Err(e) => warn!("Failed to load existing schema index: {:#}. Rebuilding...", e),
        }
        self.rebuild(schema, chunker).await
    }

    /// Builds from scratch and replaces whatever was loaded or persisted.
    pub async fn rebuild(
        &self,
        schema: &SchemaDescription,
        chunker: &SchemaChunker,
    ) -> Result<IndexStatus> {
        let chunks = chunker.chunk(schema);
        if chunks.is_empty() {
            error!("No chunks created from schema. Check your description file.");
            return Ok(self.status());
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBED_BATCH_SIZE) {
            vectors.extend(self.embedder.embed_batch(batch).await?);
        }
        if vectors.len() != chunks.len() {
            return Err(anyhow::anyhow!(
                "embedded {} of {} chunks",
                vectors.len(),
                chunks.len()
            ));
        }

        let dimension = vectors.first().map(Vec::len).unwrap_or(0);
        let entries: Vec<IndexEntry> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| IndexEntry { chunk, embedding })
            .collect();
        let meta = IndexMeta {
            embedding_model: self.embedder.model_name().to_string(),
            dimension,
            entry_count: entries.len(),
            schema_digest: schema.digest(),
            built_at: Utc::now(),
        };

        if let Err(e) = self.store.save(&meta, &entries) {
            warn!("Failed to persist schema index: {:#}. Keeping it in memory only.", e);
        }

        let status = IndexStatus::Built {
            entries: entries.len(),
        };
        info!("Schema index built with {} chunks", entries.len());
        self.install(status, entries)?;
        Ok(status)
    }

    fn check_compatible(&self, meta: &IndexMeta, schema: &SchemaDescription) -> Result<(), String> {
        if meta.embedding_model != self.embedder.model_name() {
            return Err(format!(
                "built with '{}', configured model is '{}'",
                meta.embedding_model,
                self.embedder.model_name()
            ));
        }
        if meta.entry_count == 0 {
            return Err("index is empty".to_string());
        }
        // Without a schema document the persisted index is the only source.
        if schema.table_count() > 0 && meta.schema_digest != schema.digest() {
            return Err("schema description changed since the index was built".to_string());
        }
        Ok(())
    }

    fn install(&self, status: IndexStatus, entries: Vec<IndexEntry>) -> Result<()> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| anyhow::anyhow!("schema index lock poisoned"))?;
        *guard = IndexState::Ready(LoadedIndex { status, entries });
        Ok(())
    }

    /// Top-k chunks by cosine similarity; ties keep chunk order.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<RetrievedChunk>> {
        if !self.status().is_ready() {
            return Err(anyhow::anyhow!(NOT_INITIALIZED));
        }
        let query_vector = self.embedder.embed(query).await?;

        let guard = self
            .state
            .read()
            .map_err(|_| anyhow::anyhow!("schema index lock poisoned"))?;
        let entries = match &*guard {
            IndexState::Ready(index) => &index.entries,
            IndexState::Uninitialized => return Err(anyhow::anyhow!(NOT_INITIALIZED)),
        };

        let mut scored: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(&query_vector, &entry.embedding)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| RetrievedChunk {
                chunk: entries[i].chunk.clone(),
                score,
            })
            .collect())
    }

    /// Schema lookup as seen by the agent: always returns a hint string.
    pub async fn query(&self, query: &str, k: usize) -> String {
        info!("[RAG TOOL] Called with query: {}", query);
        if !self.status().is_ready() {
            return NOT_INITIALIZED.to_string();
        }
        match self.retrieve(query, k).await {
            Ok(results) => {
                let chunks: Vec<Chunk> = results.into_iter().map(|r| r.chunk).collect();
                synthesize_hint(&chunks)
            }
            Err(e) => {
                error!("RAG retrieval failed: {:#}", e);
                format!("Error retrieving schema: {}", e)
            }
        }
    }
}

/// Table names mentioned by a hint produced from these chunks, in first-seen order.
pub fn hint_tables(chunks: &[Chunk]) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for chunk in chunks {
        if let (ChunkType::TableOverview | ChunkType::TableColumns, Some(name)) =
            (chunk.chunk_type, &chunk.table_name)
        {
            push_unique(&mut tables, name);
        }
    }
    if tables.is_empty() {
        for chunk in chunks {
            for captures in TABLE_MENTION.captures_iter(&chunk.text) {
                push_unique(&mut tables, &captures[1]);
            }
        }
    }
    tables
}

pub fn synthesize_hint(chunks: &[Chunk]) -> String {
    let mut info_lines: Vec<String> = Vec::new();
    for chunk in chunks {
        match (chunk.chunk_type, &chunk.table_name) {
            (ChunkType::TableOverview, Some(name)) => info_lines.push(format!("Table: {}", name)),
            (ChunkType::TableColumns, Some(name)) => {
                let columns: Vec<&str> = COLUMN_NAME
                    .captures_iter(&chunk.text)
                    .filter_map(|c| c.get(1).map(|m| m.as_str()))
                    .take(5)
                    .collect();
                if !columns.is_empty() {
                    info_lines.push(format!("Columns in {}: {}", name, columns.join(", ")));
                }
            }
            (ChunkType::Relationships, _) => {
                info_lines.push("Relationship information found".to_string())
            }
            _ => {}
        }
    }

    let tables = hint_tables(chunks);
    if tables.is_empty() {
        return NO_TABLES_HINT.to_string();
    }

    let mut hint = format!("Relevant tables: {}.\n", tables.join(", "));
    if !info_lines.is_empty() {
        let shown: Vec<&str> = info_lines.iter().take(3).map(String::as_str).collect();
        hint.push_str(&format!("Additional info: {}.\n", shown.join("; ")));
    }
    hint.push_str(
        "Now proceed to call the 'sql_db_query' tool with a valid SQL SELECT statement using these tables.\n\
         Do NOT call 'rag_schema_query' again for this question.",
    );
    hint
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|v| v == value) {
        list.push(value.to_string());
    }
}
