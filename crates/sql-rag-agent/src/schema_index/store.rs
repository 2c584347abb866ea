// sql-rag-agent/crates/sql-rag-agent/src/schema_index/store.rs

//! On-disk form of the schema index: one SQLite file holding a metadata row
//! and the ordered entries with bincode-encoded vectors.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::chunker::{Chunk, ChunkType};

pub const INDEX_FILE_NAME: &str = "schema_index.db";
const FORMAT_VERSION: i64 = 1;

const INDEX_SCHEMA_SQL: &str = "
CREATE TABLE index_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    format_version INTEGER NOT NULL,
    embedding_model TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    entry_count INTEGER NOT NULL,
    schema_digest TEXT NOT NULL,
    built_at TEXT NOT NULL
);
CREATE TABLE index_entries (
    position INTEGER PRIMARY KEY,
    chunk_key TEXT NOT NULL UNIQUE,
    chunk_type TEXT NOT NULL,
    table_name TEXT,
    text TEXT NOT NULL,
    embedding BLOB NOT NULL
);
";

#[derive(Debug, Clone, PartialEq)]
pub struct IndexMeta {
    pub embedding_model: String,
    pub dimension: usize,
    pub entry_count: usize,
    pub schema_digest: String,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE_NAME)
    }

    pub fn exists(&self) -> bool {
        self.file_path().exists()
    }

    /// Replaces any previously persisted index in full.
    pub fn save(&self, meta: &IndexMeta, entries: &[IndexEntry]) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create index directory {}", self.dir.display()))?;

        let final_path = self.file_path();
        let tmp_path = self.dir.join(format!("{}.tmp", INDEX_FILE_NAME));
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        {
            let mut conn = Connection::open(&tmp_path)
                .with_context(|| format!("Failed to create {}", tmp_path.display()))?;
            conn.execute_batch(INDEX_SCHEMA_SQL)?;

            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO index_meta
                 (id, format_version, embedding_model, dimension, entry_count, schema_digest, built_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    FORMAT_VERSION,
                    meta.embedding_model,
                    meta.dimension as i64,
                    meta.entry_count as i64,
                    meta.schema_digest,
                    meta.built_at.to_rfc3339(),
                ],
            )?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO index_entries
                     (position, chunk_key, chunk_type, table_name, text, embedding)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                )?;
                for (position, entry) in entries.iter().enumerate() {
                    let embedding_bytes = bincode::serialize(&entry.embedding)?;
                    stmt.execute(params![
                        position as i64,
                        entry.chunk.key,
                        entry.chunk.chunk_type.as_str(),
                        entry.chunk.table_name,
                        entry.chunk.text,
                        embedding_bytes,
                    ])?;
                }
            }
            tx.commit()?;
        }

        fs::rename(&tmp_path, &final_path).with_context(|| {
            format!("Failed to move index into place at {}", final_path.display())
        })?;
        info!("Persisted schema index with {} entries to {}", entries.len(), final_path.display());
        Ok(())
    }

    /// `Ok(None)` when nothing has been persisted yet. Any structural problem
    /// with an existing file is an error.
    pub fn load(&self) -> Result<Option<(IndexMeta, Vec<IndexEntry>)>> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(None);
        }
        debug!("Loading schema index from {}", path.display());

        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        let meta_row = conn
            .query_row(
                "SELECT format_version, embedding_model, dimension, entry_count, schema_digest, built_at
                 FROM index_meta WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| anyhow::anyhow!("index metadata row is missing"))?;

        let (version, embedding_model, dimension, entry_count, schema_digest, built_at) = meta_row;
        if version != FORMAT_VERSION {
            return Err(anyhow::anyhow!("unsupported index format version {}", version));
        }
        let built_at = DateTime::parse_from_rfc3339(&built_at)
            .context("invalid built_at timestamp")?
            .with_timezone(&Utc);
        let meta = IndexMeta {
            embedding_model,
            dimension: dimension as usize,
            entry_count: entry_count as usize,
            schema_digest,
            built_at,
        };

        let mut stmt = conn.prepare(
            "SELECT chunk_key, chunk_type, table_name, text, embedding
             FROM index_entries ORDER BY position",
        )?;
        let mut rows = stmt.query([])?;
        let mut entries = Vec::with_capacity(meta.entry_count);
        while let Some(row) = rows.next()? {
            let type_name: String = row.get(1)?;
            let chunk_type = ChunkType::parse(&type_name)
                .ok_or_else(|| anyhow::anyhow!("unknown chunk type '{}'", type_name))?;
            let embedding_bytes: Vec<u8> = row.get(4)?;
            let embedding: Vec<f32> = bincode::deserialize(&embedding_bytes)
                .map_err(|e| anyhow::anyhow!("Bincode error: {}", e))?;
            if embedding.len() != meta.dimension {
                return Err(anyhow::anyhow!(
                    "entry has dimension {}, index declares {}",
                    embedding.len(),
                    meta.dimension
                ));
            }
            entries.push(IndexEntry {
                chunk: Chunk {
                    chunk_type,
                    table_name: row.get(2)?,
                    key: row.get(0)?,
                    text: row.get(3)?,
                },
                embedding,
            });
        }

        if entries.len() != meta.entry_count {
            return Err(anyhow::anyhow!(
                "index declares {} entries but holds {}",
                meta.entry_count,
                entries.len()
            ));
        }
        Ok(Some((meta, entries)))
    }
}
