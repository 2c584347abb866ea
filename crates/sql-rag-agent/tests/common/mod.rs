// sql-rag-agent/crates/sql-rag-agent/tests/common/mod.rs

#![allow(dead_code)]

use async_trait::async_trait;
use rusqlite::Connection;
use serde_json::json;
use sql_rag_agent::{AssistantReply, ChatModel, Embedder, Message, SchemaDescription, ToolCall, ToolSpec};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Bag-of-words vectors over a fixed vocabulary, plus a constant bias term.
pub struct WordEmbedder {
    vocab: Vec<&'static str>,
}

impl WordEmbedder {
    pub fn new() -> Self {
        Self {
            vocab: vec!["patients", "encounters", "medications", "gender", "cost", "drug"],
        }
    }
}

#[async_trait]
impl Embedder for WordEmbedder {
    fn model_name(&self) -> &str {
        "word-embedder"
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut v: Vec<f32> = self.vocab.iter().map(|w| lower.matches(w).count() as f32).collect();
                v.push(0.01);
                v
            })
            .collect())
    }
}

/// A [`WordEmbedder`] that can be switched off after the index is built.
pub struct SwitchableEmbedder {
    inner: WordEmbedder,
    pub down: AtomicBool,
}

impl SwitchableEmbedder {
    pub fn new() -> Self {
        Self {
            inner: WordEmbedder::new(),
            down: AtomicBool::new(false),
        }
    }

    pub fn go_down(&self) {
        self.down.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Embedder for SwitchableEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if self.down.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("embedding service unavailable"));
        }
        self.inner.embed_batch(texts).await
    }
}

/// Replays canned replies in order and records the history length it was shown.
pub struct ScriptedModel {
    replies: Mutex<Vec<AssistantReply>>,
    pub seen: Mutex<Vec<usize>>,
}

impl ScriptedModel {
    pub fn new(mut replies: Vec<AssistantReply>) -> Self {
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            seen: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn invoke(
        &self,
        _system_prompt: &str,
        messages: &[Message],
        _tools: &[ToolSpec],
    ) -> anyhow::Result<AssistantReply> {
        self.seen.lock().unwrap().push(messages.len());
        self.replies
            .lock()
            .unwrap()
            .pop()
            .ok_or_else(|| anyhow::anyhow!("no scripted reply left"))
    }
}

pub fn tool_call(id: &str, name: &str, query: &str) -> AssistantReply {
    AssistantReply {
        content: String::new(),
        tool_calls: vec![ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: json!({ "query": query }).to_string(),
        }],
    }
}

pub fn clinic_schema() -> SchemaDescription {
    SchemaDescription::from_json(
        r#"{
          "tables": [
            {"name": "PATIENTS", "description": "patients demographics and gender",
             "columns": [{"name": "ID", "type": "uuid", "description": "patient id"},
                         {"name": "GENDER", "type": "text", "description": "gender"}]},
            {"name": "ENCOUNTERS", "description": "encounters with cost",
             "columns": [{"name": "ID", "type": "uuid", "description": ""},
                         {"name": "PATIENT", "type": "uuid", "description": "patient reference"},
                         {"name": "TOTAL_CLAIM_COST", "type": "real", "description": "cost"}]},
            {"name": "MEDICATIONS", "description": "medications drug orders",
             "columns": [{"name": "CODE", "type": "text", "description": "drug code"}]}
          ],
          "relationships": [
            {"from_table": "ENCOUNTERS", "from_column": "PATIENT",
             "to_table": "PATIENTS", "to_column": "ID", "relationship": "many-to-one"}
          ]
        }"#,
    )
    .unwrap()
}

/// A PATIENTS table with `rows` rows, alternating gender.
pub fn patients_db(dir: &Path, rows: usize) -> PathBuf {
    let path = dir.join("clinic.db");
    let mut conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE PATIENTS (ID INTEGER PRIMARY KEY, GENDER TEXT, \"First\" TEXT);")
        .unwrap();
    let tx = conn.transaction().unwrap();
    {
        let mut stmt = tx
            .prepare("INSERT INTO PATIENTS (ID, GENDER, \"First\") VALUES (?1, ?2, ?3)")
            .unwrap();
        for i in 0..rows {
            let gender = if i % 2 == 0 { "F" } else { "M" };
            stmt.execute(rusqlite::params![i as i64, gender, format!("name{}", i)])
                .unwrap();
        }
    }
    tx.commit().unwrap();
    path
}
