// sql-rag-agent/crates/sql-rag-agent/src/agent/mod.rs

//! The agent control loop.
//!
//! Each question starts a fresh transcript seeded with one user message. The
//! loop alternates between asking the model for its next message and running
//! the tool calls that message requests, until the model answers without
//! requesting a tool.

pub mod prompt;
pub mod tools;

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::chunker::SchemaChunker;
use crate::config::Config;
use crate::database::{QueryGateway, SqliteGateway};
use crate::embedding::HttpEmbedder;
use crate::llm::{ChatModel, OpenAiChatModel, ToolSpec};
use crate::memory::{ConversationMemory, InMemoryConversationMemory, Message};
use crate::response::StructuredResponse;
use crate::schema::SchemaDescription;
use crate::schema_index::{IndexStatus, SchemaIndex};

pub use tools::{QuestionState, ToolBox, ToolSettings, QUERY_TOOL, SCHEMA_LOOKUP_TOOL};

/// Process-wide tallies, read through [`AgentCounters::snapshot`].
#[derive(Debug, Default)]
pub struct AgentCounters {
    questions: AtomicUsize,
    model_turns: AtomicUsize,
    schema_lookups: AtomicUsize,
    queries_executed: AtomicUsize,
    query_failures: AtomicUsize,
    query_timeouts: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub questions: usize,
    pub model_turns: usize,
    pub schema_lookups: usize,
    pub queries_executed: usize,
    pub query_failures: usize,
    pub query_timeouts: usize,
}

impl AgentCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_questions(&self) -> usize {
        self.questions.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_model_turns(&self) -> usize {
        self.model_turns.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_schema_lookups(&self) -> usize {
        self.schema_lookups.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_queries_executed(&self) -> usize {
        self.queries_executed.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_query_failures(&self) -> usize {
        self.query_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_query_timeouts(&self) -> usize {
        self.query_timeouts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            questions: self.questions.load(Ordering::Relaxed),
            model_turns: self.model_turns.load(Ordering::Relaxed),
            schema_lookups: self.schema_lookups.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            query_failures: self.query_failures.load(Ordering::Relaxed),
            query_timeouts: self.query_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub tools: ToolSettings,
    pub thread_id: String,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            tools: ToolSettings::default(),
            thread_id: "1".to_string(),
        }
    }
}

impl AgentSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tools: ToolSettings {
                rag_top_k: config.rag_top_k,
                statement_timeout: config.statement_timeout(),
                tool_timeout: config.tool_timeout(),
                enforce_single_schema_lookup: config.enforce_single_schema_lookup,
            },
            thread_id: config.thread_id.clone(),
        }
    }
}

/// Output of one [`SqlAgent::process_query`] call.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub response: StructuredResponse,
    pub transcript: Vec<Message>,
}

impl AgentRun {
    pub fn tool_turns(&self) -> usize {
        self.transcript
            .iter()
            .filter(|m| m.is_assistant() && !m.tool_calls().is_empty())
            .count()
    }
}

enum LoopState {
    AgentTurn,
    ToolTurn,
    Done,
}

pub struct SqlAgent {
    model: Arc<dyn ChatModel>,
    index: Arc<SchemaIndex>,
    gateway: Arc<dyn QueryGateway>,
    memory: Arc<dyn ConversationMemory>,
    settings: AgentSettings,
    counters: Arc<AgentCounters>,
    system_prompt: String,
    tool_specs: Vec<ToolSpec>,
    toolbox: ToolBox,
}

impl SqlAgent {
    pub fn new(
        model: Arc<dyn ChatModel>,
        index: Arc<SchemaIndex>,
        gateway: Arc<dyn QueryGateway>,
        memory: Arc<dyn ConversationMemory>,
        settings: AgentSettings,
    ) -> Self {
        let counters = Arc::new(AgentCounters::new());
        let toolbox = ToolBox::new(
            Arc::clone(&index),
            Arc::clone(&gateway),
            settings.tools.clone(),
            Arc::clone(&counters),
        );
        Self {
            model,
            index,
            gateway,
            memory,
            settings,
            counters,
            system_prompt: prompt::system_prompt(),
            tool_specs: tools::tool_specs(),
            toolbox,
        }
    }

    /// Wires the HTTP model, HTTP embedder and SQLite gateway described by `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let gateway = SqliteGateway::from_config(config)
            .with_context(|| format!("Failed to open database {}", config.database_path.display()))?;
        let embedder = Arc::new(HttpEmbedder::from_config(config)?);
        let index = Arc::new(SchemaIndex::new(embedder, config.vector_db_path.clone()));
        let model = Arc::new(OpenAiChatModel::from_config(config)?);

        Ok(Self::new(
            model,
            index,
            Arc::new(gateway),
            Arc::new(InMemoryConversationMemory::new()),
            AgentSettings::from_config(config),
        ))
    }

    pub fn index(&self) -> &Arc<SchemaIndex> {
        &self.index
    }

    pub fn gateway(&self) -> &Arc<dyn QueryGateway> {
        &self.gateway
    }

    pub fn memory(&self) -> &Arc<dyn ConversationMemory> {
        &self.memory
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    pub fn toolbox(&self) -> &ToolBox {
        &self.toolbox
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }

    /// Checks the database, then loads or builds the schema index.
    ///
    /// Database failure is fatal. Index failure is not: the agent keeps
    /// working and the schema tool answers with its not-initialized message.
    pub async fn initialize(&self, schema: &SchemaDescription) -> Result<IndexStatus> {
        self.gateway
            .test_connectivity()
            .await
            .context("Database connection failed")?;
        info!("Database connectivity verified");

        if schema.tables().is_empty() {
            warn!("Schema description has no tables; schema lookups will be unavailable");
        }

        match self.index.initialize(schema, &SchemaChunker::new()).await {
            Ok(status) => {
                info!("Schema index ready: {:?}", status);
                Ok(status)
            }
            Err(e) => {
                error!("Failed to initialize schema index: {:#}", e);
                Ok(IndexStatus::Uninitialized)
            }
        }
    }

    /// Drops whatever is persisted and builds the index again.
    pub async fn rebuild_index(&self, schema: &SchemaDescription) -> Result<IndexStatus> {
        self.index.rebuild(schema, &SchemaChunker::new()).await
    }

    /// Answers one question. Only a model failure is an `Err`; tool failures
    /// reach the model as observations.
    pub async fn process_query(&self, question: &str) -> Result<AgentRun> {
        let question_no = self.counters.inc_questions();
        info!("Processing question #{}: {}", question_no, question);

        let mut transcript = vec![Message::user(question)];
        let mut question_state = QuestionState::default();
        let mut state = LoopState::AgentTurn;

        loop {
            state = match state {
                LoopState::AgentTurn => {
                    let turn = self.counters.inc_model_turns();
                    debug!("Agent turn {} with {} messages", turn, transcript.len());
                    let reply = self
                        .model
                        .invoke(&self.system_prompt, &transcript, &self.tool_specs)
                        .await
                        .context("Language model invocation failed")?;
                    let has_tool_calls = !reply.tool_calls.is_empty();
                    transcript.push(reply.into_message());
                    if has_tool_calls {
                        LoopState::ToolTurn
                    } else {
                        LoopState::Done
                    }
                }
                LoopState::ToolTurn => {
                    let calls = transcript
                        .last()
                        .map(|m| m.tool_calls().to_vec())
                        .unwrap_or_default();
                    for call in &calls {
                        let observation = self.toolbox.dispatch(call, &mut question_state).await;
                        debug!("Tool {} returned {} chars", call.name, observation.len());
                        transcript.push(Message::tool(observation, call.name.clone(), call.id.clone()));
                    }
                    LoopState::AgentTurn
                }
                LoopState::Done => break,
            };
        }

        self.memory.checkpoint(&self.settings.thread_id, &transcript);
        let response = StructuredResponse::from_transcript(&transcript, question);
        info!(
            "Question #{} finished: success={} schema_lookups={} queries={}",
            question_no, response.success, question_state.schema_lookups, question_state.queries
        );
        Ok(AgentRun {
            response,
            transcript,
        })
    }
}
