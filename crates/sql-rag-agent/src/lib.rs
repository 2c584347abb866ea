// sql-rag-agent/crates/sql-rag-agent/src/lib.rs

pub mod agent;
pub mod audit;
pub mod chunker;
pub mod config;
pub mod database;
pub mod embedding;
pub mod identifiers;
pub mod llm;
pub mod memory;
pub mod response;
pub mod schema;
pub mod schema_index;
pub mod telemetry;
pub mod utils;

// Public API exports
pub use agent::{AgentRun, SqlAgent};
pub use config::Config;
pub use memory::{ConversationMemory, InMemoryConversationMemory, Message, ToolCall};
pub use response::StructuredResponse;

// Component exports
pub use chunker::{Chunk, ChunkType, SchemaChunker};
pub use database::{QueryGateway, QueryResult, SqliteGateway};
pub use embedding::{Embedder, HttpEmbedder};
pub use identifiers::{build_case_safe_select, case_safe_column};
pub use llm::{AssistantReply, ChatModel, OpenAiChatModel, ToolSpec};
pub use schema::SchemaDescription;
pub use schema_index::{IndexStatus, SchemaIndex};
