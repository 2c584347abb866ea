// sql-rag-agent/crates/sql-rag-agent/src/memory.rs

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A structured request from the model to invoke one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object, exactly as the model produced it.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        content: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_name: String,
        tool_call_id: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool(
        content: impl Into<String>,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        Message::Tool {
            content: content.into(),
            tool_name: tool_name.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::User { .. } => "user",
            Message::Assistant { .. } => "assistant",
            Message::Tool { .. } => "tool",
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::User { content }
            | Message::Assistant { content, .. }
            | Message::Tool { content, .. } => content,
        }
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant { .. })
    }
}

/// Checkpoint store for conversation transcripts, keyed by thread id.
pub trait ConversationMemory: Send + Sync {
    fn get_history(&self, thread_id: &str) -> Vec<Message>;
    /// Replaces the thread's stored transcript with `transcript`.
    fn checkpoint(&self, thread_id: &str, transcript: &[Message]);
    fn clear_history(&self, thread_id: &str);
}

#[derive(Clone)]
pub struct InMemoryConversationMemory {
    store: Arc<DashMap<String, Vec<Message>>>,
}

impl InMemoryConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn thread_count(&self) -> usize {
        self.store.len()
    }
}

impl Default for InMemoryConversationMemory {
    fn default() -> Self {
        Self {
            store: Arc::new(DashMap::new()),
        }
    }
}

impl ConversationMemory for InMemoryConversationMemory {
    fn get_history(&self, thread_id: &str) -> Vec<Message> {
        match self.store.get(thread_id) {
            Some(history) => history.clone(),
            None => Vec::new(),
        }
    }

    fn checkpoint(&self, thread_id: &str, transcript: &[Message]) {
        self.store.insert(thread_id.to_string(), transcript.to_vec());
    }

    fn clear_history(&self, thread_id: &str) {
        self.store.remove(thread_id);
    }
}
