// sql-rag-agent/crates/sql-rag-agent/tests/agent_loop.rs

mod common;

use async_trait::async_trait;
use common::{clinic_schema, patients_db, tool_call, ScriptedModel, SwitchableEmbedder, WordEmbedder};
use sql_rag_agent::agent::tools::QUERY_TIMED_OUT;
use sql_rag_agent::agent::{AgentSettings, ToolSettings, QUERY_TOOL, SCHEMA_LOOKUP_TOOL};
use sql_rag_agent::{
    AssistantReply, ConversationMemory, InMemoryConversationMemory, IndexStatus, QueryGateway, QueryResult,
    SchemaIndex, SqlAgent, SqliteGateway,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn build_agent(dir: &TempDir, model: Arc<ScriptedModel>) -> SqlAgent {
    let db = patients_db(dir.path(), 10);
    let gateway = SqliteGateway::new(&db, 2, 1000).unwrap();
    let index = SchemaIndex::new(Arc::new(WordEmbedder::new()), dir.path().join("vector_db"));
    SqlAgent::new(
        model,
        Arc::new(index),
        Arc::new(gateway),
        Arc::new(InMemoryConversationMemory::new()),
        AgentSettings::default(),
    )
}

#[tokio::test]
async fn one_tool_turn_gives_four_messages() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        tool_call("call_1", QUERY_TOOL, "SELECT COUNT(*) AS N FROM PATIENTS"),
        AssistantReply::text("✅ Query executed successfully! Found 1 records. There are 10 patients."),
    ]));
    let agent = build_agent(&dir, model.clone());

    let run = agent.process_query("How many patients are there?").await.unwrap();

    assert_eq!(run.transcript.len(), 4);
    assert_eq!(run.tool_turns(), 1);
    assert_eq!(*model.seen.lock().unwrap(), vec![1, 3]);
    assert!(run.transcript[2]
        .content()
        .starts_with("✅ Query executed successfully! Found 1 records."));
    assert!(run.transcript[2].content().contains("\"N\": 10"));
    assert!(run.response.success);
    assert_eq!(run.response.result_count, 1);
    assert_eq!(agent.memory().get_history("1").len(), 4);
}

#[tokio::test]
async fn lookup_then_query_against_real_index() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        tool_call("a", SCHEMA_LOOKUP_TOOL, "patients gender"),
        tool_call(
            "b",
            QUERY_TOOL,
            "SELECT GENDER, COUNT(*) AS N FROM PATIENTS GROUP BY GENDER ORDER BY GENDER;\n",
        ),
        AssistantReply::text(
            "```sql\nSELECT GENDER, COUNT(*) AS N FROM PATIENTS GROUP BY GENDER ORDER BY GENDER;\n```\n\
             Found 2 records: 5 female and 5 male patients.",
        ),
    ]));
    let agent = build_agent(&dir, model);

    let status = agent.initialize(&clinic_schema()).await.unwrap();
    assert!(matches!(status, IndexStatus::Built { .. }));

    let run = agent.process_query("Gender breakdown of patients").await.unwrap();
    assert_eq!(run.transcript.len(), 6);
    assert_eq!(run.tool_turns(), 2);

    let lookup = run.transcript[2].content();
    assert!(lookup.contains("PATIENTS"));
    assert!(lookup.ends_with("Do NOT call 'rag_schema_query' again for this question."));

    let query = run.transcript[4].content();
    assert!(query.starts_with("✅ Query executed successfully! Found 2 records."));

    assert_eq!(run.response.result_count, 2);
    assert_eq!(
        run.response.sql_query.as_deref(),
        Some("SELECT GENDER, COUNT(*) AS N FROM PATIENTS GROUP BY GENDER ORDER BY GENDER;")
    );
    let counters = agent.counters();
    assert_eq!(counters.schema_lookups, 1);
    assert_eq!(counters.queries_executed, 1);
    assert_eq!(counters.query_failures, 0);
}

#[tokio::test]
async fn failed_query_is_relayed_and_loop_continues() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        tool_call("a", QUERY_TOOL, "SELECT AGE FROM PATIENTS"),
        tool_call("b", QUERY_TOOL, "SELECT GENDER FROM PATIENTS WHERE ID = 999"),
        AssistantReply::text("I could not find that patient."),
    ]));
    let agent = build_agent(&dir, model);

    let run = agent.process_query("Age of patient 999?").await.unwrap();
    assert!(run.transcript[2].content().starts_with("❌ Query failed: "));
    assert!(run.transcript[2].content().contains("AGE"));
    assert_eq!(run.transcript[4].content(), "✅ Query ran but returned no results.");
    assert_eq!(agent.counters().query_failures, 1);
}

#[tokio::test]
async fn unreachable_database_fails_initialize() {
    let dir = TempDir::new().unwrap();
    let gateway = SqliteGateway::new(&dir.path().join("absent.db"), 1, 1000).unwrap();
    let agent = SqlAgent::new(
        Arc::new(ScriptedModel::new(Vec::new())),
        Arc::new(SchemaIndex::new(Arc::new(WordEmbedder::new()), dir.path())),
        Arc::new(gateway),
        Arc::new(InMemoryConversationMemory::new()),
        AgentSettings::default(),
    );
    let err = agent.initialize(&clinic_schema()).await.unwrap_err();
    assert!(err.to_string().contains("Database connection failed"));
}

#[tokio::test]
async fn lookup_failure_is_relayed_as_observation() {
    let dir = TempDir::new().unwrap();
    let embedder = Arc::new(SwitchableEmbedder::new());
    let index = Arc::new(SchemaIndex::new(embedder.clone(), dir.path().join("vector_db")));
    let db = patients_db(dir.path(), 4);
    let agent = SqlAgent::new(
        Arc::new(ScriptedModel::new(vec![
            tool_call("a", SCHEMA_LOOKUP_TOOL, "patients gender"),
            AssistantReply::text("The schema is unavailable right now."),
        ])),
        index.clone(),
        Arc::new(SqliteGateway::new(&db, 1, 1000).unwrap()),
        Arc::new(InMemoryConversationMemory::new()),
        AgentSettings::default(),
    );
    assert!(agent.initialize(&clinic_schema()).await.unwrap().is_ready());

    embedder.go_down();
    let expected = "Error retrieving schema: embedding service unavailable";
    assert_eq!(index.query("patients gender", 3).await, expected);

    let run = agent.process_query("Gender breakdown of patients").await.unwrap();
    assert_eq!(run.transcript.len(), 4);
    assert_eq!(run.transcript[2].content(), expected);
    assert_eq!(run.transcript[3].content(), "The schema is unavailable right now.");
}

/// Blocks its worker thread well past any test tool timeout.
struct StuckGateway;

#[async_trait]
impl QueryGateway for StuckGateway {
    async fn execute(&self, _sql: &str, _timeout: Duration) -> QueryResult {
        std::thread::sleep(Duration::from_secs(2));
        QueryResult::ok(Vec::new())
    }

    async fn list_columns(&self, _table: &str) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn test_connectivity(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn stuck_query_times_out_as_observation() {
    let dir = TempDir::new().unwrap();
    let settings = AgentSettings {
        tools: ToolSettings {
            tool_timeout: Duration::from_millis(100),
            ..ToolSettings::default()
        },
        ..AgentSettings::default()
    };
    let agent = SqlAgent::new(
        Arc::new(ScriptedModel::new(vec![
            tool_call("a", QUERY_TOOL, "SELECT * FROM PATIENTS"),
            AssistantReply::text("The query took too long."),
        ])),
        Arc::new(SchemaIndex::new(Arc::new(WordEmbedder::new()), dir.path())),
        Arc::new(StuckGateway),
        Arc::new(InMemoryConversationMemory::new()),
        settings,
    );

    let started = Instant::now();
    let run = agent.process_query("List every patient").await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(run.transcript[2].content(), QUERY_TIMED_OUT);
    assert_eq!(run.transcript.len(), 4);

    let counters = agent.counters();
    assert_eq!(counters.queries_executed, 1);
    assert_eq!(counters.query_timeouts, 1);
    assert_eq!(counters.query_failures, 0);
}

#[tokio::test]
async fn memory_keeps_only_the_latest_transcript() {
    let dir = TempDir::new().unwrap();
    let model = Arc::new(ScriptedModel::new(vec![
        tool_call("a", QUERY_TOOL, "SELECT COUNT(*) AS N FROM PATIENTS"),
        AssistantReply::text("Found 1 records."),
        AssistantReply::text("Hello."),
    ]));
    let agent = build_agent(&dir, model);

    agent.process_query("How many patients?").await.unwrap();
    assert_eq!(agent.memory().get_history("1").len(), 4);

    let second = agent.process_query("Hi").await.unwrap();
    assert_eq!(agent.memory().get_history("1"), second.transcript);
    assert_eq!(second.transcript.len(), 2);
}
