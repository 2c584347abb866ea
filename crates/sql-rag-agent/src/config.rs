// sql-rag-agent/crates/sql-rag-agent/src/config.rs

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Schema description files tried in order when `SCHEMA_DESCRIPTION_PATH` is unset.
pub const DEFAULT_SCHEMA_CANDIDATES: [&str; 2] = ["description.json", "description.txt"];

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_api_version: Option<String>,
    pub llm_temperature: f32,
    pub llm_timeout_seconds: u64,
    pub embedding_base_url: String,
    pub embedding_api_key: Option<String>,
    /// Set for Azure-style embedding deployments.
    pub embedding_api_version: Option<String>,
    pub embedding_model: String,
    pub database_path: PathBuf,
    pub db_pool_size: u32,
    pub statement_timeout_seconds: u64,
    pub tool_timeout_seconds: u64,
    pub max_result_rows: usize,
    pub schema_description_path: Option<PathBuf>,
    pub vector_db_path: PathBuf,
    pub rag_top_k: usize,
    pub enforce_single_schema_lookup: bool,
    pub transcript_dir: PathBuf,
    pub thread_id: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            warn!("Failed to load .env file: {}. Using system environment variables.", e);
        } else {
            info!("Loaded environment variables from .env file");
        }

        let llm_base_url = env::var("LLM_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".into())
            .trim_end_matches('/')
            .to_string();
        let llm_api_key = non_empty_var("LLM_API_KEY");

        let llm_api_version = non_empty_var("LLM_API_VERSION");
        let explicit_embedding_url = non_empty_var("EMBEDDING_BASE_URL");
        let embedding_api_version = embedding_api_version(
            non_empty_var("EMBEDDING_API_VERSION"),
            explicit_embedding_url.is_some(),
            llm_api_version.as_deref(),
        );
        let embedding_base_url = explicit_embedding_url
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or_else(|| llm_base_url.clone());
        let embedding_api_key = non_empty_var("EMBEDDING_API_KEY").or_else(|| llm_api_key.clone());

        let config = Self {
            llm_base_url,
            llm_api_key,
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o".into()),
            llm_api_version,
            llm_temperature: env::var("LLM_TEMPERATURE")
                .unwrap_or_else(|_| "0.1".into())
                .parse()
                .context("LLM_TEMPERATURE must be a number")?,
            llm_timeout_seconds: env::var("LLM_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "120".into())
                .parse()
                .context("LLM_TIMEOUT_SECONDS must be an integer")?,
            embedding_base_url,
            embedding_api_key,
            embedding_api_version,
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-large".into()),
            database_path: PathBuf::from(
                env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/database.db".into()),
            ),
            db_pool_size: env::var("DB_POOL_SIZE")
                .unwrap_or_else(|_| "10".into())
                .parse()
                .context("DB_POOL_SIZE must be an integer")?,
            statement_timeout_seconds: env::var("STATEMENT_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "30".into())
                .parse()
                .context("STATEMENT_TIMEOUT_SECONDS must be an integer")?,
            tool_timeout_seconds: env::var("TOOL_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| "45".into())
                .parse()
                .context("TOOL_TIMEOUT_SECONDS must be an integer")?,
            max_result_rows: env::var("MAX_RESULT_ROWS")
                .unwrap_or_else(|_| "1000".into())
                .parse()
                .context("MAX_RESULT_ROWS must be an integer")?,
            schema_description_path: non_empty_var("SCHEMA_DESCRIPTION_PATH").map(PathBuf::from),
            vector_db_path: PathBuf::from(
                env::var("VECTOR_DB_PATH").unwrap_or_else(|_| "vector_db_structured".into()),
            ),
            rag_top_k: env::var("RAG_TOP_K")
                .unwrap_or_else(|_| "3".into())
                .parse()
                .context("RAG_TOP_K must be an integer")?,
            enforce_single_schema_lookup: parse_bool(
                &env::var("ENFORCE_SINGLE_SCHEMA_LOOKUP").unwrap_or_else(|_| "true".into()),
            )
            .context("ENFORCE_SINGLE_SCHEMA_LOOKUP must be true or false")?,
            transcript_dir: PathBuf::from(
                env::var("TRANSCRIPT_DIR").unwrap_or_else(|_| "json_responses_enhanced".into()),
            ),
            thread_id: env::var("THREAD_ID").unwrap_or_else(|_| "1".into()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("TOOL_TIMEOUT_SECONDS must be greater than zero"));
        }
        if self.statement_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("STATEMENT_TIMEOUT_SECONDS must be greater than zero"));
        }
        if self.max_result_rows == 0 {
            return Err(anyhow::anyhow!("MAX_RESULT_ROWS must be greater than zero"));
        }
        if self.rag_top_k == 0 {
            return Err(anyhow::anyhow!("RAG_TOP_K must be greater than zero"));
        }
        if self.tool_timeout_seconds <= self.statement_timeout_seconds {
            warn!(
                "Tool timeout ({}s) does not exceed the statement timeout ({}s); \
                 slow queries will surface as tool timeouts",
                self.tool_timeout_seconds, self.statement_timeout_seconds
            );
        }
        Ok(())
    }

    /// Schema description files to try, in order.
    pub fn schema_candidates(&self) -> Vec<PathBuf> {
        match &self.schema_description_path {
            Some(path) => vec![path.clone()],
            None => DEFAULT_SCHEMA_CANDIDATES.iter().map(PathBuf::from).collect(),
        }
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_seconds)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_seconds)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_seconds)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- LLM Endpoint: {}", self.llm_base_url);
        info!("- LLM Model: {}", self.llm_model);
        info!("- LLM API Key: {}", mask_secret(self.llm_api_key.as_deref()));
        if let Some(version) = &self.llm_api_version {
            info!("- LLM API Version: {}", version);
        }
        info!("- Embedding Endpoint: {}", self.embedding_base_url);
        if let Some(version) = &self.embedding_api_version {
            info!("- Embedding API Version: {}", version);
        }
        info!("- Embedding Model: {}", self.embedding_model);
        info!("- Database: {}", self.database_path.display());
        info!("- Pool Size: {}", self.db_pool_size);
        info!("- Statement Timeout: {}s", self.statement_timeout_seconds);
        info!("- Tool Timeout: {}s", self.tool_timeout_seconds);
        info!("- Max Result Rows: {}", self.max_result_rows);
        info!("- Vector DB Path: {}", self.vector_db_path.display());
        info!("- RAG Top K: {}", self.rag_top_k);
        info!("- Single Schema Lookup Enforced: {}", self.enforce_single_schema_lookup);
        info!("- Transcript Dir: {}", self.transcript_dir.display());
    }
}

/// The LLM's API version only carries over when the embedder shares its endpoint.
fn embedding_api_version(
    explicit: Option<String>,
    has_own_endpoint: bool,
    llm_api_version: Option<&str>,
) -> Option<String> {
    match explicit {
        Some(version) => Some(version),
        None if has_own_endpoint => None,
        None => llm_api_version.map(str::to_string),
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow::anyhow!("invalid boolean value: {}", other)),
    }
}

fn mask_secret(secret: Option<&str>) -> String {
    match secret {
        Some(value) if value.chars().count() > 6 => {
            let prefix: String = value.chars().take(6).collect();
            format!("{}...", prefix)
        }
        Some(_) => "***".to_string(),
        None => "(not set)".to_string(),
    }
}
