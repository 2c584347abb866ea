// sql-rag-agent/crates/sql-rag-agent/src/main.rs

#[cfg(feature = "cli")]
mod cli {
    use anyhow::{Context, Result};
    use clap::{Parser, Subcommand};
    use std::fs;
    use std::time::Instant;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tracing::{error, info};

    use sql_rag_agent::audit::TranscriptWriter;
    use sql_rag_agent::database::diagnostics::TOOL_CHECKS;
    use sql_rag_agent::database::{run_diagnostics, CheckGroup, QueryGateway, SqliteGateway};
    use sql_rag_agent::{telemetry, Config, SchemaDescription, SqlAgent, StructuredResponse};

    #[derive(Parser)]
    #[command(name = "sql-rag-agent", version, about = "Ask questions about a SQL database in plain language")]
    struct Cli {
        #[command(subcommand)]
        command: Option<Command>,
    }

    #[derive(Subcommand)]
    enum Command {
        /// Interactive question loop (default)
        Chat,
        /// Run one statement directly and through the query tool, or the
        /// built-in check battery when no statement is given
        Debug {
            #[arg(num_args = 0..)]
            sql: Vec<String>,
        },
        /// Test the database connection and list its tables
        Check,
        /// Create working directories and load or build the schema index
        Setup {
            #[arg(long)]
            rebuild_index: bool,
        },
    }

    pub async fn run() -> Result<()> {
        telemetry::init_tracing();
        let cli = Cli::parse();
        let config = Config::from_env()?;
        config.print_config();

        match cli.command.unwrap_or(Command::Chat) {
            Command::Chat => chat(&config).await,
            Command::Debug { sql } => debug(&config, &sql.join(" ")).await,
            Command::Check => check(&config).await,
            Command::Setup { rebuild_index } => setup(&config, rebuild_index).await,
        }
    }

    async fn chat(config: &Config) -> Result<()> {
        let agent = SqlAgent::from_config(config)?;
        let (schema, _) = SchemaDescription::load_first(&config.schema_candidates());
        let status = agent.initialize(&schema).await?;
        info!("Agent ready (index: {:?})", status);

        let mut writer =
            TranscriptWriter::new(&config.transcript_dir, &config.embedding_model, &config.llm_model);
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        println!("Ask a question about the database. Type 'help' for tips, 'exit' to leave.");
        loop {
            stdout.write_all(b"\nYour question: ").await?;
            stdout.flush().await?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            let question = line.trim();

            match question.to_lowercase().as_str() {
                "exit" | "quit" | "q" => break,
                "help" => {
                    print_help();
                    continue;
                }
                "" => {
                    println!("Ask any question about the data.");
                    continue;
                }
                _ => {}
            }

            let started = Instant::now();
            match agent.process_query(question).await {
                Ok(run) => {
                    let elapsed = started.elapsed().as_secs_f64();
                    print_response(&run.response, elapsed);
                    if let Some(path) = writer.record(question, &run, elapsed) {
                        println!("Audit file: {}", path.display());
                    }
                }
                Err(e) => {
                    error!("Question failed: {:#}", e);
                    println!("\n❌ Error: {:#}", e);
                }
            }
        }

        if let Some(path) = writer.finish() {
            let summary = writer.session_capture().summary();
            println!("\nSession saved: {}", path.display());
            println!(
                "Questions: {}, SQL captured: {}, unique: {}",
                writer.question_count(),
                summary.total_queries,
                summary.unique_queries
            );
        }
        println!("Goodbye.");
        Ok(())
    }

    async fn debug(config: &Config, sql: &str) -> Result<()> {
        let agent = SqlAgent::from_config(config)?;
        if sql.trim().is_empty() {
            return debug_battery(config, &agent).await;
        }

        println!("Direct execution:");
        let result = agent.gateway().execute(sql, config.statement_timeout()).await;
        println!("{}", serde_json::to_string_pretty(&result)?);

        println!("\nThrough the query tool:");
        println!("{}", agent.toolbox().run_query(sql).await);
        Ok(())
    }

    async fn debug_battery(config: &Config, agent: &SqlAgent) -> Result<()> {
        println!("🔍 DATABASE QUERY EXECUTION DEBUGGER");
        println!("{}", "=".repeat(50));
        if let Err(e) = agent.gateway().test_connectivity().await {
            println!("❌ Database connection failed: {:#}", e);
            return Ok(());
        }
        println!("✅ Database connection successful");

        let report = run_diagnostics(agent.gateway().as_ref(), config.statement_timeout()).await;
        for (group, title) in [
            (CheckGroup::Connection, "simple queries"),
            (CheckGroup::Schema, "schema queries"),
            (CheckGroup::Table, "table queries"),
        ] {
            println!("\n🧪 Testing {}...", title);
            if group == CheckGroup::Table {
                println!("    📋 Available tables: {:?}", report.tables);
            }
            for outcome in report.group(group) {
                println!("  Testing: {}", outcome.sql);
                match (&outcome.result.error, outcome.result.data.as_deref()) {
                    (Some(error), _) => println!("    ❌ Failed: {}", error),
                    (None, Some([first, ..])) => println!(
                        "    ✅ Success: {} results\n    📊 Sample: {}",
                        outcome.result.row_count(),
                        serde_json::to_string(first)?
                    ),
                    (None, _) => println!("    ✅ Success: 0 results"),
                }
            }
        }

        println!("\n🧪 Testing the query tool...");
        for sql in TOOL_CHECKS {
            println!("  Testing tool with: {}", sql);
            println!("    {}", agent.toolbox().run_query(sql).await);
        }

        println!("\n{}", "=".repeat(50));
        println!(
            "🎯 DEBUG COMPLETE: {} passed, {} failed",
            report.passed(),
            report.failed()
        );
        Ok(())
    }

    async fn check(config: &Config) -> Result<()> {
        let gateway = SqliteGateway::from_config(config)?;
        gateway
            .test_connectivity()
            .await
            .context("Database connection failed")?;
        println!("✅ Database connection OK: {}", gateway.path().display());

        let tables = gateway.list_tables()?;
        println!("{} tables:", tables.len());
        for table in tables {
            let columns = gateway.list_columns(&table).await?;
            println!("  {} ({} columns)", table, columns.len());
        }
        Ok(())
    }

    async fn setup(config: &Config, rebuild_index: bool) -> Result<()> {
        for dir in [&config.vector_db_path, &config.transcript_dir] {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
            println!("Directory ready: {}", dir.display());
        }

        let agent = SqlAgent::from_config(config)?;
        let (schema, source) = SchemaDescription::load_first(&config.schema_candidates());
        match source {
            Some(path) => println!("Schema description: {} ({} tables)", path.display(), schema.table_count()),
            None => println!("No schema description file found"),
        }

        let status = if rebuild_index {
            agent.gateway().test_connectivity().await.context("Database connection failed")?;
            agent.rebuild_index(&schema).await?
        } else {
            agent.initialize(&schema).await?
        };
        println!("Schema index: {:?}", status);
        Ok(())
    }

    fn print_help() {
        println!("\nTips:");
        println!("  - Ask about tables, counts or specific records in plain language.");
        println!("  - Every SQL statement the agent writes is saved to the audit directory.");
        println!("  - Type 'exit', 'quit' or 'q' to end the session.");
    }

    fn print_response(response: &StructuredResponse, elapsed: f64) {
        let marker = if response.success { "✅" } else { "❌" };
        println!("\n{} {}", marker, response.message);
        if let Some(sql) = &response.sql_query {
            println!("\nSQL: {}", sql);
        }
        println!("Results: {}  ({:.2}s)", response.result_count, elapsed);
        for insight in &response.business_insights {
            println!("💡 {}", insight);
        }
    }
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::run().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
