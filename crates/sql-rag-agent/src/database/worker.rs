// sql-rag-agent/crates/sql-rag-agent/src/database/worker.rs

//! Runs one gateway call on a dedicated thread with its own runtime, so a
//! slow or blocking statement cannot stall the caller's event loop.

use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use super::{QueryGateway, QueryResult};

#[derive(Debug, Clone, PartialEq)]
pub enum ToolExecution {
    Completed(QueryResult),
    /// The wall-clock bound elapsed first. The worker thread is abandoned, not stopped.
    TimedOut,
    WorkerFailed(String),
}

pub async fn run_isolated(
    gateway: Arc<dyn QueryGateway>,
    sql: String,
    statement_timeout: Duration,
    tool_timeout: Duration,
) -> ToolExecution {
    let (sender, receiver) = oneshot::channel();

    let spawned = thread::Builder::new()
        .name("sql-query-worker".to_string())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = sender.send(Err(format!("Failed to create worker runtime: {}", e)));
                    return;
                }
            };
            let result = rt.block_on(async move { gateway.execute(&sql, statement_timeout).await });
            if sender.send(Ok(result)).is_err() {
                debug!("Query worker finished after the caller stopped waiting");
            }
        });

    if let Err(e) = spawned {
        error!("Failed to spawn query worker: {}", e);
        return ToolExecution::WorkerFailed(e.to_string());
    }

    match tokio::time::timeout(tool_timeout, receiver).await {
        Ok(Ok(Ok(result))) => ToolExecution::Completed(result),
        Ok(Ok(Err(message))) => ToolExecution::WorkerFailed(message),
        Ok(Err(_)) => ToolExecution::WorkerFailed("worker exited without a result".to_string()),
        Err(_) => {
            warn!("Query worker exceeded {:?}; abandoning it", tool_timeout);
            ToolExecution::TimedOut
        }
    }
}
