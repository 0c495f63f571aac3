//! SQL Execution Contract
//!
//! The database engine lives outside this crate. Callers implement
//! `SqlExecutor` and hand results back for conversation recording and chart
//! recommendation; execution-time caps are the executor's responsibility.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type Row = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub rows: Vec<Row>,
    pub count: usize,
    #[serde(default)]
    pub execution_time_ms: u64,
}

impl ExecutionResult {
    pub fn new(rows: Vec<Row>, execution_time_ms: u64) -> Self {
        let count = rows.len();
        Self {
            rows,
            count,
            execution_time_ms,
        }
    }

    /// Column names in first-row order, empty for empty results.
    pub fn columns(&self) -> Vec<String> {
        self.rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
pub trait SqlExecutor: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<ExecutionResult>;
}
