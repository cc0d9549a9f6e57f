//! Run log records and the store that persists them

use crate::clock::ClockReading;
use crate::error::StoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RunId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunKind {
    SubscriptionStatusRun,
    OrderCreateRun,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SubscriptionStatusRun => "SUBSCRIPTION_STATUS_RUN",
            Self::OrderCreateRun => "ORDER_CREATE_RUN",
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub id: String,
    pub reason: String,
}

/// Durable record of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLog {
    pub id: RunId,
    pub kind: RunKind,
    pub day: u32,
    pub month: u32,
    pub year: i32,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub succeeded: Vec<String>,
    pub failures: Vec<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunLog {
    pub fn new(kind: RunKind, reading: &ClockReading) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            day: reading.day,
            month: reading.month,
            year: reading.year,
            total: 0,
            successful: 0,
            failed: 0,
            succeeded: Vec::new(),
            failures: Vec::new(),
            started_at: reading.timestamp,
            finished_at: None,
        }
    }

    pub fn processed(&self) -> usize {
        self.successful + self.failed
    }

    pub fn is_complete(&self) -> bool {
        self.processed() == self.total
    }
}

/// Persistence for run logs
///
/// Appends must be safe to call concurrently for the same run.
#[async_trait::async_trait]
pub trait RunLedgerStore: Send + Sync {
    async fn create(&self, log: RunLog) -> StoreResult<RunId>;

    async fn set_total(&self, run_id: &str, total: usize) -> StoreResult<()>;

    async fn append_success(&self, run_id: &str, item_id: &str) -> StoreResult<()>;

    async fn append_failure(&self, run_id: &str, failure: RunFailure) -> StoreResult<()>;

    async fn finish(&self, run_id: &str, finished_at: DateTime<Utc>) -> StoreResult<()>;

    async fn get(&self, run_id: &str) -> StoreResult<Option<RunLog>>;

    /// Most recently started run of a kind
    async fn latest(&self, kind: RunKind) -> StoreResult<Option<RunLog>>;
}
