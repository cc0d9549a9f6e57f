//! In-memory run log store

use super::{RunFailure, RunId, RunKind, RunLedgerStore, RunLog};
use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub struct InMemoryRunLedgerStore {
    runs: Arc<RwLock<HashMap<RunId, RunLog>>>,
}

impl InMemoryRunLedgerStore {
    pub fn new() -> Self {
        Self {
            runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Snapshot of every stored run
    pub fn all(&self) -> Vec<RunLog> {
        self.runs.read().values().cloned().collect()
    }

    fn with_run<T>(&self, run_id: &str, f: impl FnOnce(&mut RunLog) -> T) -> StoreResult<T> {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(run_id)
            .ok_or_else(|| StoreError::NotFound(run_id.to_string()))?;
        Ok(f(run))
    }
}

impl Default for InMemoryRunLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RunLedgerStore for InMemoryRunLedgerStore {
    async fn create(&self, log: RunLog) -> StoreResult<RunId> {
        let mut runs = self.runs.write();
        if runs.contains_key(&log.id) {
            return Err(StoreError::Conflict(log.id));
        }
        let id = log.id.clone();
        runs.insert(id.clone(), log);
        Ok(id)
    }

    async fn set_total(&self, run_id: &str, total: usize) -> StoreResult<()> {
        self.with_run(run_id, |run| run.total = total)
    }

    async fn append_success(&self, run_id: &str, item_id: &str) -> StoreResult<()> {
        self.with_run(run_id, |run| {
            run.succeeded.push(item_id.to_string());
            run.successful += 1;
        })
    }

    async fn append_failure(&self, run_id: &str, failure: RunFailure) -> StoreResult<()> {
        self.with_run(run_id, |run| {
            run.failures.push(failure);
            run.failed += 1;
        })
    }

    async fn finish(&self, run_id: &str, finished_at: DateTime<Utc>) -> StoreResult<()> {
        self.with_run(run_id, |run| {
            if run.finished_at.is_some() {
                return Err(StoreError::Conflict(format!("run {run_id} already finished")));
            }
            run.finished_at = Some(finished_at);
            Ok(())
        })?
    }

    async fn get(&self, run_id: &str) -> StoreResult<Option<RunLog>> {
        Ok(self.runs.read().get(run_id).cloned())
    }

    async fn latest(&self, kind: RunKind) -> StoreResult<Option<RunLog>> {
        Ok(self
            .runs
            .read()
            .values()
            .filter(|run| run.kind == kind)
            .max_by_key(|run| run.started_at)
            .cloned())
    }
}
