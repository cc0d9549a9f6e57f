//! Run ledger
//!
//! A [`RunLedger`] tracks one run while it executes. Item outcomes may arrive
//! from many workers at once; the ledger is the single synchronization point
//! that decides when the run is complete and closes it exactly once.
//!
//! Two counters are kept:
//! - `claimed` is reserved before an outcome is written, so no more than
//!   `total` outcomes are ever accepted.
//! - `settled` is bumped after the write returns. The worker that moves it to
//!   `total` is the one that closes the run.
//!
//! Appends are retried a few times. An outcome that still cannot be stored
//! keeps the run open, so a finished run always satisfies
//! `successful + failed == total`.

mod traits;

pub mod memory;

pub use memory::InMemoryRunLedgerStore;
pub use traits::{RunFailure, RunId, RunKind, RunLedgerStore, RunLog};

use crate::clock::ClockSource;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

const APPEND_ATTEMPTS: u32 = 3;
const APPEND_BACKOFF: Duration = Duration::from_millis(50);

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Total already set for run {0}")]
    TotalAlreadySet(RunId),

    #[error("Total not yet set for run {0}")]
    TotalNotSet(RunId),

    #[error("Run {run_id} already received all {total} outcomes")]
    CounterOverflow { run_id: RunId, total: usize },

    #[error("Run ledger store error: {0}")]
    Store(#[from] StoreError),
}

/// Totals reported back to whoever triggered a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub kind: RunKind,
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
}

pub struct RunLedger {
    store: Arc<dyn RunLedgerStore>,
    clock: ClockSource,
    run_id: RunId,
    kind: RunKind,
    total: OnceLock<usize>,
    claimed: AtomicUsize,
    settled: AtomicUsize,
    successful: AtomicUsize,
    failed: AtomicUsize,
    lost: AtomicUsize,
    closed: AtomicBool,
}

impl RunLedger {
    /// Create the run log with `total = 0` and `started_at = now`
    pub async fn open(
        store: Arc<dyn RunLedgerStore>,
        clock: ClockSource,
        kind: RunKind,
    ) -> LedgerResult<Self> {
        let reading = clock.now();
        let run_id = store.create(RunLog::new(kind, &reading)).await?;

        tracing::info!(run_id = %run_id, kind = %kind, "Opened run");

        Ok(Self {
            store,
            clock,
            run_id,
            kind,
            total: OnceLock::new(),
            claimed: AtomicUsize::new(0),
            settled: AtomicUsize::new(0),
            successful: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            lost: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn kind(&self) -> RunKind {
        self.kind
    }

    pub fn total(&self) -> Option<usize> {
        self.total.get().copied()
    }

    /// Record the candidate count. A run with no candidates closes immediately.
    pub async fn set_total(&self, total: usize) -> LedgerResult<()> {
        self.total
            .set(total)
            .map_err(|_| LedgerError::TotalAlreadySet(self.run_id.clone()))?;
        self.store.set_total(&self.run_id, total).await?;

        tracing::info!(run_id = %self.run_id, total, "Run total set");

        if total == 0 {
            self.close().await?;
        }
        Ok(())
    }

    pub async fn record_success(&self, item_id: &str) -> LedgerResult<()> {
        self.claim()?;
        let written = self
            .append_with_retry(|| self.store.append_success(&self.run_id, item_id))
            .await;
        if written.is_ok() {
            self.successful.fetch_add(1, Ordering::SeqCst);
        }
        self.settle(item_id, written).await
    }

    pub async fn record_failure(&self, item_id: &str, reason: &str) -> LedgerResult<()> {
        self.claim()?;
        let written = self
            .append_with_retry(|| {
                self.store.append_failure(
                    &self.run_id,
                    RunFailure {
                        id: item_id.to_string(),
                        reason: reason.to_string(),
                    },
                )
            })
            .await;
        if written.is_ok() {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
        self.settle(item_id, written).await
    }

    /// True once every candidate has reported
    pub fn is_complete(&self) -> bool {
        self.total()
            .is_some_and(|total| self.settled.load(Ordering::SeqCst) == total)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            run_id: self.run_id.clone(),
            kind: self.kind,
            total: self.total().unwrap_or(0),
            successful: self.successful.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    fn claim(&self) -> LedgerResult<()> {
        let total = self
            .total()
            .ok_or_else(|| LedgerError::TotalNotSet(self.run_id.clone()))?;

        self.claimed
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |claimed| {
                (claimed < total).then_some(claimed + 1)
            })
            .map(|_| ())
            .map_err(|_| LedgerError::CounterOverflow {
                run_id: self.run_id.clone(),
                total,
            })
    }

    async fn append_with_retry<F, Fut>(&self, append: F) -> Result<(), StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), StoreError>>,
    {
        let mut attempt = 1;
        loop {
            match append().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < APPEND_ATTEMPTS => {
                    tracing::warn!(run_id = %self.run_id, attempt, error = %e, "Retrying run outcome append");
                    tokio::time::sleep(APPEND_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Count a claimed outcome as reported. The run is finished only if every
    /// outcome reached the store; otherwise `finished_at` stays unset.
    async fn settle(&self, item_id: &str, written: Result<(), StoreError>) -> LedgerResult<()> {
        if let Err(e) = &written {
            self.lost.fetch_add(1, Ordering::SeqCst);
            tracing::error!(run_id = %self.run_id, item_id, error = %e, "Lost run outcome");
        }

        let settled = self.settled.fetch_add(1, Ordering::SeqCst) + 1;
        if Some(settled) == self.total() {
            let lost = self.lost.load(Ordering::SeqCst);
            if lost == 0 {
                self.close().await?;
            } else {
                tracing::error!(
                    run_id = %self.run_id,
                    kind = %self.kind,
                    lost,
                    "Run left open: stored outcomes do not add up to the total"
                );
            }
        }

        written.map_err(LedgerError::from)
    }

    async fn close(&self) -> LedgerResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Err(e) = self
            .store
            .finish(&self.run_id, self.clock.now().timestamp)
            .await
        {
            tracing::error!(run_id = %self.run_id, kind = %self.kind, error = %e, "Failed to finish run");
            return Err(e.into());
        }

        let summary = self.summary();
        tracing::info!(
            run_id = %self.run_id,
            kind = %self.kind,
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            "Closed run"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreResult;
    use chrono::{DateTime, Utc};

    fn open_store() -> (Arc<InMemoryRunLedgerStore>, ClockSource) {
        (
            Arc::new(InMemoryRunLedgerStore::new()),
            ClockSource::new(chrono_tz::UTC),
        )
    }

    #[tokio::test]
    async fn test_open_starts_with_zero_total() {
        let (store, clock) = open_store();
        let ledger = RunLedger::open(store.clone(), clock, RunKind::SubscriptionStatusRun)
            .await
            .unwrap();

        let log = store.get(ledger.run_id()).await.unwrap().unwrap();
        assert_eq!(log.total, 0);
        assert_eq!(log.kind, RunKind::SubscriptionStatusRun);
        assert!(log.finished_at.is_none());
        assert!(!ledger.is_complete());
    }

    #[tokio::test]
    async fn test_zero_total_closes_immediately() {
        let (store, clock) = open_store();
        let ledger = RunLedger::open(store.clone(), clock, RunKind::OrderCreateRun)
            .await
            .unwrap();

        ledger.set_total(0).await.unwrap();

        assert!(ledger.is_complete());
        assert!(ledger.is_closed());
        let log = store.get(ledger.run_id()).await.unwrap().unwrap();
        assert!(log.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_total_can_only_be_set_once() {
        let (store, clock) = open_store();
        let ledger = RunLedger::open(store, clock, RunKind::OrderCreateRun)
            .await
            .unwrap();

        ledger.set_total(2).await.unwrap();
        assert!(matches!(
            ledger.set_total(3).await,
            Err(LedgerError::TotalAlreadySet(_))
        ));
    }

    #[tokio::test]
    async fn test_outcome_before_total_is_rejected() {
        let (store, clock) = open_store();
        let ledger = RunLedger::open(store, clock, RunKind::OrderCreateRun)
            .await
            .unwrap();

        assert!(matches!(
            ledger.record_success("sub-1").await,
            Err(LedgerError::TotalNotSet(_))
        ));
    }

    #[tokio::test]
    async fn test_counters_never_exceed_total() {
        let (store, clock) = open_store();
        let ledger = RunLedger::open(store.clone(), clock, RunKind::OrderCreateRun)
            .await
            .unwrap();
        ledger.set_total(2).await.unwrap();

        ledger.record_success("sub-1").await.unwrap();
        assert!(!ledger.is_complete());
        ledger.record_failure("sub-2", "User not found").await.unwrap();
        assert!(ledger.is_complete());

        assert!(matches!(
            ledger.record_success("sub-3").await,
            Err(LedgerError::CounterOverflow { total: 2, .. })
        ));

        let log = store.get(ledger.run_id()).await.unwrap().unwrap();
        assert_eq!(log.successful, 1);
        assert_eq!(log.failed, 1);
        assert_eq!(log.succeeded, vec!["sub-1".to_string()]);
        assert_eq!(log.failures[0].reason, "User not found");
        assert!(log.finished_at.is_some());
    }

    /// Counts `finish` calls to prove the run is closed exactly once
    struct CountingStore {
        inner: InMemoryRunLedgerStore,
        finishes: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RunLedgerStore for CountingStore {
        async fn create(&self, log: RunLog) -> StoreResult<RunId> {
            self.inner.create(log).await
        }
        async fn set_total(&self, run_id: &str, total: usize) -> StoreResult<()> {
            self.inner.set_total(run_id, total).await
        }
        async fn append_success(&self, run_id: &str, item_id: &str) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.inner.append_success(run_id, item_id).await
        }
        async fn append_failure(&self, run_id: &str, failure: RunFailure) -> StoreResult<()> {
            tokio::task::yield_now().await;
            self.inner.append_failure(run_id, failure).await
        }
        async fn finish(&self, run_id: &str, finished_at: DateTime<Utc>) -> StoreResult<()> {
            self.finishes.fetch_add(1, Ordering::SeqCst);
            self.inner.finish(run_id, finished_at).await
        }
        async fn get(&self, run_id: &str) -> StoreResult<Option<RunLog>> {
            self.inner.get(run_id).await
        }
        async fn latest(&self, kind: RunKind) -> StoreResult<Option<RunLog>> {
            self.inner.latest(kind).await
        }
    }

    /// Fails the first `failing_appends` success appends, and optionally every `finish`
    struct FlakyStore {
        inner: InMemoryRunLedgerStore,
        failing_appends: AtomicUsize,
        fail_finish: bool,
    }

    impl FlakyStore {
        fn new(failing_appends: usize, fail_finish: bool) -> Self {
            Self {
                inner: InMemoryRunLedgerStore::new(),
                failing_appends: AtomicUsize::new(failing_appends),
                fail_finish,
            }
        }
    }

    #[async_trait::async_trait]
    impl RunLedgerStore for FlakyStore {
        async fn create(&self, log: RunLog) -> StoreResult<RunId> {
            self.inner.create(log).await
        }
        async fn set_total(&self, run_id: &str, total: usize) -> StoreResult<()> {
            self.inner.set_total(run_id, total).await
        }
        async fn append_success(&self, run_id: &str, item_id: &str) -> StoreResult<()> {
            let failing = self
                .failing_appends
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Unavailable("ledger write timed out".to_string()));
            }
            self.inner.append_success(run_id, item_id).await
        }
        async fn append_failure(&self, run_id: &str, failure: RunFailure) -> StoreResult<()> {
            self.inner.append_failure(run_id, failure).await
        }
        async fn finish(&self, run_id: &str, finished_at: DateTime<Utc>) -> StoreResult<()> {
            if self.fail_finish {
                return Err(StoreError::Unavailable("ledger write timed out".to_string()));
            }
            self.inner.finish(run_id, finished_at).await
        }
        async fn get(&self, run_id: &str) -> StoreResult<Option<RunLog>> {
            self.inner.get(run_id).await
        }
        async fn latest(&self, kind: RunKind) -> StoreResult<Option<RunLog>> {
            self.inner.latest(kind).await
        }
    }

    async fn open_flaky(store: &Arc<FlakyStore>, total: usize) -> RunLedger {
        let ledger = RunLedger::open(
            store.clone(),
            ClockSource::new(chrono_tz::UTC),
            RunKind::OrderCreateRun,
        )
        .await
        .unwrap();
        ledger.set_total(total).await.unwrap();
        ledger
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_append_failure_is_retried() {
        let store = Arc::new(FlakyStore::new(1, false));
        let ledger = open_flaky(&store, 2).await;

        ledger.record_success("sub-1").await.unwrap();
        ledger.record_success("sub-2").await.unwrap();

        let log = store.get(ledger.run_id()).await.unwrap().unwrap();
        assert_eq!(log.successful, 2);
        assert_eq!(log.successful + log.failed, log.total);
        assert!(log.finished_at.is_some());
        assert!(ledger.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_append_leaves_run_open() {
        let store = Arc::new(FlakyStore::new(APPEND_ATTEMPTS as usize, false));
        let ledger = open_flaky(&store, 2).await;

        assert!(matches!(
            ledger.record_success("sub-1").await,
            Err(LedgerError::Store(_))
        ));
        ledger.record_success("sub-2").await.unwrap();

        // Every candidate reported, but the stored counts are short
        assert!(ledger.is_complete());
        assert!(!ledger.is_closed());
        let log = store.get(ledger.run_id()).await.unwrap().unwrap();
        assert_eq!(log.total, 2);
        assert_eq!(log.successful, 1);
        assert!(log.finished_at.is_none());
        assert_eq!(ledger.summary().successful, 1);
    }

    #[tokio::test]
    async fn test_finish_failure_is_surfaced() {
        let store = Arc::new(FlakyStore::new(0, true));
        let ledger = open_flaky(&store, 1).await;

        assert!(matches!(
            ledger.record_failure("sub-1", "User not found").await,
            Err(LedgerError::Store(_))
        ));

        let log = store.get(ledger.run_id()).await.unwrap().unwrap();
        assert_eq!(log.failed, 1);
        assert!(log.finished_at.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_outcomes_close_exactly_once() {
        let store = Arc::new(CountingStore {
            inner: InMemoryRunLedgerStore::new(),
            finishes: AtomicUsize::new(0),
        });
        let ledger = Arc::new(
            RunLedger::open(
                store.clone(),
                ClockSource::new(chrono_tz::UTC),
                RunKind::OrderCreateRun,
            )
            .await
            .unwrap(),
        );
        ledger.set_total(100).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..100 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                let id = format!("sub-{i}");
                if i % 3 == 0 {
                    ledger.record_failure(&id, "Insufficient wallet balance").await
                } else {
                    ledger.record_success(&id).await
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(store.finishes.load(Ordering::SeqCst), 1);
        assert!(ledger.is_complete());

        let log = store.get(ledger.run_id()).await.unwrap().unwrap();
        assert_eq!(log.total, 100);
        assert_eq!(log.successful + log.failed, log.total);
        assert_eq!(log.failed, 34);
        assert!(log.finished_at.is_some());

        let summary = ledger.summary();
        assert_eq!(summary.successful, 66);
        assert_eq!(summary.failed, 34);
    }
}
