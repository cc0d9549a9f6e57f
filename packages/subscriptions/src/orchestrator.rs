//! Batch orchestrator
//!
//! Drives the two daily runs. Each run fetches its candidate set, fixes the
//! ledger total, then processes items with bounded concurrency. Every
//! candidate reports exactly one outcome; item errors never abort siblings.
//!
//! Items for the same subscription are serialized through a per-id lock, so a
//! manual rerun overlapping the scheduled run cannot settle a subscription twice.

use crate::clock::{ClockReading, ClockSource};
use crate::config::EngineConfig;
use crate::error::{ConfigError, EngineError, EngineResult};
use crate::ledger::{LedgerResult, RunKind, RunLedger, RunSummary};
use crate::pause::PauseWindowEvaluator;
use crate::schedule::{ScheduleDecision, ScheduleEvaluator};
use crate::traits::Collaborators;
use crate::types::{
    DeliveryTaxSettings, HistoryStatus, Subscription, SubscriptionPatch, SubscriptionStatus,
    TodayStatus, reasons,
};
use crate::workflow::OrderPlacementWorkflow;
use dashmap::DashMap;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

enum ItemOutcome {
    Success,
    Failure(String),
}

pub struct BatchOrchestrator {
    config: EngineConfig,
    clock: ClockSource,
    collaborators: Collaborators,
    schedule: ScheduleEvaluator,
    workflow: OrderPlacementWorkflow,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BatchOrchestrator {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Result<Self, ConfigError> {
        config.validate()?;
        let clock = config.clock()?;
        Ok(Self::with_clock(config, clock, collaborators))
    }

    /// Use an explicit clock, e.g. one pinned to the day being rerun
    pub fn with_clock(config: EngineConfig, clock: ClockSource, collaborators: Collaborators) -> Self {
        let pause = PauseWindowEvaluator::new(clock, config.pause_reference_offset());
        Self {
            schedule: ScheduleEvaluator::new(clock, pause),
            workflow: OrderPlacementWorkflow::new(collaborators.clone(), clock),
            config,
            clock,
            collaborators,
            locks: DashMap::new(),
        }
    }

    pub fn clock(&self) -> ClockSource {
        self.clock
    }

    /// Recompute today's status for every subscription not yet evaluated today
    pub async fn run_status_job(&self) -> EngineResult<RunSummary> {
        let ledger = self.open(RunKind::SubscriptionStatusRun).await?;
        let now = self.clock.now();
        let today = now.date();

        let candidates = self
            .collaborators
            .subscriptions
            .find_due_candidates()
            .await
            .map_err(|e| {
                tracing::error!(run_id = %ledger.run_id(), error = %e, "Status run aborted: candidates unavailable");
                EngineError::CandidateFetch(e)
            })?;

        let (candidates, evaluated): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .filter(|s| s.status != SubscriptionStatus::Cancelled)
            .partition(|s| s.today_status_date != Some(today));
        if !evaluated.is_empty() {
            tracing::debug!(
                run_id = %ledger.run_id(),
                skipped = evaluated.len(),
                "Skipping subscriptions already evaluated today"
            );
        }

        ledger.set_total(candidates.len()).await?;
        self.process_all(&ledger, candidates, |subscription| {
            self.evaluate_one(subscription, now)
        })
        .await?;

        Ok(ledger.summary())
    }

    /// Place wallet-funded orders for every subscription pending today
    pub async fn run_order_job(&self) -> EngineResult<RunSummary> {
        let ledger = self.open(RunKind::OrderCreateRun).await?;

        let candidates: Vec<Subscription> = self
            .collaborators
            .subscriptions
            .find_pending_order_candidates()
            .await
            .map_err(|e| {
                tracing::error!(run_id = %ledger.run_id(), error = %e, "Order run aborted: candidates unavailable");
                EngineError::CandidateFetch(e)
            })?
            .into_iter()
            .filter(|s| {
                s.today_status == Some(TodayStatus::Pending)
                    && matches!(
                        s.status,
                        SubscriptionStatus::Active | SubscriptionStatus::Pause
                    )
            })
            .collect();

        if candidates.is_empty() {
            ledger.set_total(0).await?;
            return Ok(ledger.summary());
        }

        let settings = self
            .collaborators
            .settings
            .get_delivery_tax_settings()
            .await
            .map_err(|e| {
                tracing::error!(run_id = %ledger.run_id(), error = %e, "Order run aborted: settings unavailable");
                EngineError::Settings(e)
            })?;

        ledger.set_total(candidates.len()).await?;
        self.process_all(&ledger, candidates, |subscription| {
            self.settle_one(subscription, &settings)
        })
        .await?;

        Ok(ledger.summary())
    }

    async fn open(&self, kind: RunKind) -> EngineResult<RunLedger> {
        Ok(RunLedger::open(self.collaborators.ledger.clone(), self.clock, kind).await?)
    }

    /// Every item is processed even if the ledger rejects an outcome; the first
    /// ledger error is returned once the batch has drained.
    async fn process_all<F, Fut>(
        &self,
        ledger: &RunLedger,
        candidates: Vec<Subscription>,
        process: F,
    ) -> LedgerResult<()>
    where
        F: Fn(Subscription) -> Fut,
        Fut: Future<Output = ItemOutcome>,
    {
        let timeout = self.config.item_timeout();

        futures::stream::iter(candidates)
            .map(|subscription| {
                let id = subscription.id.clone();
                let lock = self.lock_for(&id);
                let work = process(subscription);
                async move {
                    let outcome = match tokio::time::timeout(timeout, async {
                        let _guard = lock.lock().await;
                        work.await
                    })
                    .await
                    {
                        Ok(outcome) => outcome,
                        Err(_) => {
                            tracing::error!(
                                run_id = %ledger.run_id(),
                                subscription_id = %id,
                                timeout_secs = timeout.as_secs(),
                                "Abandoned stuck subscription"
                            );
                            ItemOutcome::Failure(reasons::TIMEOUT.to_string())
                        }
                    };
                    drop(lock);
                    self.release_lock(&id);
                    self.record(ledger, &id, outcome).await
                }
            })
            .buffer_unordered(self.config.worker_concurrency.max(1))
            .fold(Ok(()), |first, recorded| async move { first.and(recorded) })
            .await
    }

    async fn record(&self, ledger: &RunLedger, id: &str, outcome: ItemOutcome) -> LedgerResult<()> {
        let recorded = match outcome {
            ItemOutcome::Success => ledger.record_success(id).await,
            ItemOutcome::Failure(reason) => ledger.record_failure(id, &reason).await,
        };
        if let Err(e) = &recorded {
            tracing::error!(
                run_id = %ledger.run_id(),
                subscription_id = %id,
                error = %e,
                "Failed to record outcome"
            );
        }
        recorded
    }

    fn lock_for(&self, id: &str) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(id.to_string()).or_default())
    }

    /// Forget the lock once no other item for this id holds or waits on it
    fn release_lock(&self, id: &str) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn evaluate_one(&self, subscription: Subscription, now: ClockReading) -> ItemOutcome {
        let decision = self.schedule.evaluate(&subscription, now.timestamp);

        let Some(status) = decision.today_status() else {
            let reason = decision.failure_reason().unwrap_or(reasons::RULE_MISMATCH);
            if decision == ScheduleDecision::InvalidPauseWindow {
                tracing::error!(
                    subscription_id = %subscription.id,
                    pause_start = ?subscription.pause_start_date,
                    pause_end = ?subscription.pause_end_date,
                    "Paused subscription has an invalid pause window"
                );
            } else {
                tracing::debug!(subscription_id = %subscription.id, ?decision, "Not due today");
            }
            return ItemOutcome::Failure(reason.to_string());
        };

        if let Err(e) = self
            .collaborators
            .subscriptions
            .update(&subscription.id, SubscriptionPatch::today(status, now.date()))
            .await
        {
            tracing::error!(subscription_id = %subscription.id, error = %e, "Failed to persist today status");
            return ItemOutcome::Failure(format!("Unable to update subscription: {e}"));
        }

        if decision == ScheduleDecision::Paused
            && let Err(e) = self
                .collaborators
                .history
                .append(&subscription.id, HistoryStatus::Inactive, "Paused by user")
                .await
        {
            tracing::warn!(subscription_id = %subscription.id, error = %e, "Failed to record pause in status history");
        }

        tracing::debug!(subscription_id = %subscription.id, ?status, "Today status updated");
        ItemOutcome::Success
    }

    async fn settle_one(
        &self,
        subscription: Subscription,
        settings: &DeliveryTaxSettings,
    ) -> ItemOutcome {
        // Re-read under the lock: an overlapping run may have settled it already
        let current = match self.collaborators.subscriptions.get(&subscription.id).await {
            Ok(Some(current)) => current,
            Ok(None) => return ItemOutcome::Failure(reasons::SUBSCRIPTION_NOT_FOUND.to_string()),
            Err(e) => {
                tracing::error!(subscription_id = %subscription.id, error = %e, "Failed to reload subscription");
                return ItemOutcome::Failure(e.to_string());
            }
        };
        if current.status == SubscriptionStatus::Cancelled {
            return ItemOutcome::Failure(reasons::CANCELLED.to_string());
        }
        if current.today_status != Some(TodayStatus::Pending) {
            return ItemOutcome::Failure(reasons::ALREADY_PROCESSED.to_string());
        }

        match self.workflow.attempt(&current, settings).await {
            Ok(outcome) => match outcome.failure_reason() {
                None => ItemOutcome::Success,
                Some(reason) => ItemOutcome::Failure(reason.to_string()),
            },
            Err(e) => {
                tracing::error!(subscription_id = %current.id, error = %e, "Order placement failed unexpectedly");
                ItemOutcome::Failure(e.to_string())
            }
        }
    }
}
