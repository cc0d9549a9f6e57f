use crate::config::JobsConfig;
use chrono_tz::Tz;
use std::sync::Arc;
use subscription_engine::{BatchOrchestrator, EngineResult, RunKind, RunSummary};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};
use uuid::Uuid;

pub struct JobRunner {
    orchestrator: Arc<BatchOrchestrator>,
    scheduler: JobScheduler,
}

impl JobRunner {
    pub async fn new(orchestrator: Arc<BatchOrchestrator>) -> Result<Self, CronError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| CronError::Scheduler(e.to_string()))?;

        Ok(Self {
            orchestrator,
            scheduler,
        })
    }

    /// Register both daily runs. Expressions are evaluated in the engine timezone.
    pub async fn register(&self, config: &JobsConfig) -> Result<(), CronError> {
        let tz = self.orchestrator.clock().timezone();

        let status_id = self
            .add_job(RunKind::SubscriptionStatusRun, &config.status_run_cron, tz)
            .await?;
        info!(job_id = %status_id, cron = %config.status_run_cron, %tz, "Scheduled status run");

        let order_id = self
            .add_job(RunKind::OrderCreateRun, &config.order_run_cron, tz)
            .await?;
        info!(job_id = %order_id, cron = %config.order_run_cron, %tz, "Scheduled order run");

        Ok(())
    }

    pub async fn start(&self) -> Result<(), CronError> {
        self.scheduler
            .start()
            .await
            .map_err(|e| CronError::Scheduler(e.to_string()))?;

        info!("Job scheduler started");
        Ok(())
    }

    pub async fn shutdown(mut self) -> Result<(), CronError> {
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| CronError::Scheduler(e.to_string()))
    }

    /// Run both jobs back to back, outside the schedule
    pub async fn run_now(&self) {
        run_and_log(&self.orchestrator, RunKind::SubscriptionStatusRun).await;
        run_and_log(&self.orchestrator, RunKind::OrderCreateRun).await;
    }

    async fn add_job(&self, kind: RunKind, expression: &str, tz: Tz) -> Result<Uuid, CronError> {
        let orchestrator = Arc::clone(&self.orchestrator);

        let job = Job::new_async_tz(expression, tz, move |_uuid, _lock| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                run_and_log(&orchestrator, kind).await;
            })
        })
        .map_err(|e| CronError::Job(format!("{kind}: {e}")))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| CronError::Scheduler(e.to_string()))
    }
}

async fn run_and_log(orchestrator: &BatchOrchestrator, kind: RunKind) {
    info!(%kind, "Triggering run");

    let result: EngineResult<RunSummary> = match kind {
        RunKind::SubscriptionStatusRun => orchestrator.run_status_job().await,
        RunKind::OrderCreateRun => orchestrator.run_order_job().await,
    };

    match result {
        Ok(summary) => info!(
            run_id = %summary.run_id,
            %kind,
            total = summary.total,
            successful = summary.successful,
            failed = summary.failed,
            "Run finished"
        ),
        Err(e) => error!(%kind, error = %e, "Run aborted"),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("Scheduler error: {0}")]
    Scheduler(String),
    #[error("Job error: {0}")]
    Job(String),
}
