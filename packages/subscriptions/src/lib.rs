//! Subscription Engine - scheduled batch processing for recurring subscriptions
//!
//! Two independently triggered runs operate on the subscription book:
//!
//! | Run | Candidates | Effect |
//! |-----|------------|--------|
//! | Status run | every non-cancelled subscription | recomputes today's status (PENDING / INACTIVE) |
//! | Order run | today's status is PENDING | places a wallet-funded order and debits the wallet |
//!
//! Every run is tracked by a [`RunLedger`] which records per-item outcomes and
//! closes the run exactly once, when the last candidate reports.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use subscription_engine::{BatchOrchestrator, EngineConfig, memory::MemoryBackend};
//!
//! let config = EngineConfig::from_env()?;
//! let backend = MemoryBackend::new();
//! let orchestrator = Arc::new(BatchOrchestrator::new(config, backend.collaborators())?);
//!
//! let summary = orchestrator.run_status_job().await?;
//! let summary = orchestrator.run_order_job().await?;
//! ```

mod config;
mod error;
mod traits;
mod types;

pub mod clock;
pub mod ledger;
pub mod memory;
pub mod orchestrator;
pub mod pause;
pub mod schedule;
pub mod workflow;

pub use clock::{ClockReading, ClockSource};
pub use config::EngineConfig;
pub use error::{ConfigError, EngineError, EngineResult, StoreError, StoreResult};
pub use ledger::{RunFailure, RunId, RunKind, RunLedger, RunLedgerStore, RunLog, RunSummary};
pub use orchestrator::BatchOrchestrator;
pub use pause::PauseWindowEvaluator;
pub use schedule::{ScheduleDecision, ScheduleEvaluator};
pub use traits::{
    Collaborators, NotificationSink, OrderStore, SequenceGenerator, SettingsProvider,
    StatusHistoryStore, SubscriptionStore, UserStore,
};
pub use types::{
    CartLine, DeliveryTaxSettings, HistoryStatus, Notification, NotificationKind, Order,
    OrderIntent, PaymentMethod, Schedule, StatusHistoryRecord, Subscription, SubscriptionPatch,
    SubscriptionStatus, TodayStatus, User, WalletAdjustment, WalletDebit, reasons,
};
pub use workflow::{OrderOutcome, OrderPlacementWorkflow};
