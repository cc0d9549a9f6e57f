//! Collaborator trait definitions
//!
//! The engine owns no persistence. Subscriptions, users, orders and history
//! live behind these narrow interfaces; [`crate::memory`] has in-process
//! implementations of every one of them.

use crate::error::StoreResult;
use crate::ledger::RunLedgerStore;
use crate::types::{
    DeliveryTaxSettings, HistoryStatus, Notification, Order, OrderIntent, StatusHistoryRecord,
    Subscription, SubscriptionPatch, User, WalletAdjustment, WalletDebit,
};
use std::sync::Arc;

#[async_trait::async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn get_delivery_tax_settings(&self) -> StoreResult<DeliveryTaxSettings>;
}

#[async_trait::async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Every subscription that is not cancelled
    async fn find_due_candidates(&self) -> StoreResult<Vec<Subscription>>;

    /// Subscriptions whose today-status is PENDING and status is ACTIVE or PAUSE
    async fn find_pending_order_candidates(&self) -> StoreResult<Vec<Subscription>>;

    async fn get(&self, id: &str) -> StoreResult<Option<Subscription>>;

    async fn update(&self, id: &str, patch: SubscriptionPatch) -> StoreResult<()>;
}

#[async_trait::async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user_info(&self, user_id: &str) -> StoreResult<Option<User>>;

    /// Apply a wallet delta atomically.
    ///
    /// A debit that would take the balance below zero must be rejected without
    /// writing anything; callers rely on this instead of reading then writing.
    async fn adjust_wallet(&self, debit: &WalletDebit) -> StoreResult<WalletAdjustment>;
}

#[async_trait::async_trait]
pub trait SequenceGenerator: Send + Sync {
    /// Next order number, `None` when the sequence is unavailable
    async fn next(&self) -> StoreResult<Option<u64>>;
}

#[async_trait::async_trait]
pub trait OrderStore: Send + Sync {
    async fn create(&self, intent: OrderIntent) -> StoreResult<Order>;

    async fn attach_status_history_ref(
        &self,
        order_id: &str,
        status_history_id: &str,
    ) -> StoreResult<()>;

    /// Mark an order as never paid for
    async fn void(&self, order_id: &str, reason: &str) -> StoreResult<()>;
}

#[async_trait::async_trait]
pub trait StatusHistoryStore: Send + Sync {
    async fn append(
        &self,
        subscription_id: &str,
        status: HistoryStatus,
        description: &str,
    ) -> StoreResult<StatusHistoryRecord>;
}

/// Fire-and-forget delivery. Sinks log their own failures.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Every collaborator the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub settings: Arc<dyn SettingsProvider>,
    pub subscriptions: Arc<dyn SubscriptionStore>,
    pub users: Arc<dyn UserStore>,
    pub sequence: Arc<dyn SequenceGenerator>,
    pub orders: Arc<dyn OrderStore>,
    pub history: Arc<dyn StatusHistoryStore>,
    pub notifications: Arc<dyn NotificationSink>,
    pub ledger: Arc<dyn RunLedgerStore>,
}
