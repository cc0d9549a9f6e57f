//! In-memory collaborators
//!
//! Used by tests and by the docker-compose job runner, where there is no
//! database behind the engine. Every store keeps its state behind a lock so
//! it can be shared freely between concurrently running items.

use crate::error::{StoreError, StoreResult};
use crate::ledger::InMemoryRunLedgerStore;
use crate::traits::{
    Collaborators, NotificationSink, OrderStore, SequenceGenerator, SettingsProvider,
    StatusHistoryStore, SubscriptionStore, UserStore,
};
use crate::types::{
    DeliveryTaxSettings, HistoryStatus, Notification, Order, OrderIntent, StatusHistoryRecord,
    Subscription, SubscriptionPatch, SubscriptionStatus, TodayStatus, User, WalletAdjustment,
    WalletDebit,
};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub struct InMemorySettingsProvider {
    settings: RwLock<DeliveryTaxSettings>,
}

impl InMemorySettingsProvider {
    pub fn new(settings: DeliveryTaxSettings) -> Self {
        Self {
            settings: RwLock::new(settings),
        }
    }

    pub fn replace(&self, settings: DeliveryTaxSettings) {
        *self.settings.write() = settings;
    }
}

impl Default for InMemorySettingsProvider {
    fn default() -> Self {
        Self::new(DeliveryTaxSettings {
            tax_name: "GST".to_string(),
            currency_code: "INR".to_string(),
            currency_symbol: "₹".to_string(),
        })
    }
}

#[async_trait::async_trait]
impl SettingsProvider for InMemorySettingsProvider {
    async fn get_delivery_tax_settings(&self) -> StoreResult<DeliveryTaxSettings> {
        Ok(self.settings.read().clone())
    }
}

pub struct InMemorySubscriptionStore {
    subscriptions: Arc<RwLock<HashMap<String, Subscription>>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn insert(&self, subscription: Subscription) {
        self.subscriptions
            .write()
            .insert(subscription.id.clone(), subscription);
    }

    pub fn snapshot(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn filtered(&self, keep: impl Fn(&Subscription) -> bool) -> Vec<Subscription> {
        let mut found: Vec<Subscription> = self
            .subscriptions
            .read()
            .values()
            .filter(|s| keep(s))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }
}

impl Default for InMemorySubscriptionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn find_due_candidates(&self) -> StoreResult<Vec<Subscription>> {
        Ok(self.filtered(|s| s.status != SubscriptionStatus::Cancelled))
    }

    async fn find_pending_order_candidates(&self) -> StoreResult<Vec<Subscription>> {
        Ok(self.filtered(|s| {
            s.today_status == Some(TodayStatus::Pending)
                && matches!(
                    s.status,
                    SubscriptionStatus::Active | SubscriptionStatus::Pause
                )
        }))
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Subscription>> {
        Ok(self.snapshot(id))
    }

    async fn update(&self, id: &str, patch: SubscriptionPatch) -> StoreResult<()> {
        let mut subscriptions = self.subscriptions.write();
        let subscription = subscriptions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        patch.apply(subscription);
        Ok(())
    }
}

pub struct InMemoryUserStore {
    users: DashMap<String, User>,
    debits: Mutex<Vec<WalletDebit>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            debits: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn balance(&self, user_id: &str) -> Option<Decimal> {
        self.users.get(user_id).map(|u| u.wallet_balance)
    }

    /// Every applied wallet adjustment, in order
    pub fn wallet_ledger(&self) -> Vec<WalletDebit> {
        self.debits.lock().clone()
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UserStore for InMemoryUserStore {
    async fn get_user_info(&self, user_id: &str) -> StoreResult<Option<User>> {
        Ok(self.users.get(user_id).map(|u| u.clone()))
    }

    async fn adjust_wallet(&self, debit: &WalletDebit) -> StoreResult<WalletAdjustment> {
        // The entry guard holds the shard lock, making check-and-write atomic
        let mut user = self
            .users
            .get_mut(&debit.user_id)
            .ok_or_else(|| StoreError::NotFound(debit.user_id.clone()))?;

        let balance = user.wallet_balance + debit.delta;
        if balance < Decimal::ZERO {
            return Ok(WalletAdjustment::Rejected);
        }
        user.wallet_balance = balance;
        self.debits.lock().push(debit.clone());

        Ok(WalletAdjustment::Applied { balance })
    }
}

/// Monotonic order numbers, optionally capped to simulate an exhausted sequence
pub struct InMemorySequenceGenerator {
    next: AtomicU64,
    limit: Option<u64>,
}

impl InMemorySequenceGenerator {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            limit: None,
        }
    }

    pub fn with_limit(start: u64, limit: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            limit: Some(limit),
        }
    }
}

impl Default for InMemorySequenceGenerator {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait::async_trait]
impl SequenceGenerator for InMemorySequenceGenerator {
    async fn next(&self) -> StoreResult<Option<u64>> {
        let limit = self.limit.unwrap_or(u64::MAX);
        Ok(self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                n.checked_add(1).filter(|_| n <= limit)
            })
            .ok())
    }
}

pub struct InMemoryOrderStore {
    orders: RwLock<HashMap<String, Order>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self {
            orders: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, order_id: &str) -> Option<Order> {
        self.orders.read().get(order_id).cloned()
    }

    pub fn for_subscription(&self, subscription_id: &str) -> Vec<Order> {
        self.orders
            .read()
            .values()
            .filter(|o| o.intent.subscription_id == subscription_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.orders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_order(&self, order_id: &str, f: impl FnOnce(&mut Order)) -> StoreResult<()> {
        let mut orders = self.orders.write();
        let order = orders
            .get_mut(order_id)
            .ok_or_else(|| StoreError::NotFound(order_id.to_string()))?;
        f(order);
        Ok(())
    }
}

impl Default for InMemoryOrderStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create(&self, intent: OrderIntent) -> StoreResult<Order> {
        let order = Order {
            id: uuid::Uuid::new_v4().to_string(),
            intent,
            status_history_id: None,
            void_reason: None,
        };
        self.orders.write().insert(order.id.clone(), order.clone());
        Ok(order)
    }

    async fn attach_status_history_ref(
        &self,
        order_id: &str,
        status_history_id: &str,
    ) -> StoreResult<()> {
        self.with_order(order_id, |order| {
            order.status_history_id = Some(status_history_id.to_string());
        })
    }

    async fn void(&self, order_id: &str, reason: &str) -> StoreResult<()> {
        self.with_order(order_id, |order| {
            order.void_reason = Some(reason.to_string());
        })
    }
}

pub struct InMemoryStatusHistory {
    records: RwLock<Vec<StatusHistoryRecord>>,
}

impl InMemoryStatusHistory {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(Vec::new()),
        }
    }

    pub fn for_subscription(&self, subscription_id: &str) -> Vec<StatusHistoryRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| r.subscription_id == subscription_id)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryStatusHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl StatusHistoryStore for InMemoryStatusHistory {
    async fn append(
        &self,
        subscription_id: &str,
        status: HistoryStatus,
        description: &str,
    ) -> StoreResult<StatusHistoryRecord> {
        let record = StatusHistoryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: subscription_id.to_string(),
            status,
            description: description.to_string(),
            recorded_at: Utc::now(),
        };
        self.records.write().push(record.clone());
        Ok(record)
    }
}

/// Logs every notification and keeps it for inspection
pub struct RecordingNotificationSink {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

impl Default for RecordingNotificationSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, notification: Notification) {
        tracing::info!(
            kind = ?notification.kind,
            user_id = %notification.user_id,
            subscription_id = %notification.subscription_id,
            "Notification dispatched"
        );
        self.sent.lock().push(notification);
    }
}

/// Initial contents for a [`MemoryBackend`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub settings: Option<DeliveryTaxSettings>,
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub sequence_start: Option<u64>,
}

/// Typed handles to every in-memory collaborator
#[derive(Clone, Default)]
pub struct MemoryBackend {
    pub settings: Arc<InMemorySettingsProvider>,
    pub subscriptions: Arc<InMemorySubscriptionStore>,
    pub users: Arc<InMemoryUserStore>,
    pub sequence: Arc<InMemorySequenceGenerator>,
    pub orders: Arc<InMemoryOrderStore>,
    pub history: Arc<InMemoryStatusHistory>,
    pub notifications: Arc<RecordingNotificationSink>,
    pub ledger: Arc<InMemoryRunLedgerStore>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: Seed) -> Self {
        let backend = Self {
            sequence: Arc::new(
                seed.sequence_start
                    .map(InMemorySequenceGenerator::new)
                    .unwrap_or_default(),
            ),
            ..Self::default()
        };
        if let Some(settings) = seed.settings {
            backend.settings.replace(settings);
        }
        for user in seed.users {
            backend.users.insert(user);
        }
        for subscription in seed.subscriptions {
            backend.subscriptions.insert(subscription);
        }
        backend
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            settings: self.settings.clone(),
            subscriptions: self.subscriptions.clone(),
            users: self.users.clone(),
            sequence: self.sequence.clone(),
            orders: self.orders.clone(),
            history: self.history.clone(),
            notifications: self.notifications.clone(),
            ledger: self.ledger.clone(),
        }
    }
}
