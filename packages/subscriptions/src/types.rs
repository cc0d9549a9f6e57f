//! Subscription, wallet and order types

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Recurrence rule of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Schedule {
    Daily,
    Alternate,
    #[serde(rename = "EVERY_3_DAY")]
    Every3Day,
    Weekly,
    /// Fixed 30 day cycle, not calendar months
    Monthly,
}

impl Schedule {
    /// Length of one delivery cycle in days
    pub fn interval_days(&self) -> i64 {
        match self {
            Self::Daily => 1,
            Self::Alternate => 2,
            Self::Every3Day => 3,
            Self::Weekly => 7,
            Self::Monthly => 30,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "DAILY",
            Self::Alternate => "ALTERNATE",
            Self::Every3Day => "EVERY_3_DAY",
            Self::Weekly => "WEEKLY",
            Self::Monthly => "MONTHLY",
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User-controlled lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Pause,
    Cancelled,
}

/// Derived per-day status, recomputed by the status run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TodayStatus {
    Pending,
    Inactive,
    Completed,
    Failed,
}

/// The single product line a subscription delivers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub unit: String,
    pub quantity: u32,
    /// Per-unit subscription price
    pub unit_price: Decimal,
}

impl CartLine {
    pub fn total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub user_id: String,
    pub schedule: Schedule,
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    pub status: SubscriptionStatus,
    #[serde(default)]
    pub today_status: Option<TodayStatus>,
    /// Local calendar date on which `today_status` was last written
    #[serde(default)]
    pub today_status_date: Option<NaiveDate>,
    #[serde(default)]
    pub pause_start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pause_end_date: Option<DateTime<Utc>>,
    pub cart_line: CartLine,
    /// Address snapshot owned by the address service, copied onto orders as-is
    #[serde(default)]
    pub delivery_address: Option<serde_json::Value>,
}

/// Partial update applied through [`crate::SubscriptionStore::update`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionPatch {
    pub today_status: Option<TodayStatus>,
    pub today_status_date: Option<NaiveDate>,
}

impl SubscriptionPatch {
    pub fn today(status: TodayStatus, date: NaiveDate) -> Self {
        Self {
            today_status: Some(status),
            today_status_date: Some(date),
        }
    }

    pub fn apply(&self, subscription: &mut Subscription) {
        if let Some(status) = self.today_status {
            subscription.today_status = Some(status);
        }
        if let Some(date) = self.today_status_date {
            subscription.today_status_date = Some(date);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub wallet_balance: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTaxSettings {
    pub tax_name: String,
    pub currency_code: String,
    pub currency_symbol: String,
}

/// A signed amount applied to one user's wallet, attributable to one order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletDebit {
    pub user_id: String,
    pub order_id: String,
    /// Negative for a debit
    pub delta: Decimal,
}

impl WalletDebit {
    pub fn for_order(user_id: &str, order_id: &str, amount: Decimal) -> Self {
        Self {
            user_id: user_id.to_string(),
            order_id: order_id.to_string(),
            delta: -amount,
        }
    }
}

/// Result of a conditional wallet adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletAdjustment {
    Applied { balance: Decimal },
    /// The balance would have gone negative; nothing was written
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Wallet,
}

/// Order payload built for one subscription, the input to order creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub subscription_id: String,
    pub user_id: String,
    pub order_number: u64,
    /// Order number came from the random fallback and may collide
    pub sequence_degraded: bool,
    pub delivery_address: Option<serde_json::Value>,
    pub cart_line: CartLine,
    pub settings: DeliveryTaxSettings,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub grand_total: Decimal,
    pub wallet_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub transaction_id: String,
    pub placed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub intent: OrderIntent,
    #[serde(default)]
    pub status_history_id: Option<String>,
    /// Set when the order was voided after a failed wallet debit
    #[serde(default)]
    pub void_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryStatus {
    Inactive,
    Failed,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusHistoryRecord {
    pub id: String,
    pub subscription_id: String,
    pub status: HistoryStatus,
    pub description: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    OrderPlaced,
    InsufficientBalance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub user_id: String,
    pub subscription_id: String,
    pub payload: serde_json::Value,
}

/// Failure reasons written to the run ledger
pub mod reasons {
    pub const USER_NOT_FOUND: &str = "User not found";
    pub const INSUFFICIENT_BALANCE: &str = "Insufficient wallet balance";
    pub const ORDER_NOT_PLACED: &str = "Unable to place order";
    pub const RULE_MISMATCH: &str = "Skipped - schedule rule mismatch";
    pub const NOT_STARTED: &str = "Subscription not started yet";
    pub const ENDED: &str = "Subscription ended";
    pub const CANCELLED: &str = "Subscription cancelled";
    pub const INVALID_PAUSE_WINDOW: &str = "Invalid pause window";
    pub const ALREADY_PROCESSED: &str = "Already processed";
    pub const SUBSCRIPTION_NOT_FOUND: &str = "Subscription not found";
    pub const TIMEOUT: &str = "timeout";
}
