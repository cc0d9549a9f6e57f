//! Order placement
//!
//! Converts one PENDING subscription into a wallet-funded order:
//! user lookup -> balance check -> order persist -> wallet debit -> status persist.
//!
//! The writes after the order is persisted go to different collaborators and
//! are not wrapped in a transaction. The order and the wallet ledger entry are
//! the source of truth; a missing history record, status update or
//! notification is logged and tolerated.

use crate::clock::ClockSource;
use crate::error::StoreResult;
use crate::traits::Collaborators;
use crate::types::{
    DeliveryTaxSettings, HistoryStatus, Notification, NotificationKind, OrderIntent,
    PaymentMethod, Subscription, SubscriptionPatch, TodayStatus, User, WalletAdjustment,
    WalletDebit, reasons,
};
use rand::Rng;
use rust_decimal::Decimal;

const FALLBACK_ORDER_NUMBER_MIN: u64 = 100_000;
const FALLBACK_ORDER_NUMBER_MAX: u64 = 999_999;

/// What happened to one settlement attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderOutcome {
    Placed {
        order_id: String,
        order_number: u64,
        sequence_degraded: bool,
    },
    InsufficientFunds,
    UserNotFound,
    PersistenceFailure,
}

impl OrderOutcome {
    pub fn is_placed(&self) -> bool {
        matches!(self, Self::Placed { .. })
    }

    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            Self::Placed { .. } => None,
            Self::InsufficientFunds => Some(reasons::INSUFFICIENT_BALANCE),
            Self::UserNotFound => Some(reasons::USER_NOT_FOUND),
            Self::PersistenceFailure => Some(reasons::ORDER_NOT_PLACED),
        }
    }
}

pub struct OrderPlacementWorkflow {
    collaborators: Collaborators,
    clock: ClockSource,
}

impl OrderPlacementWorkflow {
    pub fn new(collaborators: Collaborators, clock: ClockSource) -> Self {
        Self {
            collaborators,
            clock,
        }
    }

    /// Attempt to settle one subscription.
    ///
    /// Expected failures come back as an [`OrderOutcome`]; `Err` is reserved
    /// for collaborator errors the caller should treat as unexpected.
    pub async fn attempt(
        &self,
        subscription: &Subscription,
        settings: &DeliveryTaxSettings,
    ) -> StoreResult<OrderOutcome> {
        let Some(user) = self
            .collaborators
            .users
            .get_user_info(&subscription.user_id)
            .await?
        else {
            tracing::warn!(
                subscription_id = %subscription.id,
                user_id = %subscription.user_id,
                "User not found"
            );
            return Ok(OrderOutcome::UserNotFound);
        };

        let amount = subscription.cart_line.total();
        if user.wallet_balance < amount {
            self.insufficient_balance(subscription, &user, amount).await;
            return Ok(OrderOutcome::InsufficientFunds);
        }

        let intent = self.build_intent(subscription, settings, amount).await;
        let order_number = intent.order_number;
        let sequence_degraded = intent.sequence_degraded;

        let order = match self.collaborators.orders.create(intent).await {
            Ok(order) => order,
            Err(e) => {
                tracing::error!(
                    subscription_id = %subscription.id,
                    order_number,
                    error = %e,
                    "Unable to place order"
                );
                return Ok(OrderOutcome::PersistenceFailure);
            }
        };

        let debit = WalletDebit::for_order(&user.id, &order.id, amount);
        let adjustment = match self.collaborators.users.adjust_wallet(&debit).await {
            Ok(adjustment) => adjustment,
            Err(e) => {
                // Outcome of the debit is unknown; leave the order for reconciliation
                tracing::error!(
                    subscription_id = %subscription.id,
                    order_id = %order.id,
                    error = %e,
                    "Wallet debit failed after order was persisted"
                );
                return Err(e);
            }
        };
        match adjustment {
            WalletAdjustment::Applied { balance } => {
                tracing::debug!(
                    user_id = %user.id,
                    order_id = %order.id,
                    %balance,
                    "Wallet debited"
                );
            }
            WalletAdjustment::Rejected => {
                // Balance was drained between the check and the debit
                if let Err(e) = self
                    .collaborators
                    .orders
                    .void(&order.id, reasons::INSUFFICIENT_BALANCE)
                    .await
                {
                    tracing::error!(order_id = %order.id, error = %e, "Failed to void unpaid order");
                }
                self.insufficient_balance(subscription, &user, amount).await;
                return Ok(OrderOutcome::InsufficientFunds);
            }
        }

        self.complete(subscription, &user, &order.id, order_number, amount)
            .await;

        tracing::info!(
            subscription_id = %subscription.id,
            order_id = %order.id,
            order_number,
            sequence_degraded,
            "Order placed"
        );

        Ok(OrderOutcome::Placed {
            order_id: order.id,
            order_number,
            sequence_degraded,
        })
    }

    async fn build_intent(
        &self,
        subscription: &Subscription,
        settings: &DeliveryTaxSettings,
        amount: Decimal,
    ) -> OrderIntent {
        let (order_number, sequence_degraded) = self.next_order_number(&subscription.id).await;

        OrderIntent {
            subscription_id: subscription.id.clone(),
            user_id: subscription.user_id.clone(),
            order_number,
            sequence_degraded,
            delivery_address: subscription.delivery_address.clone(),
            cart_line: subscription.cart_line.clone(),
            settings: settings.clone(),
            subtotal: amount,
            tax: Decimal::ZERO,
            // Fully covered by the wallet
            grand_total: Decimal::ZERO,
            wallet_amount: amount,
            payment_method: PaymentMethod::Wallet,
            transaction_id: uuid::Uuid::new_v4().to_string(),
            placed_at: self.clock.now().timestamp,
        }
    }

    /// Sequence number, or a random six digit number flagged as degraded
    async fn next_order_number(&self, subscription_id: &str) -> (u64, bool) {
        match self.collaborators.sequence.next().await {
            Ok(Some(number)) => return (number, false),
            Ok(None) => {
                tracing::warn!(subscription_id, "Order sequence exhausted");
            }
            Err(e) => {
                tracing::warn!(subscription_id, error = %e, "Order sequence unavailable");
            }
        }

        let number = rand::rng().random_range(FALLBACK_ORDER_NUMBER_MIN..=FALLBACK_ORDER_NUMBER_MAX);
        tracing::warn!(
            subscription_id,
            order_number = number,
            "Using non-unique fallback order number"
        );
        (number, true)
    }

    async fn insufficient_balance(&self, subscription: &Subscription, user: &User, amount: Decimal) {
        tracing::warn!(
            subscription_id = %subscription.id,
            user_id = %user.id,
            balance = %user.wallet_balance,
            %amount,
            "Insufficient wallet balance"
        );

        if let Err(e) = self
            .collaborators
            .history
            .append(
                &subscription.id,
                HistoryStatus::Failed,
                "Order failed - insufficient balance",
            )
            .await
        {
            tracing::error!(subscription_id = %subscription.id, error = %e, "Failed to record status history");
        }

        self.collaborators
            .notifications
            .notify(Notification {
                kind: NotificationKind::InsufficientBalance,
                user_id: user.id.clone(),
                subscription_id: subscription.id.clone(),
                payload: serde_json::json!({
                    "amount": amount,
                    "balance": user.wallet_balance,
                }),
            })
            .await;
    }

    async fn complete(
        &self,
        subscription: &Subscription,
        user: &User,
        order_id: &str,
        order_number: u64,
        amount: Decimal,
    ) {
        let history = match self
            .collaborators
            .history
            .append(
                &subscription.id,
                HistoryStatus::Completed,
                "Order created successfully",
            )
            .await
        {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::error!(subscription_id = %subscription.id, error = %e, "Failed to record status history");
                None
            }
        };

        let today = self.clock.now().date();
        if let Err(e) = self
            .collaborators
            .subscriptions
            .update(
                &subscription.id,
                SubscriptionPatch::today(TodayStatus::Completed, today),
            )
            .await
        {
            tracing::error!(
                subscription_id = %subscription.id,
                order_id,
                error = %e,
                "Order placed but subscription status not updated"
            );
        }

        self.collaborators
            .notifications
            .notify(Notification {
                kind: NotificationKind::OrderPlaced,
                user_id: user.id.clone(),
                subscription_id: subscription.id.clone(),
                payload: serde_json::json!({
                    "order_id": order_id,
                    "order_number": order_number,
                    "amount": amount,
                }),
            })
            .await;

        if let Some(record) = history
            && let Err(e) = self
                .collaborators
                .orders
                .attach_status_history_ref(order_id, &record.id)
                .await
        {
            tracing::warn!(order_id, error = %e, "Failed to link status history to order");
        }
    }
}
