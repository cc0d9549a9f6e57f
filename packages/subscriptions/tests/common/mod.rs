#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use subscription_engine::memory::MemoryBackend;
use subscription_engine::{
    BatchOrchestrator, CartLine, ClockSource, EngineConfig, Schedule, Subscription,
    SubscriptionStatus, User,
};

pub fn utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

/// 2026-10-19 05:00 UTC, the status run slot
pub fn morning() -> DateTime<Utc> {
    utc("2026-10-19T05:00:00Z")
}

pub fn days_before(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - Duration::days(days)
}

pub fn subscription(id: &str, user_id: &str, schedule: Schedule, start: DateTime<Utc>) -> Subscription {
    Subscription {
        id: id.to_string(),
        user_id: user_id.to_string(),
        schedule,
        start_date: start,
        end_date: None,
        status: SubscriptionStatus::Active,
        today_status: None,
        today_status_date: None,
        pause_start_date: None,
        pause_end_date: None,
        cart_line: CartLine {
            product_id: "toned-milk-500ml".to_string(),
            unit: "packet".to_string(),
            quantity: 2,
            unit_price: Decimal::from(25),
        },
        delivery_address: None,
    }
}

pub fn user(id: &str, balance: i64) -> User {
    User {
        id: id.to_string(),
        name: None,
        wallet_balance: Decimal::from(balance),
    }
}

pub fn orchestrator_at(backend: &MemoryBackend, now: DateTime<Utc>) -> BatchOrchestrator {
    orchestrator_with(backend, now, EngineConfig::default())
}

pub fn orchestrator_with(
    backend: &MemoryBackend,
    now: DateTime<Utc>,
    config: EngineConfig,
) -> BatchOrchestrator {
    BatchOrchestrator::with_clock(
        config,
        ClockSource::pinned(chrono_tz::UTC, now),
        backend.collaborators(),
    )
}
