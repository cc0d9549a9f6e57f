//! Due-day evaluation
//!
//! Decides, for one subscription and one instant, what the status run should
//! do with it. The decision is pure; persisting it is the orchestrator's job.

use crate::clock::ClockSource;
use crate::pause::PauseWindowEvaluator;
use crate::types::{Subscription, SubscriptionStatus, TodayStatus, reasons};
use chrono::{DateTime, Utc};

const DAY_MILLIS: i64 = 24 * 60 * 60 * 1000;

/// Outcome of evaluating one subscription against today
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleDecision {
    /// Due today and active (or paused outside its window)
    Pending,
    /// Due today but inside its pause window
    Paused,
    NotStarted,
    Ended,
    Cancelled,
    /// Not a due day for this rule
    RuleMismatch { passed_days: i64 },
    /// Paused with a missing or inverted pause window
    InvalidPauseWindow,
}

impl ScheduleDecision {
    /// Today-status to persist, if any
    pub fn today_status(&self) -> Option<TodayStatus> {
        match self {
            Self::Pending => Some(TodayStatus::Pending),
            Self::Paused => Some(TodayStatus::Inactive),
            _ => None,
        }
    }

    /// Ledger failure reason for decisions that skip the subscription
    pub fn failure_reason(&self) -> Option<&'static str> {
        match self {
            Self::Pending | Self::Paused => None,
            Self::NotStarted => Some(reasons::NOT_STARTED),
            Self::Ended => Some(reasons::ENDED),
            Self::Cancelled => Some(reasons::CANCELLED),
            Self::RuleMismatch { .. } => Some(reasons::RULE_MISMATCH),
            Self::InvalidPauseWindow => Some(reasons::INVALID_PAUSE_WINDOW),
        }
    }
}

/// Whole days elapsed since `start`, rounded up. Zero when `now == start`.
pub fn passed_days(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let millis = (now - start).num_milliseconds().max(0);
    (millis + DAY_MILLIS - 1) / DAY_MILLIS
}

#[derive(Debug, Clone, Copy)]
pub struct ScheduleEvaluator {
    clock: ClockSource,
    pause: PauseWindowEvaluator,
}

impl ScheduleEvaluator {
    pub fn new(clock: ClockSource, pause: PauseWindowEvaluator) -> Self {
        Self { clock, pause }
    }

    pub fn evaluate(&self, subscription: &Subscription, now: DateTime<Utc>) -> ScheduleDecision {
        if subscription.status == SubscriptionStatus::Cancelled {
            return ScheduleDecision::Cancelled;
        }

        if subscription.start_date > now {
            return ScheduleDecision::NotStarted;
        }

        if let Some(end) = subscription.end_date
            && end < self.clock.start_of_day(now)
        {
            return ScheduleDecision::Ended;
        }

        let passed_days = passed_days(subscription.start_date, now);
        if passed_days % subscription.schedule.interval_days() != 0 {
            return ScheduleDecision::RuleMismatch { passed_days };
        }

        match subscription.status {
            SubscriptionStatus::Active => ScheduleDecision::Pending,
            SubscriptionStatus::Pause => {
                match (subscription.pause_start_date, subscription.pause_end_date) {
                    (Some(start), Some(end)) if start <= end => {
                        match self.pause.evaluate(start, end, now) {
                            TodayStatus::Inactive => ScheduleDecision::Paused,
                            _ => ScheduleDecision::Pending,
                        }
                    }
                    _ => ScheduleDecision::InvalidPauseWindow,
                }
            }
            SubscriptionStatus::Cancelled => ScheduleDecision::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CartLine, Schedule};
    use chrono::Duration;
    use rust_decimal::Decimal;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn evaluator() -> ScheduleEvaluator {
        let clock = ClockSource::new(chrono_tz::UTC);
        ScheduleEvaluator::new(clock, PauseWindowEvaluator::new(clock, Duration::minutes(10)))
    }

    fn subscription(schedule: Schedule, start: DateTime<Utc>) -> Subscription {
        Subscription {
            id: "sub-1".to_string(),
            user_id: "user-1".to_string(),
            schedule,
            start_date: start,
            end_date: None,
            status: SubscriptionStatus::Active,
            today_status: None,
            today_status_date: None,
            pause_start_date: None,
            pause_end_date: None,
            cart_line: CartLine {
                product_id: "milk".to_string(),
                unit: "litre".to_string(),
                quantity: 1,
                unit_price: Decimal::from(50),
            },
            delivery_address: None,
        }
    }

    #[test]
    fn test_passed_days_rounds_up() {
        let start = utc("2026-10-01T00:00:00Z");
        assert_eq!(passed_days(start, start), 0);
        assert_eq!(passed_days(start, utc("2026-10-01T00:00:01Z")), 1);
        assert_eq!(passed_days(start, utc("2026-10-02T00:00:00Z")), 1);
        assert_eq!(passed_days(start, utc("2026-10-02T06:00:00Z")), 2);
    }

    #[test]
    fn test_daily_is_always_due() {
        let start = utc("2026-01-01T00:00:00Z");
        let eval = evaluator();
        for offset in 0..45 {
            let now = start + Duration::days(offset) + Duration::hours(5);
            assert_eq!(
                eval.evaluate(&subscription(Schedule::Daily, start), now),
                ScheduleDecision::Pending
            );
        }
    }

    #[test]
    fn test_interval_rules_follow_modulus() {
        let start = utc("2026-01-01T00:00:00Z");
        let eval = evaluator();
        for schedule in [
            Schedule::Alternate,
            Schedule::Every3Day,
            Schedule::Weekly,
            Schedule::Monthly,
        ] {
            for days in 0..=90 {
                let now = start + Duration::days(days);
                let decision = eval.evaluate(&subscription(schedule, start), now);
                if days % schedule.interval_days() == 0 {
                    assert_eq!(decision, ScheduleDecision::Pending, "{schedule} day {days}");
                } else {
                    assert_eq!(
                        decision,
                        ScheduleDecision::RuleMismatch { passed_days: days },
                        "{schedule} day {days}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_weekly_three_days_in_is_mismatch() {
        let now = utc("2026-10-19T05:00:00Z");
        let start = now - Duration::days(3);
        let decision = evaluator().evaluate(&subscription(Schedule::Weekly, start), now);
        assert!(matches!(decision, ScheduleDecision::RuleMismatch { .. }));
        assert_eq!(decision.failure_reason(), Some(reasons::RULE_MISMATCH));
        assert_eq!(decision.today_status(), None);
    }

    #[test]
    fn test_future_start_is_not_started() {
        let now = utc("2026-10-19T05:00:00Z");
        let decision = evaluator().evaluate(
            &subscription(Schedule::Daily, now + Duration::days(2)),
            now,
        );
        assert_eq!(decision, ScheduleDecision::NotStarted);
        assert_eq!(decision.failure_reason(), Some(reasons::NOT_STARTED));
    }

    #[test]
    fn test_past_end_date_is_ended() {
        let now = utc("2026-10-19T05:00:00Z");
        let mut sub = subscription(Schedule::Daily, now - Duration::days(10));
        sub.end_date = Some(utc("2026-10-18T12:00:00Z"));
        assert_eq!(evaluator().evaluate(&sub, now), ScheduleDecision::Ended);

        // Ending later today still delivers today
        sub.end_date = Some(utc("2026-10-19T01:00:00Z"));
        assert_eq!(evaluator().evaluate(&sub, now), ScheduleDecision::Pending);
    }

    #[test]
    fn test_paused_inside_window_is_inactive() {
        let now = utc("2026-10-19T05:00:00Z");
        let mut sub = subscription(Schedule::Daily, now - Duration::days(10));
        sub.status = SubscriptionStatus::Pause;
        sub.pause_start_date = Some(utc("2026-10-18T00:00:00Z"));
        sub.pause_end_date = Some(utc("2026-10-20T00:00:00Z"));

        let decision = evaluator().evaluate(&sub, now);
        assert_eq!(decision, ScheduleDecision::Paused);
        assert_eq!(decision.today_status(), Some(TodayStatus::Inactive));
    }

    #[test]
    fn test_paused_outside_window_is_pending() {
        let now = utc("2026-10-19T05:00:00Z");
        let mut sub = subscription(Schedule::Daily, now - Duration::days(10));
        sub.status = SubscriptionStatus::Pause;
        sub.pause_start_date = Some(utc("2026-10-21T00:00:00Z"));
        sub.pause_end_date = Some(utc("2026-10-25T00:00:00Z"));

        assert_eq!(evaluator().evaluate(&sub, now), ScheduleDecision::Pending);
    }

    #[test]
    fn test_pause_is_only_consulted_on_due_days() {
        let now = utc("2026-10-19T05:00:00Z");
        let mut sub = subscription(Schedule::Weekly, now - Duration::days(3));
        sub.status = SubscriptionStatus::Pause;
        sub.pause_start_date = Some(utc("2026-10-18T00:00:00Z"));
        sub.pause_end_date = Some(utc("2026-10-20T00:00:00Z"));

        assert!(matches!(
            evaluator().evaluate(&sub, now),
            ScheduleDecision::RuleMismatch { .. }
        ));
    }

    #[test]
    fn test_malformed_pause_window() {
        let now = utc("2026-10-19T05:00:00Z");
        let mut sub = subscription(Schedule::Daily, now - Duration::days(10));
        sub.status = SubscriptionStatus::Pause;
        assert_eq!(
            evaluator().evaluate(&sub, now),
            ScheduleDecision::InvalidPauseWindow
        );

        sub.pause_start_date = Some(utc("2026-10-20T00:00:00Z"));
        sub.pause_end_date = Some(utc("2026-10-18T00:00:00Z"));
        assert_eq!(
            evaluator().evaluate(&sub, now),
            ScheduleDecision::InvalidPauseWindow
        );
    }
}
