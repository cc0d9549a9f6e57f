//! Pause window evaluation
//!
//! A paused subscription is INACTIVE on a day when that day's comparison point
//! falls inside the window `[midnight(pause_start), pause_end]`. The comparison
//! point is local midnight plus a fixed offset (ten minutes unless configured),
//! so a reference taken at any time of day maps to the same point.

use crate::clock::ClockSource;
use crate::types::TodayStatus;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy)]
pub struct PauseWindowEvaluator {
    clock: ClockSource,
    reference_offset: Duration,
}

impl PauseWindowEvaluator {
    pub fn new(clock: ClockSource, reference_offset: Duration) -> Self {
        Self {
            clock,
            reference_offset,
        }
    }

    /// The instant a reference day is compared at
    pub fn reference_point(&self, reference: DateTime<Utc>) -> DateTime<Utc> {
        self.clock.start_of_day(reference) + self.reference_offset
    }

    pub fn is_paused(
        &self,
        pause_start: DateTime<Utc>,
        pause_end: DateTime<Utc>,
        reference: DateTime<Utc>,
    ) -> bool {
        let window_start = self.clock.start_of_day(pause_start);
        let point = self.reference_point(reference);
        window_start <= point && point <= pause_end
    }

    pub fn evaluate(
        &self,
        pause_start: DateTime<Utc>,
        pause_end: DateTime<Utc>,
        reference: DateTime<Utc>,
    ) -> TodayStatus {
        if self.is_paused(pause_start, pause_end, reference) {
            TodayStatus::Inactive
        } else {
            TodayStatus::Pending
        }
    }
}
