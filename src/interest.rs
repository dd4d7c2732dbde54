use chrono::{DateTime, Utc};

use crate::decimal::{Money, Rate};
use crate::state::{SubLoanInception, SubLoanState};
use crate::types::GracePeriodStatus;

const SECONDS_PER_DAY: i64 = 86_400;

/// engine compounding sub-loan interest by whole elapsed days
///
/// invoked as the first step of every state-mutating operation, targeting
/// the operation's own timestamp: past-dated operations accrue only up to
/// their own date, and a later operation re-accrues from there
#[derive(Debug, Clone, Copy)]
pub struct AccrualEngine {
    day_boundary_offset_secs: i64,
}

impl AccrualEngine {
    pub fn new(day_boundary_offset_secs: i64) -> Self {
        Self {
            day_boundary_offset_secs,
        }
    }

    /// day index of a timestamp, with the day boundary shifted off UTC
    /// midnight by the configured offset
    pub fn day_index(&self, timestamp: DateTime<Utc>) -> i64 {
        (timestamp.timestamp() - self.day_boundary_offset_secs).div_euclid(SECONDS_PER_DAY)
    }

    /// the day on which the sub-loan falls due under its current duration
    pub fn due_day(&self, inception: &SubLoanInception, state: &SubLoanState) -> i64 {
        self.day_index(inception.start_timestamp) + state.duration as i64
    }

    /// compound interest from the tracked timestamp up to `target`
    ///
    /// performing days compound the remuneratory rate (grace-discounted
    /// while the grace period is active) on principal plus remuneratory
    /// interest; crossing the due day ends the grace period and charges the
    /// one-time late fee; overdue days additionally compound the moratory
    /// rate on the same balance. while frozen, no day past the freeze
    /// timestamp accrues. zero elapsed days is a no-op.
    pub fn accrue(
        &self,
        inception: &SubLoanInception,
        state: &mut SubLoanState,
        target: DateTime<Utc>,
    ) {
        let interest_target = match state.freeze_timestamp {
            Some(frozen_at) if frozen_at < target => frozen_at,
            _ => target,
        };

        let from_day = self.day_index(state.tracked_timestamp);
        let to_day = self.day_index(interest_target).max(from_day);
        let due_day = self.due_day(inception, state);

        if to_day > from_day {
            // performing span
            let performing_end = to_day.min(due_day);
            if performing_end > from_day {
                let rate = match state.grace_period_status {
                    GracePeriodStatus::Active => state
                        .remuneratory_rate
                        .discounted_by(state.grace_discount_rate),
                    GracePeriodStatus::None => state.remuneratory_rate,
                };
                let base = state.tracked.principal + state.tracked.remuneratory;
                let days = (performing_end - from_day) as u32;
                state.tracked.remuneratory += compound_delta(base, rate, days);
            }

            // crossing the due day: grace ends, late fee charged once on the
            // balance at the crossing
            if from_day <= due_day && to_day > due_day {
                state.grace_period_status = GracePeriodStatus::None;
                if !state.late_fee_rate.is_zero() {
                    let base = state.tracked.principal + state.tracked.remuneratory;
                    state.tracked.late_fee += base * state.late_fee_rate.as_decimal();
                }
            }

            // overdue span
            let overdue_start = from_day.max(due_day);
            for _ in 0..(to_day - overdue_start).max(0) {
                let base = state.tracked.principal + state.tracked.remuneratory;
                state.tracked.remuneratory += base * state.remuneratory_rate.as_decimal();
                if !state.moratory_rate.is_zero() {
                    state.tracked.moratory += base * state.moratory_rate.as_decimal();
                }
            }
        }

        if target > state.tracked_timestamp {
            state.tracked_timestamp = target;
        }
    }
}

/// interest delta from compounding `balance` at `rate` for `days` whole days
fn compound_delta(balance: Money, rate: Rate, days: u32) -> Money {
    if rate.is_zero() || balance.is_zero() {
        return Money::ZERO;
    }
    let mut compounded = balance;
    for _ in 0..days {
        compounded += compounded * rate.as_decimal();
    }
    compounded - balance
}
