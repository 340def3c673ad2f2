//! Simplified SM-2 scheduling.
//!
//! Review dates are UTC calendar dates: the review day is `now.date_naive()`
//! and the interval is added in whole days. Intervals from the third
//! successful repetition on are rounded half away from zero (`f64::round`).

use chrono::{DateTime, Days, NaiveDate, Utc};

use crate::{CoreError, ReviewState, Score, EF_MIN};

/// First two successful repetitions use fixed intervals.
const FIRST_INTERVAL: u32 = 1;
const SECOND_INTERVAL: u32 = 6;
/// Interval applied after a failed recall.
const RELEARN_INTERVAL: u32 = 1;

/// SM-2 ease adjustment for a successful score, before the floor.
pub fn ease_delta(score: Score) -> f64 {
    let d = f64::from(5 - score.value());
    0.1 - d * (0.08 + d * 0.02)
}

/// Computes the state that replaces `state` after a review scored `outcome` at `now`.
pub fn compute_next_review_state(
    state: &ReviewState,
    outcome: Score,
    now: DateTime<Utc>,
) -> Result<ReviewState, CoreError> {
    check_state(state)?;

    let (ease_factor, repetitions, interval) = if outcome.is_success() {
        let repetitions = state
            .repetitions
            .checked_add(1)
            .ok_or_else(|| CoreError::invalid("repetitions overflow"))?;
        let ease_factor = (state.ease_factor + ease_delta(outcome)).max(EF_MIN);
        let interval = match repetitions {
            1 => FIRST_INTERVAL,
            2 => SECOND_INTERVAL,
            _ => compound_interval(state.current_interval, ease_factor)?,
        };
        (ease_factor, repetitions, interval)
    } else {
        (state.ease_factor, 0, RELEARN_INTERVAL)
    };

    Ok(ReviewState {
        ease_factor,
        repetitions,
        current_interval: interval,
        next_review_date: add_days(now.date_naive(), interval)?,
        last_reviewed_at: Some(now),
    })
}

/// Same as [`compute_next_review_state`] for a score that has not been validated yet.
pub fn compute_next_review_state_raw(
    state: &ReviewState,
    outcome: i64,
    now: DateTime<Utc>,
) -> Result<ReviewState, CoreError> {
    compute_next_review_state(state, Score::new(outcome)?, now)
}

/// A card is due on or after its next review date.
pub fn is_due(state: &ReviewState, today: NaiveDate) -> bool {
    state.next_review_date <= today
}

fn check_state(state: &ReviewState) -> Result<(), CoreError> {
    if !state.ease_factor.is_finite() || state.ease_factor < EF_MIN {
        return Err(CoreError::invalid(format!(
            "ease factor {} is below the minimum of {EF_MIN}",
            state.ease_factor
        )));
    }
    Ok(())
}

fn compound_interval(current: u32, ease_factor: f64) -> Result<u32, CoreError> {
    let next = (f64::from(current) * ease_factor).round();
    if next > f64::from(u32::MAX) {
        return Err(CoreError::invalid("interval overflow"));
    }
    Ok(next as u32)
}

fn add_days(date: NaiveDate, days: u32) -> Result<NaiveDate, CoreError> {
    date.checked_add_days(Days::new(u64::from(days)))
        .ok_or_else(|| CoreError::invalid("next review date out of range"))
}
