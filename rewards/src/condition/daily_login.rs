//! Consecutive-day login streaks.

use super::{ConditionStrategy, parse_condition};
use chrono::{DateTime, NaiveDate, Utc};
use rewardflow_core::store::EventLogStore;
use rewardflow_core::types::{EventType, UserId};
use rewardflow_core::{BoxFuture, RewardError};
use serde::Deserialize;
use std::collections::BTreeSet;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyLoginCondition {
    consecutive_days: u32,
    max_day_gap: Option<u32>,
}

/// `DAILY_LOGIN`: the current streak reaches `consecutiveDays`.
///
/// Entries collapse to distinct UTC calendar days. The streak is counted
/// backwards from the most recent day and ends at the first gap larger than
/// `maxDayGap` (the strategy default when the condition omits it).
#[derive(Debug, Clone, Copy)]
pub struct DailyLoginStrategy {
    default_max_gap: u32,
}

impl DailyLoginStrategy {
    /// A strategy whose default gap is `default_max_gap` days.
    #[must_use]
    pub const fn new(default_max_gap: u32) -> Self {
        Self { default_max_gap }
    }
}

impl Default for DailyLoginStrategy {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Length of the streak ending at the most recent login day.
///
/// Two days `max_gap` apart or closer belong to the same streak; with the
/// default gap of 1 only adjacent days do.
pub fn current_streak(timestamps: impl IntoIterator<Item = DateTime<Utc>>, max_gap: u32) -> u32 {
    let days: BTreeSet<NaiveDate> = timestamps.into_iter().map(|ts| ts.date_naive()).collect();

    let mut streak = 0;
    let mut later: Option<NaiveDate> = None;
    for day in days.into_iter().rev() {
        if later.is_some_and(|later| (later - day).num_days() > i64::from(max_gap)) {
            break;
        }
        streak += 1;
        later = Some(day);
    }
    streak
}

impl ConditionStrategy for DailyLoginStrategy {
    fn evaluate<'a>(
        &'a self,
        user_id: UserId,
        condition: &'a serde_json::Value,
        log: &'a dyn EventLogStore,
    ) -> BoxFuture<'a, Result<bool, RewardError>> {
        Box::pin(async move {
            let params: DailyLoginCondition = parse_condition(&EventType::DailyLogin, condition)?;
            if params.consecutive_days == 0 {
                return Err(RewardError::Validation(
                    "consecutiveDays must be at least 1".to_string(),
                ));
            }
            let max_gap = params.max_day_gap.unwrap_or(self.default_max_gap);
            if max_gap == 0 {
                return Err(RewardError::Validation(
                    "maxDayGap must be at least 1".to_string(),
                ));
            }

            let entries = log.entries(user_id, EventType::DailyLogin).await?;
            let streak = current_streak(entries.iter().map(|e| e.timestamp), max_gap);

            tracing::trace!(
                user_id = %user_id,
                streak,
                required = params.consecutive_days,
                "Computed login streak"
            );
            Ok(streak >= params.consecutive_days)
        })
    }
}
