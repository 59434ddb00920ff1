use std::collections::BTreeMap;

use chrono::{Days, NaiveDate, Utc};
use rusqlite::params;

use crate::db::{Database, day_key};
use crate::error::{Result, TallyError};
use crate::ledger::sum_bucket;
use crate::models::DailyNutrition;
use crate::users::ensure_user_exists;

/// Longest allowed distance between start and end, in days (31 days inclusive).
pub const MAX_HISTORY_SPAN_DAYS: i64 = 30;

/// Days covered when no range is given: today plus the six before it.
pub const DEFAULT_HISTORY_DAYS: u64 = 7;

#[must_use]
pub fn default_history_range(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = today
        .checked_sub_days(Days::new(DEFAULT_HISTORY_DAYS - 1))
        .unwrap_or(today);
    (start, today)
}

pub fn validate_range(start: NaiveDate, end: NaiveDate) -> Result<()> {
    if end < start {
        return Err(TallyError::validation("End date must not be before start date"));
    }
    if (end - start).num_days() > MAX_HISTORY_SPAN_DAYS {
        return Err(TallyError::validation(format!(
            "Date range too large: at most {} days",
            MAX_HISTORY_SPAN_DAYS + 1
        )));
    }
    Ok(())
}

impl Database {
    // --- History ---

    /// One summary per calendar day in `[start, end]`, using the current UTC day as "today".
    pub fn history(&self, user_id: i64, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyNutrition>> {
        self.history_at(user_id, start, end, Utc::now().date_naive())
    }

    /// Builds the range in layers: zeros, then materialized aggregates, then a
    /// per-day re-sum of the ledger, then a fresh sum for `today`. Only the
    /// aggregate query is fatal; the later layers degrade to what's already there.
    pub fn history_at(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    ) -> Result<Vec<DailyNutrition>> {
        validate_range(start, end)?;
        ensure_user_exists(&self.conn, user_id)?;

        let mut days: BTreeMap<NaiveDate, DailyNutrition> = start
            .iter_days()
            .take_while(|d| *d <= end)
            .map(|d| (d, DailyNutrition::zero(d)))
            .collect();

        for row in self.aggregates_between(user_id, start, end)? {
            days.insert(row.date, row);
        }

        match self.ledger_sums_between(user_id, start, end) {
            Ok(rows) => {
                for row in rows {
                    days.insert(row.date, row);
                }
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Ledger re-aggregation failed, using stored aggregates");
            }
        }

        if (start..=end).contains(&today) {
            match sum_bucket(&self.conn, user_id, today) {
                Ok(row) => {
                    days.insert(today, row);
                }
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Could not recompute today's totals");
                }
            }
        }

        Ok(days.into_values().collect())
    }

    fn aggregates_between(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyNutrition>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_date, total_calories, total_protein, total_carbs, total_fats
             FROM daily_aggregates
             WHERE user_id = ?1 AND entry_date BETWEEN ?2 AND ?3
             ORDER BY entry_date",
        )?;
        let rows = stmt
            .query_map(params![user_id, day_key(start), day_key(end)], Self::nutrition_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn ledger_sums_between(
        &self,
        user_id: i64,
        start: NaiveDate,
        end: NaiveDate,
    ) -> rusqlite::Result<Vec<DailyNutrition>> {
        let mut stmt = self.conn.prepare(
            "SELECT date(date) AS day, SUM(calories), SUM(protein), SUM(carbs), SUM(fat)
             FROM entries
             WHERE user_id = ?1 AND date(date) BETWEEN ?2 AND ?3
             GROUP BY day
             ORDER BY day",
        )?;
        let rows = stmt
            .query_map(params![user_id, day_key(start), day_key(end)], Self::nutrition_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }
}
