use chrono::{Days, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};

use crate::db::{Database, ENTRY_COLUMNS, day_key, now_timestamp};
use crate::error::{Result, TallyError};
use crate::models::{DailyNutrition, FoodEntry, NewFoodEntry, format_timestamp};
use crate::users::ensure_user_exists;

/// Sums a (user, day) bucket straight from the ledger.
pub(crate) fn sum_bucket(
    conn: &Connection,
    user_id: i64,
    day: NaiveDate,
) -> rusqlite::Result<DailyNutrition> {
    conn.query_row(
        "SELECT ?2, COALESCE(SUM(calories), 0), COALESCE(SUM(protein), 0),
                COALESCE(SUM(carbs), 0), COALESCE(SUM(fat), 0)
         FROM entries
         WHERE user_id = ?1 AND date(date) = ?2",
        params![user_id, day_key(day)],
        Database::nutrition_from_row,
    )
}

/// Writes the bucket's materialized row. With `drop_empty`, an all-zero sum removes the row.
fn store_aggregate(
    conn: &Connection,
    user_id: i64,
    totals: &DailyNutrition,
    drop_empty: bool,
) -> rusqlite::Result<()> {
    if drop_empty && totals.is_zero() {
        conn.execute(
            "DELETE FROM daily_aggregates WHERE user_id = ?1 AND entry_date = ?2",
            params![user_id, day_key(totals.date)],
        )?;
        return Ok(());
    }
    conn.execute(
        "INSERT INTO daily_aggregates (user_id, entry_date, total_calories, total_protein,
                                       total_carbs, total_fats, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(user_id, entry_date) DO UPDATE SET
             total_calories = excluded.total_calories,
             total_protein = excluded.total_protein,
             total_carbs = excluded.total_carbs,
             total_fats = excluded.total_fats,
             updated_at = excluded.updated_at",
        params![
            user_id,
            day_key(totals.date),
            totals.calories,
            totals.protein,
            totals.carbs,
            totals.fats,
            now_timestamp(),
        ],
    )?;
    Ok(())
}

fn refresh_bucket(
    conn: &Connection,
    user_id: i64,
    day: NaiveDate,
    drop_empty: bool,
) -> rusqlite::Result<DailyNutrition> {
    let totals = sum_bucket(conn, user_id, day)?;
    store_aggregate(conn, user_id, &totals, drop_empty)?;
    tracing::debug!(user_id, day = %day, calories = totals.calories, "Daily aggregate refreshed");
    Ok(totals)
}

fn load_entry(conn: &Connection, entry_id: i64) -> Result<FoodEntry> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM entries WHERE id = ?1"),
        params![entry_id],
        Database::entry_from_row,
    )
    .optional()?
    .ok_or_else(|| TallyError::not_found("Entry", entry_id))
}

impl Database {
    // --- Ledger ---

    /// Appends an intake event and refreshes its day's aggregate in the same transaction.
    pub fn record_entry(&self, user_id: i64, entry: &NewFoodEntry) -> Result<FoodEntry> {
        entry.validate()?;

        let tx = self.write_tx()?;
        ensure_user_exists(&tx, user_id)?;

        let now = now_timestamp();
        tx.execute(
            "INSERT INTO entries (user_id, food_id, name, amount, calories, protein, carbs, fat,
                                  date, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                user_id,
                entry.food_id,
                entry.name,
                entry.amount,
                entry.calories,
                entry.protein,
                entry.carbs,
                entry.fat,
                format_timestamp(&entry.date),
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        refresh_bucket(&tx, user_id, entry.day(), false)?;

        let stored = load_entry(&tx, id)?;
        tx.commit()?;
        tracing::info!(user_id, entry_id = id, day = %entry.day(), "Entry recorded");
        Ok(stored)
    }

    pub fn get_entry(&self, entry_id: i64) -> Result<FoodEntry> {
        load_entry(&self.conn, entry_id)
    }

    /// Removes an intake event and re-sums its day; the aggregate row goes away
    /// once nothing is left in the bucket.
    pub fn delete_entry(&self, entry_id: i64) -> Result<()> {
        self.remove_entry(None, entry_id)
    }

    /// Like [`Database::delete_entry`], but entries owned by someone else read as missing.
    pub fn delete_entry_for_user(&self, user_id: i64, entry_id: i64) -> Result<()> {
        self.remove_entry(Some(user_id), entry_id)
    }

    fn remove_entry(&self, owner: Option<i64>, entry_id: i64) -> Result<()> {
        let tx = self.write_tx()?;
        let entry = load_entry(&tx, entry_id)?;
        if owner.is_some_and(|id| id != entry.user_id) {
            return Err(TallyError::not_found("Entry", entry_id));
        }

        tx.execute("DELETE FROM entries WHERE id = ?1", params![entry_id])?;
        let day = entry.date.date_naive();
        refresh_bucket(&tx, entry.user_id, day, true)?;
        tx.commit()?;
        tracing::info!(user_id = entry.user_id, entry_id, day = %day, "Entry deleted");
        Ok(())
    }

    /// Entries for one UTC day, newest first.
    pub fn list_daily_entries(&self, user_id: i64, day: NaiveDate) -> Result<Vec<FoodEntry>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE user_id = ?1 AND date(date) = ?2
             ORDER BY date DESC, id DESC"
        ))?;
        let entries = stmt
            .query_map(params![user_id, day_key(day)], Self::entry_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if !entries.is_empty() {
            return Ok(entries);
        }

        // Rows whose timestamp SQLite cannot normalize still sort lexically inside the day.
        let Some(next_day) = day.checked_add_days(Days::new(1)) else {
            return Ok(entries);
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ENTRY_COLUMNS} FROM entries
             WHERE user_id = ?1 AND date >= ?2 AND date < ?3
             ORDER BY date DESC, id DESC"
        ))?;
        let mut entries = stmt
            .query_map(
                params![user_id, day_key(day), day_key(next_day)],
                Self::entry_from_row,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        entries.sort_by(|a, b| b.date.cmp(&a.date).then(b.id.cmp(&a.id)));
        Ok(entries)
    }

    /// Totals for one day summed directly from the ledger.
    pub fn daily_nutrition(&self, user_id: i64, day: NaiveDate) -> Result<DailyNutrition> {
        Ok(sum_bucket(&self.conn, user_id, day)?)
    }

    /// The materialized aggregate row, if the day has one.
    pub fn daily_aggregate(&self, user_id: i64, day: NaiveDate) -> Result<Option<DailyNutrition>> {
        let row = self
            .conn
            .query_row(
                "SELECT entry_date, total_calories, total_protein, total_carbs, total_fats
                 FROM daily_aggregates
                 WHERE user_id = ?1 AND entry_date = ?2",
                params![user_id, day_key(day)],
                Self::nutrition_from_row,
            )
            .optional()?;
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::sample_user;
    use chrono::{DateTime, TimeZone, Utc};

    fn setup() -> (Database, i64) {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user(&sample_user("ledger"), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
            .unwrap();
        (db, user.id)
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn entry(calories: f64, protein: f64, carbs: f64, fat: f64, date: DateTime<Utc>) -> NewFoodEntry {
        NewFoodEntry {
            food_id: "food-1".to_string(),
            name: "Test Food".to_string(),
            amount: 100.0,
            calories,
            protein,
            carbs,
            fat,
            date,
        }
    }

    fn assert_aggregate_matches_ledger(db: &Database, user_id: i64, d: NaiveDate) {
        let ledger = db.daily_nutrition(user_id, d).unwrap();
        match db.daily_aggregate(user_id, d).unwrap() {
            Some(agg) => assert_eq!(agg, ledger),
            None => assert!(ledger.is_zero()),
        }
    }

    #[test]
    fn test_single_entry_creates_and_removes_aggregate() {
        let (db, user) = setup();
        let d = day(2024, 1, 1);
        let e = db.record_entry(user, &entry(500.0, 30.0, 50.0, 10.0, at(2024, 1, 1, 12))).unwrap();
        assert!(e.id > 0);
        assert_eq!(e.user_id, user);

        let agg = db.daily_aggregate(user, d).unwrap().unwrap();
        assert_eq!(agg.calories, 500.0);
        assert_eq!(agg.protein, 30.0);
        assert_eq!(agg.carbs, 50.0);
        assert_eq!(agg.fats, 10.0);

        db.delete_entry(e.id).unwrap();
        assert!(db.daily_aggregate(user, d).unwrap().is_none());
    }

    #[test]
    fn test_two_entries_then_delete_one() {
        let (db, user) = setup();
        let d = day(2024, 1, 1);
        let first = db.record_entry(user, &entry(300.0, 20.0, 40.0, 5.0, at(2024, 1, 1, 8))).unwrap();
        db.record_entry(user, &entry(200.0, 10.0, 10.0, 5.0, at(2024, 1, 1, 19))).unwrap();

        let agg = db.daily_aggregate(user, d).unwrap().unwrap();
        assert_eq!(agg.calories, 500.0);
        assert_eq!(agg.protein, 30.0);
        assert_eq!(agg.carbs, 50.0);
        assert_eq!(agg.fats, 10.0);

        db.delete_entry(first.id).unwrap();
        let agg = db.daily_aggregate(user, d).unwrap().unwrap();
        assert_eq!(agg.calories, 200.0);
        assert_eq!(agg.protein, 10.0);
        assert_eq!(agg.carbs, 10.0);
        assert_eq!(agg.fats, 5.0);
        assert_aggregate_matches_ledger(&db, user, d);
    }

    #[test]
    fn test_entries_bucket_by_utc_day() {
        let (db, user) = setup();
        let late = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap();
        let early = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        db.record_entry(user, &entry(100.0, 1.0, 1.0, 1.0, late)).unwrap();
        db.record_entry(user, &entry(250.0, 2.0, 2.0, 2.0, early)).unwrap();

        assert_eq!(db.daily_aggregate(user, day(2024, 1, 1)).unwrap().unwrap().calories, 100.0);
        assert_eq!(db.daily_aggregate(user, day(2024, 1, 2)).unwrap().unwrap().calories, 250.0);
    }

    #[test]
    fn test_aggregate_tracks_ledger_through_mixed_mutations() {
        let (db, user) = setup();
        let d = day(2024, 2, 10);
        let mut ids = Vec::new();
        for (i, kcal) in [120.0, 340.5, 80.25, 410.0].into_iter().enumerate() {
            let e = db
                .record_entry(user, &entry(kcal, 5.0, 10.0, 2.5, at(2024, 2, 10, 6 + i as u32)))
                .unwrap();
            ids.push(e.id);
            assert_aggregate_matches_ledger(&db, user, d);
        }
        for id in [ids[1], ids[3], ids[0]] {
            db.delete_entry(id).unwrap();
            assert_aggregate_matches_ledger(&db, user, d);
        }
        let agg = db.daily_aggregate(user, d).unwrap().unwrap();
        assert_eq!(agg.calories, 80.25);
    }

    #[test]
    fn test_record_entry_rejects_invalid() {
        let (db, user) = setup();
        let mut bad = entry(100.0, 1.0, 1.0, 1.0, at(2024, 1, 1, 9));
        bad.amount = 0.0;
        assert!(matches!(db.record_entry(user, &bad).unwrap_err(), TallyError::Validation(_)));

        let negative = entry(100.0, -1.0, 1.0, 1.0, at(2024, 1, 1, 9));
        assert!(matches!(
            db.record_entry(user, &negative).unwrap_err(),
            TallyError::Validation(_)
        ));
        assert!(db.daily_aggregate(user, day(2024, 1, 1)).unwrap().is_none());
    }

    #[test]
    fn test_record_entry_rejects_five_digit_year() {
        let (db, user) = setup();
        let mut far = entry(100.0, 1.0, 1.0, 1.0, at(2024, 1, 1, 9));
        far.date = Utc.with_ymd_and_hms(10000, 1, 1, 12, 0, 0).unwrap();
        assert!(matches!(db.record_entry(user, &far).unwrap_err(), TallyError::Validation(_)));

        let stored: i64 = db
            .conn
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))
            .unwrap();
        assert_eq!(stored, 0);
    }

    #[test]
    fn test_record_entry_unknown_user() {
        let (db, _) = setup();
        let err = db
            .record_entry(999, &entry(100.0, 1.0, 1.0, 1.0, at(2024, 1, 1, 9)))
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_failed_aggregate_write_rolls_back_entry() {
        let (db, user) = setup();
        db.conn
            .execute_batch(
                "CREATE TRIGGER refuse_aggregate BEFORE INSERT ON daily_aggregates
                 BEGIN SELECT RAISE(ABORT, 'aggregate write refused'); END;",
            )
            .unwrap();

        let err = db
            .record_entry(user, &entry(500.0, 30.0, 50.0, 10.0, at(2024, 1, 1, 12)))
            .unwrap_err();
        assert!(matches!(err, TallyError::Persistence(_)));
        assert!(db.list_daily_entries(user, day(2024, 1, 1)).unwrap().is_empty());
    }

    #[test]
    fn test_failed_aggregate_delete_keeps_entry() {
        let (db, user) = setup();
        let e = db.record_entry(user, &entry(500.0, 30.0, 50.0, 10.0, at(2024, 1, 1, 12))).unwrap();
        db.conn
            .execute_batch(
                "CREATE TRIGGER refuse_aggregate_delete BEFORE DELETE ON daily_aggregates
                 BEGIN SELECT RAISE(ABORT, 'aggregate delete refused'); END;",
            )
            .unwrap();

        assert!(db.delete_entry(e.id).is_err());
        assert_eq!(db.get_entry(e.id).unwrap().id, e.id);
        assert!(db.daily_aggregate(user, day(2024, 1, 1)).unwrap().is_some());
    }

    #[test]
    fn test_delete_entry_not_found() {
        let (db, _) = setup();
        assert!(db.delete_entry(12345).unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_entry_for_other_user_is_not_found() {
        let (db, owner) = setup();
        let other = db
            .create_user(&sample_user("intruder"), day(2024, 1, 1))
            .unwrap();
        let e = db.record_entry(owner, &entry(100.0, 1.0, 1.0, 1.0, at(2024, 1, 1, 9))).unwrap();

        assert!(db.delete_entry_for_user(other.id, e.id).unwrap_err().is_not_found());
        assert!(db.get_entry(e.id).is_ok());

        db.delete_entry_for_user(owner, e.id).unwrap();
        assert!(db.get_entry(e.id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_list_daily_entries_newest_first() {
        let (db, user) = setup();
        db.record_entry(user, &entry(100.0, 1.0, 1.0, 1.0, at(2024, 1, 1, 7))).unwrap();
        db.record_entry(user, &entry(200.0, 1.0, 1.0, 1.0, at(2024, 1, 1, 13))).unwrap();
        db.record_entry(user, &entry(300.0, 1.0, 1.0, 1.0, at(2024, 1, 1, 10))).unwrap();
        db.record_entry(user, &entry(999.0, 1.0, 1.0, 1.0, at(2024, 1, 2, 10))).unwrap();

        let entries = db.list_daily_entries(user, day(2024, 1, 1)).unwrap();
        let kcal: Vec<f64> = entries.iter().map(|e| e.calories).collect();
        assert_eq!(kcal, vec![200.0, 300.0, 100.0]);
    }

    #[test]
    fn test_list_daily_entries_falls_back_for_legacy_timestamps() {
        let (db, user) = setup();
        db.conn
            .execute(
                "INSERT INTO entries (user_id, food_id, name, amount, calories, protein, carbs, fat,
                                      date, created_at, updated_at)
                 VALUES (?1, 'legacy', 'Legacy Row', 1, 150, 1, 1, 1, '2024-01-05T10:00:00+0000', 'x', 'x')",
                params![user],
            )
            .unwrap();

        let entries = db.list_daily_entries(user, day(2024, 1, 5)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "Legacy Row");
        assert!(db.list_daily_entries(user, day(2024, 1, 6)).unwrap().is_empty());
    }

    #[test]
    fn test_daily_nutrition_empty_day() {
        let (db, user) = setup();
        let totals = db.daily_nutrition(user, day(2024, 3, 3)).unwrap();
        assert_eq!(totals, DailyNutrition::zero(day(2024, 3, 3)));
    }

    #[test]
    fn test_concurrent_writers_same_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("concurrent.db");
        let user = {
            let db = Database::open(&path).unwrap();
            db.create_user(&sample_user("busy"), day(2024, 1, 1)).unwrap().id
        };
        let handles: Vec<Database> = (0..3).map(|_| Database::open(&path).unwrap()).collect();

        let workers: Vec<_> = handles
            .into_iter()
            .map(|db| {
                std::thread::spawn(move || {
                    for _ in 0..20 {
                        db.record_entry(user, &entry(10.0, 1.0, 2.0, 0.5, at(2024, 4, 1, 12)))
                            .unwrap();
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let db = Database::open(&path).unwrap();
        let agg = db.daily_aggregate(user, day(2024, 4, 1)).unwrap().unwrap();
        assert_eq!(agg.calories, 600.0);
        assert_eq!(agg.protein, 60.0);
        assert_aggregate_matches_ledger(&db, user, day(2024, 4, 1));
    }
}
