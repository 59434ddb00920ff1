use std::path::Path;

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::Result;
use crate::models::{
    DailyNutrition, FoodEntry, UserGoals, UserProfile, format_timestamp, parse_timestamp,
};

const SCHEMA_VERSION: i64 = 3;

pub struct Database {
    pub(crate) conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Database { conn };
        db.configure()?;
        db.migrate()?;
        tracing::debug!(path = %path.display(), "Opened database");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.configure()?;
        db.migrate()?;
        Ok(db)
    }

    fn configure(&self) -> Result<()> {
        self.conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn migrate(&self) -> Result<()> {
        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS users (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    email TEXT NOT NULL UNIQUE,
                    username TEXT NOT NULL UNIQUE,
                    full_name TEXT NOT NULL,
                    birthdate TEXT NOT NULL,
                    gender TEXT NOT NULL,
                    height_cm REAL NOT NULL,
                    weight_kg REAL NOT NULL,
                    activity_level TEXT NOT NULL,
                    goal_type TEXT NOT NULL DEFAULT 'maintain',
                    daily_calorie_goal INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS user_goals (
                    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                    target_calories INTEGER NOT NULL,
                    target_protein REAL NOT NULL,
                    target_carbs REAL NOT NULL,
                    target_fats REAL NOT NULL,
                    target_weight REAL NOT NULL,
                    updated_at TEXT NOT NULL
                );

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            // Ledger plus its materialized per-day sums, keyed by the UTC day of `date`.
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS entries (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    food_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    amount REAL NOT NULL CHECK (amount > 0),
                    calories REAL NOT NULL CHECK (calories >= 0),
                    protein REAL NOT NULL CHECK (protein >= 0),
                    carbs REAL NOT NULL CHECK (carbs >= 0),
                    fat REAL NOT NULL CHECK (fat >= 0),
                    date TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_entries_user_date ON entries(user_id, date);

                CREATE TABLE IF NOT EXISTS daily_aggregates (
                    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    entry_date TEXT NOT NULL,
                    total_calories REAL NOT NULL DEFAULT 0,
                    total_protein REAL NOT NULL DEFAULT 0,
                    total_carbs REAL NOT NULL DEFAULT 0,
                    total_fats REAL NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, entry_date)
                );

                PRAGMA user_version = 2;",
            )?;
        }

        if version < 3 {
            self.conn.execute_batch(
                "ALTER TABLE users ADD COLUMN role TEXT NOT NULL DEFAULT 'user';

                CREATE TABLE IF NOT EXISTS dietitian_clients (
                    dietitian_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    client_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL,
                    PRIMARY KEY (dietitian_id, client_id)
                );

                CREATE INDEX IF NOT EXISTS idx_dietitian_clients_client ON dietitian_clients(client_id);

                PRAGMA user_version = 3;",
            )?;
        }

        Ok(())
    }

    #[must_use]
    pub fn schema_version() -> i64 {
        SCHEMA_VERSION
    }

    /// Opens a write transaction that takes the database write lock up front,
    /// so concurrent writers to the same bucket serialize instead of interleaving.
    /// Dropping the returned transaction without committing rolls it back.
    pub(crate) fn write_tx(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    // --- Row mapping helpers ---

    // Expects columns:
    // 0: id, 1: email, 2: username, 3: full_name, 4: birthdate, 5: gender,
    // 6: height_cm, 7: weight_kg, 8: activity_level, 9: goal_type,
    // 10: daily_calorie_goal, 11: created_at, 12: updated_at, 13: role
    pub(crate) fn user_from_row(row: &rusqlite::Row) -> rusqlite::Result<UserProfile> {
        let birthdate: String = row.get(4)?;
        Ok(UserProfile {
            id: row.get(0)?,
            email: row.get(1)?,
            username: row.get(2)?,
            full_name: row.get(3)?,
            birthdate: parse_day_column(4, &birthdate)?,
            gender: row.get(5)?,
            height_cm: row.get(6)?,
            weight_kg: row.get(7)?,
            activity_level: row.get(8)?,
            goal_type: row.get(9)?,
            daily_calorie_goal: row.get(10)?,
            role: row.get(13)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    // Expects columns:
    // 0: id, 1: user_id, 2: food_id, 3: name, 4: amount, 5: calories,
    // 6: protein, 7: carbs, 8: fat, 9: date, 10: created_at, 11: updated_at
    pub(crate) fn entry_from_row(row: &rusqlite::Row) -> rusqlite::Result<FoodEntry> {
        let date: String = row.get(9)?;
        let date = parse_timestamp(&date).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                9,
                rusqlite::types::Type::Text,
                format!("unrecognized entry timestamp '{date}'").into(),
            )
        })?;
        Ok(FoodEntry {
            id: row.get(0)?,
            user_id: row.get(1)?,
            food_id: row.get(2)?,
            name: row.get(3)?,
            amount: row.get(4)?,
            calories: row.get(5)?,
            protein: row.get(6)?,
            carbs: row.get(7)?,
            fat: row.get(8)?,
            date,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    // Expects columns: 0: user_id, 1: target_calories, 2: target_protein,
    // 3: target_carbs, 4: target_fats, 5: target_weight
    pub(crate) fn goals_from_row(row: &rusqlite::Row) -> rusqlite::Result<UserGoals> {
        Ok(UserGoals {
            user_id: row.get(0)?,
            target_calories: row.get(1)?,
            target_protein: row.get(2)?,
            target_carbs: row.get(3)?,
            target_fats: row.get(4)?,
            target_weight: row.get(5)?,
        })
    }

    // Expects columns: 0: day (YYYY-MM-DD), 1: calories, 2: protein, 3: carbs, 4: fats
    pub(crate) fn nutrition_from_row(row: &rusqlite::Row) -> rusqlite::Result<DailyNutrition> {
        let day: String = row.get(0)?;
        Ok(DailyNutrition {
            date: parse_day_column(0, &day)?,
            calories: row.get(1)?,
            protein: row.get(2)?,
            carbs: row.get(3)?,
            fats: row.get(4)?,
        })
    }
}

pub(crate) const USER_COLUMNS: &str = "id, email, username, full_name, birthdate, gender, height_cm, weight_kg,
     activity_level, goal_type, daily_calorie_goal, created_at, updated_at, role";

pub(crate) const ENTRY_COLUMNS: &str =
    "id, user_id, food_id, name, amount, calories, protein, carbs, fat, date, created_at, updated_at";

pub(crate) fn now_timestamp() -> String {
    format_timestamp(&Utc::now())
}

pub(crate) fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn parse_day_column(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{ActivityLevel, Gender, GoalType, NewUserProfile, Role};

    pub(crate) fn sample_user(username: &str) -> NewUserProfile {
        NewUserProfile {
            email: format!("{username}@example.com"),
            username: username.to_string(),
            full_name: "Sam Sample".to_string(),
            birthdate: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            gender: Gender::Female,
            height_cm: 170.0,
            weight_kg: 65.0,
            activity_level: ActivityLevel::Moderate,
            goal_type: GoalType::Maintain,
            daily_calorie_goal: Some(2000),
            role: Role::User,
        }
    }

    fn table_names(db: &Database) -> Vec<String> {
        let mut stmt = db
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn test_migrate_creates_tables() {
        let db = Database::open_in_memory().unwrap();
        let tables = table_names(&db);
        for expected in ["daily_aggregates", "dietitian_clients", "entries", "user_goals", "users"] {
            assert!(tables.iter().any(|t| t == expected), "missing {expected}");
        }
        let version: i64 = db
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, Database::schema_version());
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tally.db");
        {
            let db = Database::open(&path).unwrap();
            db.create_user(&sample_user("reopen"), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap())
                .unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert_eq!(db.list_users().unwrap().len(), 1);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::open_in_memory().unwrap();
        let result = db.conn.execute(
            "INSERT INTO user_goals (user_id, target_calories, target_protein, target_carbs, target_fats, target_weight, updated_at)
             VALUES (999, 2000, 1, 1, 1, 1, 'now')",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_write_tx_rolls_back_on_drop() {
        let db = Database::open_in_memory().unwrap();
        {
            let tx = db.write_tx().unwrap();
            tx.execute(
                "INSERT INTO users (email, username, full_name, birthdate, gender, height_cm, weight_kg,
                                    activity_level, goal_type, daily_calorie_goal, created_at, updated_at)
                 VALUES ('x@example.com', 'x', 'X', '1990-01-01', 'male', 180, 80, 'light', 'gain', 2500, 'now', 'now')",
                [],
            )
            .unwrap();
        }
        assert!(db.list_users().unwrap().is_empty());
    }

    #[test]
    fn test_day_key_format() {
        assert_eq!(day_key(NaiveDate::from_ymd_opt(2024, 1, 9).unwrap()), "2024-01-09");
    }
}
