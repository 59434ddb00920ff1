use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, params};

use crate::db::{Database, USER_COLUMNS, now_timestamp};
use crate::error::{Result, TallyError};
use crate::goals::{derived_goals, write_goal_row};
use crate::macros::{age_in_years, initial_calorie_goal};
use crate::models::{NewUserProfile, UserProfile};

pub(crate) fn load_user(conn: &Connection, user_id: i64) -> Result<UserProfile> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
        params![user_id],
        Database::user_from_row,
    )
    .optional()?
    .ok_or_else(|| TallyError::not_found("User", user_id))
}

pub(crate) fn ensure_user_exists(conn: &Connection, user_id: i64) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        params![user_id],
        |row| row.get(0),
    )?;
    if exists {
        Ok(())
    } else {
        Err(TallyError::not_found("User", user_id))
    }
}

impl Database {
    // --- Users ---

    /// Registers a user and seeds their goal row. Without an explicit calorie goal,
    /// the initial goal is derived from body metrics, age as of `today`, and activity.
    pub fn create_user(&self, user: &NewUserProfile, today: NaiveDate) -> Result<UserProfile> {
        user.validate()?;

        let tx = self.write_tx()?;
        let taken: Option<String> = tx
            .query_row(
                "SELECT CASE WHEN email = ?1 THEN 'email' ELSE 'username' END
                 FROM users WHERE email = ?1 OR username = ?2 LIMIT 1",
                params![user.email, user.username],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(field) = taken {
            return Err(TallyError::Conflict(format!("A user with this {field} already exists")));
        }

        let calorie_goal = match user.daily_calorie_goal {
            Some(goal) => goal,
            None => {
                let computed = initial_calorie_goal(
                    user.weight_kg,
                    user.height_cm,
                    user.gender,
                    age_in_years(user.birthdate, today),
                    user.activity_level,
                    user.goal_type,
                );
                if computed <= 0 {
                    return Err(TallyError::validation(
                        "Body metrics give no positive calorie goal; provide daily_calorie_goal",
                    ));
                }
                computed
            }
        };

        let now = now_timestamp();
        tx.execute(
            "INSERT INTO users (email, username, full_name, birthdate, gender, height_cm, weight_kg,
                                activity_level, goal_type, daily_calorie_goal, role, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                user.email,
                user.username,
                user.full_name,
                user.birthdate.format("%Y-%m-%d").to_string(),
                user.gender,
                user.height_cm,
                user.weight_kg,
                user.activity_level,
                user.goal_type,
                calorie_goal,
                user.role,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();

        let profile = load_user(&tx, id)?;
        write_goal_row(
            &tx,
            &derived_goals(&profile, calorie_goal, profile.weight_kg),
        )?;
        tx.commit()?;
        tracing::info!(user_id = id, calorie_goal, role = %user.role, "User created");
        Ok(profile)
    }

    pub fn get_user(&self, user_id: i64) -> Result<UserProfile> {
        load_user(&self.conn, user_id)
    }

    pub fn list_users(&self) -> Result<Vec<UserProfile>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
        let users = stmt
            .query_map([], Self::user_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    pub(crate) fn list_user_ids(&self) -> Result<Vec<i64>> {
        let mut stmt = self.conn.prepare("SELECT id FROM users ORDER BY id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Removes the user together with their goals, ledger entries, aggregates and
    /// any dietitian links on either side.
    pub fn delete_user(&self, user_id: i64) -> Result<()> {
        let tx = self.write_tx()?;
        ensure_user_exists(&tx, user_id)?;
        tx.execute("DELETE FROM daily_aggregates WHERE user_id = ?1", params![user_id])?;
        let entries = tx.execute("DELETE FROM entries WHERE user_id = ?1", params![user_id])?;
        tx.execute("DELETE FROM user_goals WHERE user_id = ?1", params![user_id])?;
        tx.execute(
            "DELETE FROM dietitian_clients WHERE dietitian_id = ?1 OR client_id = ?1",
            params![user_id],
        )?;
        tx.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        tx.commit()?;
        tracing::info!(user_id, entries, "User deleted");
        Ok(())
    }
}
