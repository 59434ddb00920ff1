use chrono::{Days, NaiveDate, Utc};
use rusqlite::{Connection, params};

use crate::db::{Database, USER_COLUMNS, now_timestamp};
use crate::error::{Result, TallyError};
use crate::models::{ClientProgress, GoalsUpdate, Role, UserGoals, UserProfile};
use crate::users::{ensure_user_exists, load_user};

/// Days covered by a client progress read, ending today.
pub const PROGRESS_DAYS: u64 = 30;

fn load_dietitian(conn: &Connection, dietitian_id: i64) -> Result<UserProfile> {
    match load_user(conn, dietitian_id) {
        Ok(user) if user.role == Role::Dietitian => Ok(user),
        Ok(_) => Err(TallyError::not_found("Dietitian", dietitian_id)),
        Err(e) if e.is_not_found() => Err(TallyError::not_found("Dietitian", dietitian_id)),
        Err(e) => Err(e),
    }
}

fn is_linked(conn: &Connection, dietitian_id: i64, client_id: i64) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM dietitian_clients WHERE dietitian_id = ?1 AND client_id = ?2)",
        params![dietitian_id, client_id],
        |row| row.get(0),
    )
}

fn query_users(conn: &Connection, sql: &str, id: Option<i64>) -> Result<Vec<UserProfile>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = match id {
        Some(id) => stmt.query_map(params![id], Database::user_from_row)?,
        None => stmt.query_map([], Database::user_from_row)?,
    };
    Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
}

impl Database {
    // --- Dietitians ---

    pub fn list_dietitians(&self) -> Result<Vec<UserProfile>> {
        query_users(
            &self.conn,
            &format!("SELECT {USER_COLUMNS} FROM users WHERE role = 'dietitian' ORDER BY id"),
            None,
        )
    }

    /// Links `client_id` to a dietitian. Subscribing twice is a no-op; returns
    /// whether a new link was made.
    pub fn subscribe(&self, client_id: i64, dietitian_id: i64) -> Result<bool> {
        if client_id == dietitian_id {
            return Err(TallyError::validation("Cannot subscribe to yourself"));
        }
        let tx = self.write_tx()?;
        ensure_user_exists(&tx, client_id)?;
        load_dietitian(&tx, dietitian_id)?;
        let created = tx.execute(
            "INSERT OR IGNORE INTO dietitian_clients (dietitian_id, client_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![dietitian_id, client_id, now_timestamp()],
        )? > 0;
        tx.commit()?;
        if created {
            tracing::info!(client_id, dietitian_id, "Subscribed to dietitian");
        }
        Ok(created)
    }

    /// Removes the link if there is one; returns whether anything was removed.
    pub fn unsubscribe(&self, client_id: i64, dietitian_id: i64) -> Result<bool> {
        let tx = self.write_tx()?;
        ensure_user_exists(&tx, client_id)?;
        let removed = tx.execute(
            "DELETE FROM dietitian_clients WHERE dietitian_id = ?1 AND client_id = ?2",
            params![dietitian_id, client_id],
        )? > 0;
        tx.commit()?;
        if removed {
            tracing::info!(client_id, dietitian_id, "Unsubscribed from dietitian");
        }
        Ok(removed)
    }

    pub fn list_clients(&self, dietitian_id: i64) -> Result<Vec<UserProfile>> {
        load_dietitian(&self.conn, dietitian_id)?;
        let columns = USER_COLUMNS
            .split(',')
            .map(|c| format!("u.{}", c.trim()))
            .collect::<Vec<_>>()
            .join(", ");
        query_users(
            &self.conn,
            &format!(
                "SELECT {columns} FROM users u
                 JOIN dietitian_clients dc ON dc.client_id = u.id
                 WHERE dc.dietitian_id = ?1
                 ORDER BY u.id"
            ),
            Some(dietitian_id),
        )
    }

    fn require_client(&self, dietitian_id: i64, client_id: i64) -> Result<()> {
        load_dietitian(&self.conn, dietitian_id)?;
        ensure_user_exists(&self.conn, client_id)?;
        if is_linked(&self.conn, dietitian_id, client_id)? {
            Ok(())
        } else {
            Err(TallyError::Forbidden(format!(
                "User {client_id} is not a client of dietitian {dietitian_id}"
            )))
        }
    }

    pub fn client_goals(&self, dietitian_id: i64, client_id: i64) -> Result<UserGoals> {
        self.require_client(dietitian_id, client_id)?;
        self.get_goals(client_id)
    }

    /// Writes a client's goals on the dietitian's behalf, keeping the client's
    /// profile calorie goal in step exactly as a self-service update would.
    pub fn update_client_goals(
        &self,
        dietitian_id: i64,
        client_id: i64,
        update: &GoalsUpdate,
    ) -> Result<UserGoals> {
        self.require_client(dietitian_id, client_id)?;
        let goals = self.update_goals(client_id, update)?;
        tracing::info!(dietitian_id, client_id, "Client goals updated by dietitian");
        Ok(goals)
    }

    pub fn client_progress(&self, dietitian_id: i64, client_id: i64) -> Result<ClientProgress> {
        self.client_progress_at(dietitian_id, client_id, Utc::now().date_naive())
    }

    /// The client's profile and their daily totals for the `PROGRESS_DAYS` ending `today`.
    pub fn client_progress_at(
        &self,
        dietitian_id: i64,
        client_id: i64,
        today: NaiveDate,
    ) -> Result<ClientProgress> {
        self.require_client(dietitian_id, client_id)?;
        let start = today
            .checked_sub_days(Days::new(PROGRESS_DAYS - 1))
            .unwrap_or(today);
        let days = self.history_at(client_id, start, today, today)?;
        Ok(ClientProgress {
            client: self.get_user(client_id)?,
            days,
        })
    }
}
