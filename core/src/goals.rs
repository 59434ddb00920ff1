use rusqlite::{Connection, OptionalExtension, params};

use crate::db::{Database, now_timestamp};
use crate::error::Result;
use crate::macros::compute_macros;
use crate::models::{
    GoalsUpdate, ProfilePatch, RecalcSummary, UserGoals, UserProfile, validate_calorie_goal,
};
use crate::users::load_user;

pub(crate) fn write_goal_row(conn: &Connection, goals: &UserGoals) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO user_goals (user_id, target_calories, target_protein, target_carbs,
                                 target_fats, target_weight, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(user_id) DO UPDATE SET
             target_calories = excluded.target_calories,
             target_protein = excluded.target_protein,
             target_carbs = excluded.target_carbs,
             target_fats = excluded.target_fats,
             target_weight = excluded.target_weight,
             updated_at = excluded.updated_at",
        params![
            goals.user_id,
            goals.target_calories,
            goals.target_protein,
            goals.target_carbs,
            goals.target_fats,
            goals.target_weight,
            now_timestamp(),
        ],
    )?;
    Ok(())
}

fn load_goal_row(conn: &Connection, user_id: i64) -> rusqlite::Result<Option<UserGoals>> {
    conn.query_row(
        "SELECT user_id, target_calories, target_protein, target_carbs, target_fats, target_weight
         FROM user_goals WHERE user_id = ?1",
        params![user_id],
        Database::goals_from_row,
    )
    .optional()
}

/// The only place the calorie pair is written: profile field and goal row together.
fn write_goal_pair(conn: &Connection, goals: &UserGoals) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE users SET daily_calorie_goal = ?1, updated_at = ?2 WHERE id = ?3",
        params![goals.target_calories, now_timestamp(), goals.user_id],
    )?;
    write_goal_row(conn, goals)
}

/// Goals derived entirely from the profile's calorie goal and goal type.
pub(crate) fn derived_goals(profile: &UserProfile, calorie_goal: i64, target_weight: f64) -> UserGoals {
    let split = compute_macros(calorie_goal, profile.goal_type);
    UserGoals {
        user_id: profile.id,
        target_calories: calorie_goal,
        target_protein: split.protein_g,
        target_carbs: split.carbs_g,
        target_fats: split.fat_g,
        target_weight,
    }
}

/// Re-derives macros for `calorie_goal` and writes the pair. Without an explicit
/// target weight the stored one is kept, falling back to body weight.
fn sync_in_tx(
    conn: &Connection,
    profile: &UserProfile,
    calorie_goal: i64,
    target_weight: Option<f64>,
) -> Result<UserGoals> {
    let target_weight = match target_weight {
        Some(w) => w,
        None => load_goal_row(conn, profile.id)?.map_or(profile.weight_kg, |g| g.target_weight),
    };
    let goals = derived_goals(profile, calorie_goal, target_weight);
    write_goal_pair(conn, &goals)?;
    Ok(goals)
}

impl Database {
    // --- Goals ---

    /// Reads a user's goals, reconciling them with the profile.
    ///
    /// A user without a goal row gets one synthesized from the profile and persisted
    /// before returning, so this read may write. When the stored calorie target has
    /// drifted from the profile's `daily_calorie_goal`, the profile wins: the returned
    /// goals carry the profile value and the row is rewritten on a best-effort basis
    /// (a failed rewrite is logged, not returned).
    pub fn get_goals(&self, user_id: i64) -> Result<UserGoals> {
        let profile = load_user(&self.conn, user_id)?;

        let Some(mut goals) = load_goal_row(&self.conn, user_id)? else {
            let goals = derived_goals(&profile, profile.daily_calorie_goal, profile.weight_kg);
            let tx = self.write_tx()?;
            write_goal_row(&tx, &goals)?;
            tx.commit()?;
            tracing::info!(user_id, target_calories = goals.target_calories, "Goals initialized from profile");
            return Ok(goals);
        };

        if goals.target_calories != profile.daily_calorie_goal {
            tracing::warn!(
                user_id,
                profile_calories = profile.daily_calorie_goal,
                goal_calories = goals.target_calories,
                "Calorie goal mismatch, repairing from profile"
            );
            goals.target_calories = profile.daily_calorie_goal;
            if let Err(e) = write_goal_row(&self.conn, &goals) {
                tracing::warn!(user_id, error = %e, "Failed to repair goal calories");
            }
        }

        Ok(goals)
    }

    /// Stores explicit goals. Missing or zero macros are all recomputed from the
    /// calorie target and the user's goal type. The profile calorie goal follows
    /// in the same transaction.
    pub fn update_goals(&self, user_id: i64, update: &GoalsUpdate) -> Result<UserGoals> {
        update.validate()?;

        let tx = self.write_tx()?;
        let profile = load_user(&tx, user_id)?;
        let existing = load_goal_row(&tx, user_id)?;
        let target_weight = update
            .target_weight
            .or(existing.map(|g| g.target_weight))
            .unwrap_or(profile.weight_kg);

        let goals = match (update.target_protein, update.target_carbs, update.target_fats) {
            (Some(protein), Some(carbs), Some(fats)) if !update.needs_macro_recompute() => {
                UserGoals {
                    user_id,
                    target_calories: update.target_calories,
                    target_protein: protein,
                    target_carbs: carbs,
                    target_fats: fats,
                    target_weight,
                }
            }
            _ => derived_goals(&profile, update.target_calories, target_weight),
        };

        write_goal_pair(&tx, &goals)?;
        tx.commit()?;
        tracing::info!(user_id, target_calories = goals.target_calories, "Goals updated");
        Ok(goals)
    }

    /// Applies a profile edit. A changed calorie goal or goal type re-derives the
    /// goal macros inside the same transaction; other edits leave goals alone.
    pub fn update_profile(&self, user_id: i64, patch: &ProfilePatch) -> Result<UserProfile> {
        patch.validate()?;

        let tx = self.write_tx()?;
        let mut profile = load_user(&tx, user_id)?;
        let previous_goal = profile.daily_calorie_goal;
        let goals_changed = patch.apply_to(&mut profile);

        tx.execute(
            "UPDATE users SET full_name = ?1, birthdate = ?2, gender = ?3, height_cm = ?4,
                              weight_kg = ?5, activity_level = ?6, goal_type = ?7,
                              daily_calorie_goal = ?8, updated_at = ?9
             WHERE id = ?10",
            params![
                profile.full_name,
                profile.birthdate.format("%Y-%m-%d").to_string(),
                profile.gender,
                profile.height_cm,
                profile.weight_kg,
                profile.activity_level,
                profile.goal_type,
                profile.daily_calorie_goal,
                now_timestamp(),
                user_id,
            ],
        )?;

        if goals_changed {
            sync_in_tx(&tx, &profile, profile.daily_calorie_goal, None)?;
            tracing::info!(
                user_id,
                from = previous_goal,
                to = profile.daily_calorie_goal,
                goal_type = %profile.goal_type,
                "Calorie goal changed, goals resynced"
            );
        }

        let updated = load_user(&tx, user_id)?;
        tx.commit()?;
        Ok(updated)
    }

    /// Sets the user's calorie goal and re-derives macros from their goal type,
    /// writing profile and goals atomically.
    pub fn sync_calorie_goal(&self, user_id: i64, calorie_goal: i64) -> Result<UserGoals> {
        validate_calorie_goal(calorie_goal)?;

        let tx = self.write_tx()?;
        let profile = load_user(&tx, user_id)?;
        let goals = sync_in_tx(&tx, &profile, calorie_goal, None)?;
        tx.commit()?;
        tracing::info!(user_id, calorie_goal, "Calorie goal synced");
        Ok(goals)
    }

    /// Rebuilds every user's goals from their profile. Each user commits on their own,
    /// so one failure doesn't block the rest.
    pub fn recalculate_all_goals(&self) -> Result<RecalcSummary> {
        let mut summary = RecalcSummary::default();
        for user_id in self.list_user_ids()? {
            match self.recalculate_goals(user_id) {
                Ok(_) => summary.updated += 1,
                Err(e) => {
                    tracing::warn!(user_id, error = %e, "Failed to recalculate goals");
                    summary.failed += 1;
                }
            }
        }
        tracing::info!(updated = summary.updated, failed = summary.failed, "Goal recalculation finished");
        Ok(summary)
    }

    fn recalculate_goals(&self, user_id: i64) -> Result<UserGoals> {
        let tx = self.write_tx()?;
        let profile = load_user(&tx, user_id)?;
        let goals = sync_in_tx(
            &tx,
            &profile,
            profile.daily_calorie_goal,
            Some(profile.weight_kg),
        )?;
        tx.commit()?;
        Ok(goals)
    }
}
