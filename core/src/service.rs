use std::path::Path;

use chrono::{NaiveDate, Utc};

use crate::db::Database;
use crate::error::{Result, TallyError};
use crate::history::default_history_range;
use crate::models::{
    ClientProgress, DailyNutrition, FoodEntry, GoalsUpdate, NewFoodEntry, NewUserProfile,
    ProfilePatch, RecalcSummary, UserGoals, UserProfile, parse_day,
};

/// String-in, struct-out front door over [`Database`] for callers that speak
/// `YYYY-MM-DD` dates and want "today" resolved in UTC for them.
pub struct TallyService {
    db: Database,
}

impl TallyService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db })
    }

    #[must_use]
    pub fn from_db(db: Database) -> Self {
        Self { db }
    }

    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    #[must_use]
    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    fn day_or_today(date: Option<&str>) -> Result<NaiveDate> {
        match date {
            Some(s) if !s.trim().is_empty() => parse_day(s.trim()),
            _ => Ok(Self::today()),
        }
    }

    // --- Users ---

    pub fn create_user(&self, user: &NewUserProfile) -> Result<UserProfile> {
        self.db.create_user(user, Self::today())
    }

    pub fn get_user(&self, user_id: i64) -> Result<UserProfile> {
        self.db.get_user(user_id)
    }

    pub fn list_users(&self) -> Result<Vec<UserProfile>> {
        self.db.list_users()
    }

    pub fn update_profile(&self, user_id: i64, patch: &ProfilePatch) -> Result<UserProfile> {
        self.db.update_profile(user_id, patch)
    }

    pub fn delete_user(&self, user_id: i64) -> Result<()> {
        self.db.delete_user(user_id)
    }

    // --- Goals ---

    pub fn get_goals(&self, user_id: i64) -> Result<UserGoals> {
        self.db.get_goals(user_id)
    }

    pub fn update_goals(&self, user_id: i64, update: &GoalsUpdate) -> Result<UserGoals> {
        self.db.update_goals(user_id, update)
    }

    pub fn sync_calorie_goal(&self, user_id: i64, calorie_goal: i64) -> Result<UserGoals> {
        self.db.sync_calorie_goal(user_id, calorie_goal)
    }

    pub fn recalculate_all_goals(&self) -> Result<RecalcSummary> {
        self.db.recalculate_all_goals()
    }

    // --- Ledger ---

    pub fn record_entry(&self, user_id: i64, entry: &NewFoodEntry) -> Result<FoodEntry> {
        self.db.record_entry(user_id, entry)
    }

    pub fn delete_entry(&self, user_id: i64, entry_id: i64) -> Result<()> {
        self.db.delete_entry_for_user(user_id, entry_id)
    }

    /// Entries for `date`, or for today when no date is given.
    pub fn list_daily_entries(&self, user_id: i64, date: Option<&str>) -> Result<Vec<FoodEntry>> {
        let day = Self::day_or_today(date)?;
        self.db.list_daily_entries(user_id, day)
    }

    pub fn daily_nutrition(&self, user_id: i64, date: Option<&str>) -> Result<DailyNutrition> {
        let day = Self::day_or_today(date)?;
        self.db.daily_nutrition(user_id, day)
    }

    // --- Dietitians ---

    pub fn list_dietitians(&self) -> Result<Vec<UserProfile>> {
        self.db.list_dietitians()
    }

    pub fn subscribe(&self, client_id: i64, dietitian_id: i64) -> Result<bool> {
        self.db.subscribe(client_id, dietitian_id)
    }

    pub fn unsubscribe(&self, client_id: i64, dietitian_id: i64) -> Result<bool> {
        self.db.unsubscribe(client_id, dietitian_id)
    }

    pub fn list_clients(&self, dietitian_id: i64) -> Result<Vec<UserProfile>> {
        self.db.list_clients(dietitian_id)
    }

    pub fn client_goals(&self, dietitian_id: i64, client_id: i64) -> Result<UserGoals> {
        self.db.client_goals(dietitian_id, client_id)
    }

    pub fn update_client_goals(
        &self,
        dietitian_id: i64,
        client_id: i64,
        update: &GoalsUpdate,
    ) -> Result<UserGoals> {
        self.db.update_client_goals(dietitian_id, client_id, update)
    }

    pub fn client_progress(&self, dietitian_id: i64, client_id: i64) -> Result<ClientProgress> {
        self.db.client_progress_at(dietitian_id, client_id, Self::today())
    }

    // --- History ---

    /// History for an explicit range, or the last week when either bound is missing.
    pub fn history(
        &self,
        user_id: i64,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Vec<DailyNutrition>> {
        let today = Self::today();
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) if !s.trim().is_empty() && !e.trim().is_empty() => {
                let start = parse_day(s.trim())
                    .map_err(|_| TallyError::validation("Invalid start date format. Use YYYY-MM-DD"))?;
                let end = parse_day(e.trim())
                    .map_err(|_| TallyError::validation("Invalid end date format. Use YYYY-MM-DD"))?;
                (start, end)
            }
            _ => default_history_range(today),
        };
        self.db.history_at(user_id, start, end, today)
    }
}
