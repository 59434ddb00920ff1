use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TallyError};

// --- Enumerations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Lose,
    Maintain,
    Gain,
}

impl GoalType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lose => "lose",
            Self::Maintain => "maintain",
            Self::Gain => "gain",
        }
    }

    /// Unknown or empty values fall back to `Maintain`.
    #[must_use]
    pub fn parse_or_default(s: &str) -> Self {
        s.parse().unwrap_or(Self::Maintain)
    }
}

impl FromStr for GoalType {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lose" => Ok(Self::Lose),
            "maintain" => Ok(Self::Maintain),
            "gain" => Ok(Self::Gain),
            other => Err(TallyError::validation(format!(
                "Invalid goal type '{other}'. Must be one of: lose, maintain, gain"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Other => "other",
        }
    }
}

impl FromStr for Gender {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Self::Male),
            "female" => Ok(Self::Female),
            "other" => Ok(Self::Other),
            other => Err(TallyError::validation(format!(
                "Invalid gender '{other}'. Must be one of: male, female, other"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Sedentary,
    Light,
    Moderate,
    Active,
    VeryActive,
}

impl ActivityLevel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sedentary => "sedentary",
            Self::Light => "light",
            Self::Moderate => "moderate",
            Self::Active => "active",
            Self::VeryActive => "very_active",
        }
    }
}

impl FromStr for ActivityLevel {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "sedentary" => Ok(Self::Sedentary),
            "light" => Ok(Self::Light),
            "moderate" => Ok(Self::Moderate),
            "active" => Ok(Self::Active),
            "very_active" => Ok(Self::VeryActive),
            other => Err(TallyError::validation(format!(
                "Invalid activity level '{other}'. Must be one of: sedentary, light, moderate, active, very_active"
            ))),
        }
    }
}

/// Account kind. Dietitians can take on clients and manage their goals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Dietitian,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Dietitian => "dietitian",
        }
    }
}

impl FromStr for Role {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "dietitian" => Ok(Self::Dietitian),
            other => Err(TallyError::validation(format!(
                "Invalid role '{other}'. Must be one of: user, dietitian"
            ))),
        }
    }
}

macro_rules! text_column {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }
    };
}

text_column!(GoalType);
text_column!(Gender);
text_column!(ActivityLevel);
text_column!(Role);

impl FromSql for GoalType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(Self::parse_or_default)
    }
}

impl FromSql for Gender {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: TallyError| FromSqlError::Other(Box::new(e)))
    }
}

impl FromSql for ActivityLevel {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: TallyError| FromSqlError::Other(Box::new(e)))
    }
}

impl FromSql for Role {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: TallyError| FromSqlError::Other(Box::new(e)))
    }
}

// --- Users ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub username: String,
    pub full_name: String,
    pub birthdate: NaiveDate,
    pub gender: Gender,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub activity_level: ActivityLevel,
    pub goal_type: GoalType,
    pub daily_calorie_goal: i64,
    pub role: Role,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUserProfile {
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub full_name: String,
    pub birthdate: NaiveDate,
    pub gender: Gender,
    pub height_cm: f64,
    pub weight_kg: f64,
    pub activity_level: ActivityLevel,
    #[serde(default = "default_goal_type")]
    pub goal_type: GoalType,
    /// Overrides the computed initial goal when set.
    #[serde(default)]
    pub daily_calorie_goal: Option<i64>,
    #[serde(default)]
    pub role: Role,
}

fn default_goal_type() -> GoalType {
    GoalType::Maintain
}

impl NewUserProfile {
    pub fn validate(&self) -> Result<()> {
        if !self.email.contains('@') {
            return Err(TallyError::validation("email must be a valid address"));
        }
        if self.username.trim().is_empty() {
            return Err(TallyError::validation("username must not be empty"));
        }
        validate_body(Some(self.height_cm), Some(self.weight_kg))?;
        if let Some(goal) = self.daily_calorie_goal {
            validate_calorie_goal(goal)?;
        }
        Ok(())
    }
}

/// Partial profile edit. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilePatch {
    pub full_name: Option<String>,
    pub birthdate: Option<NaiveDate>,
    pub gender: Option<Gender>,
    pub height_cm: Option<f64>,
    pub weight_kg: Option<f64>,
    pub activity_level: Option<ActivityLevel>,
    pub goal_type: Option<GoalType>,
    pub daily_calorie_goal: Option<i64>,
}

impl ProfilePatch {
    pub fn validate(&self) -> Result<()> {
        if self.full_name.as_ref().is_some_and(|n| n.trim().is_empty()) {
            return Err(TallyError::validation("full_name must not be empty"));
        }
        validate_body(self.height_cm, self.weight_kg)?;
        if let Some(goal) = self.daily_calorie_goal {
            validate_calorie_goal(goal)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.full_name.is_none()
            && self.birthdate.is_none()
            && self.gender.is_none()
            && self.height_cm.is_none()
            && self.weight_kg.is_none()
            && self.activity_level.is_none()
            && self.goal_type.is_none()
            && self.daily_calorie_goal.is_none()
    }

    /// Applies the patch, returning whether the calorie goal or goal type changed.
    pub fn apply_to(&self, profile: &mut UserProfile) -> bool {
        let before = (profile.daily_calorie_goal, profile.goal_type);
        if let Some(ref name) = self.full_name {
            profile.full_name.clone_from(name);
        }
        if let Some(birthdate) = self.birthdate {
            profile.birthdate = birthdate;
        }
        if let Some(gender) = self.gender {
            profile.gender = gender;
        }
        if let Some(h) = self.height_cm {
            profile.height_cm = h;
        }
        if let Some(w) = self.weight_kg {
            profile.weight_kg = w;
        }
        if let Some(level) = self.activity_level {
            profile.activity_level = level;
        }
        if let Some(goal_type) = self.goal_type {
            profile.goal_type = goal_type;
        }
        if let Some(goal) = self.daily_calorie_goal {
            profile.daily_calorie_goal = goal;
        }
        before != (profile.daily_calorie_goal, profile.goal_type)
    }
}

fn validate_body(height_cm: Option<f64>, weight_kg: Option<f64>) -> Result<()> {
    if height_cm.is_some_and(|h| !h.is_finite() || h <= 0.0) {
        return Err(TallyError::validation("height_cm must be greater than 0"));
    }
    if weight_kg.is_some_and(|w| !w.is_finite() || w <= 0.0) {
        return Err(TallyError::validation("weight_kg must be greater than 0"));
    }
    Ok(())
}

pub fn validate_calorie_goal(calories: i64) -> Result<()> {
    if calories <= 0 {
        return Err(TallyError::validation(
            "Calorie goal must be greater than 0",
        ));
    }
    Ok(())
}

// --- Ledger ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FoodEntry {
    pub id: i64,
    pub user_id: i64,
    pub food_id: String,
    pub name: String,
    pub amount: f64,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub date: DateTime<Utc>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewFoodEntry {
    pub food_id: String,
    pub name: String,
    pub amount: f64,
    pub calories: f64,
    #[serde(default)]
    pub protein: f64,
    #[serde(default)]
    pub carbs: f64,
    #[serde(default)]
    pub fat: f64,
    pub date: DateTime<Utc>,
}

impl NewFoodEntry {
    pub fn validate(&self) -> Result<()> {
        if self.food_id.trim().is_empty() {
            return Err(TallyError::validation("food_id must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(TallyError::validation("Food name must not be empty"));
        }
        if !self.amount.is_finite() || self.amount <= 0.0 {
            return Err(TallyError::validation("amount must be greater than 0"));
        }
        for (field, value) in [
            ("calories", self.calories),
            ("protein", self.protein),
            ("carbs", self.carbs),
            ("fat", self.fat),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(TallyError::validation(format!(
                    "{field} must be a non-negative number"
                )));
            }
        }
        // SQLite's date functions only understand four-digit years.
        if !(0..=9999).contains(&self.date.year()) {
            return Err(TallyError::validation(
                "date must fall between years 0000 and 9999",
            ));
        }
        Ok(())
    }

    /// The (UTC) calendar day this entry is bucketed under.
    #[must_use]
    pub fn day(&self) -> NaiveDate {
        self.date.date_naive()
    }
}

/// Per-day nutrition totals, either materialized or summed from the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyNutrition {
    pub date: NaiveDate,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fats: f64,
}

impl DailyNutrition {
    #[must_use]
    pub fn zero(date: NaiveDate) -> Self {
        Self {
            date,
            calories: 0.0,
            protein: 0.0,
            carbs: 0.0,
            fats: 0.0,
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.calories == 0.0 && self.protein == 0.0 && self.carbs == 0.0 && self.fats == 0.0
    }
}

// --- Goals ---

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserGoals {
    pub user_id: i64,
    pub target_calories: i64,
    pub target_protein: f64,
    pub target_carbs: f64,
    pub target_fats: f64,
    pub target_weight: f64,
}

/// Goal write request. Macros left out (or zero) are derived from the calorie target.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GoalsUpdate {
    pub target_calories: i64,
    #[serde(default)]
    pub target_protein: Option<f64>,
    #[serde(default)]
    pub target_carbs: Option<f64>,
    #[serde(default)]
    pub target_fats: Option<f64>,
    #[serde(default)]
    pub target_weight: Option<f64>,
}

impl GoalsUpdate {
    #[must_use]
    pub fn needs_macro_recompute(&self) -> bool {
        [self.target_protein, self.target_carbs, self.target_fats]
            .into_iter()
            .any(|m| m.is_none_or(|v| v == 0.0))
    }

    pub fn validate(&self) -> Result<()> {
        validate_calorie_goal(self.target_calories)?;
        for (field, value) in [
            ("target_protein", self.target_protein),
            ("target_carbs", self.target_carbs),
            ("target_fats", self.target_fats),
            ("target_weight", self.target_weight),
        ] {
            if value.is_some_and(|v| !v.is_finite() || v < 0.0) {
                return Err(TallyError::validation(format!(
                    "{field} must be a non-negative number"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecalcSummary {
    pub updated: usize,
    pub failed: usize,
}

// --- Dietitians ---

/// A client's profile next to their recent daily totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientProgress {
    pub client: UserProfile,
    pub days: Vec<DailyNutrition>,
}

// --- Timestamps ---

/// Canonical storage form for entry timestamps: RFC 3339, whole seconds, `Z` suffix.
#[must_use]
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a stored entry timestamp, accepting legacy rows written without an offset.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%z", "%Y-%m-%dT%H:%M:%S%.f%z"] {
        if let Ok(ts) = DateTime::parse_from_str(s, fmt) {
            return Some(ts.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

pub fn parse_day(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| TallyError::validation(format!("Invalid date '{s}'. Expected YYYY-MM-DD")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_entry() -> NewFoodEntry {
        NewFoodEntry {
            food_id: "off:123".to_string(),
            name: "Oats".to_string(),
            amount: 80.0,
            calories: 300.0,
            protein: 10.0,
            carbs: 54.0,
            fat: 5.0,
            date: Utc.with_ymd_and_hms(2024, 1, 1, 8, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_goal_type_parse() {
        assert_eq!("lose".parse::<GoalType>().unwrap(), GoalType::Lose);
        assert_eq!("GAIN".parse::<GoalType>().unwrap(), GoalType::Gain);
        assert!("bulk".parse::<GoalType>().is_err());
    }

    #[test]
    fn test_goal_type_parse_or_default() {
        assert_eq!(GoalType::parse_or_default(""), GoalType::Maintain);
        assert_eq!(GoalType::parse_or_default("cut"), GoalType::Maintain);
        assert_eq!(GoalType::parse_or_default("lose"), GoalType::Lose);
    }

    #[test]
    fn test_role_parse_and_default() {
        assert_eq!("Dietitian".parse::<Role>().unwrap(), Role::Dietitian);
        assert!("admin".parse::<Role>().is_err());
        assert_eq!(Role::default(), Role::User);
        assert_eq!(Role::Dietitian.to_string(), "dietitian");
    }

    #[test]
    fn test_activity_level_accepts_hyphen() {
        assert_eq!(
            "very-active".parse::<ActivityLevel>().unwrap(),
            ActivityLevel::VeryActive
        );
        assert_eq!(ActivityLevel::VeryActive.to_string(), "very_active");
    }

    #[test]
    fn test_new_entry_validation() {
        assert!(sample_entry().validate().is_ok());

        let mut zero_amount = sample_entry();
        zero_amount.amount = 0.0;
        assert!(zero_amount.validate().is_err());

        let mut negative_fat = sample_entry();
        negative_fat.fat = -1.0;
        assert!(negative_fat.validate().is_err());

        let mut nan_calories = sample_entry();
        nan_calories.calories = f64::NAN;
        assert!(nan_calories.validate().is_err());

        let mut blank_name = sample_entry();
        blank_name.name = "  ".to_string();
        assert!(blank_name.validate().is_err());
    }

    #[test]
    fn test_new_entry_year_range() {
        let mut far_future = sample_entry();
        far_future.date = Utc.with_ymd_and_hms(10000, 1, 1, 12, 0, 0).unwrap();
        assert!(matches!(far_future.validate(), Err(TallyError::Validation(_))));

        let mut before_epoch = sample_entry();
        before_epoch.date = Utc.with_ymd_and_hms(-1, 12, 31, 12, 0, 0).unwrap();
        assert!(before_epoch.validate().is_err());

        let mut last_year = sample_entry();
        last_year.date = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        assert!(last_year.validate().is_ok());
    }

    #[test]
    fn test_entry_day_is_utc() {
        let mut entry = sample_entry();
        entry.date = Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap();
        assert_eq!(entry.day(), NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
    }

    #[test]
    fn test_goals_update_needs_recompute() {
        let full = GoalsUpdate {
            target_calories: 2000,
            target_protein: Some(150.0),
            target_carbs: Some(200.0),
            target_fats: Some(60.0),
            target_weight: None,
        };
        assert!(!full.needs_macro_recompute());

        let zero_carbs = GoalsUpdate {
            target_carbs: Some(0.0),
            ..full.clone()
        };
        assert!(zero_carbs.needs_macro_recompute());

        let missing_fat = GoalsUpdate {
            target_fats: None,
            ..full
        };
        assert!(missing_fat.needs_macro_recompute());
    }

    #[test]
    fn test_goals_update_rejects_non_positive_calories() {
        let update = GoalsUpdate {
            target_calories: 0,
            ..GoalsUpdate::default()
        };
        assert!(update.validate().is_err());
    }

    #[test]
    fn test_profile_patch_reports_goal_changes() {
        let mut profile = UserProfile {
            id: 1,
            email: "a@example.com".to_string(),
            username: "a".to_string(),
            full_name: "A".to_string(),
            birthdate: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            gender: Gender::Female,
            height_cm: 165.0,
            weight_kg: 60.0,
            activity_level: ActivityLevel::Light,
            goal_type: GoalType::Maintain,
            daily_calorie_goal: 2000,
            role: Role::User,
            created_at: String::new(),
            updated_at: String::new(),
        };

        let weight_only = ProfilePatch {
            weight_kg: Some(59.0),
            ..ProfilePatch::default()
        };
        assert!(!weight_only.apply_to(&mut profile));
        assert_eq!(profile.weight_kg, 59.0);

        let same_goal = ProfilePatch {
            daily_calorie_goal: Some(2000),
            ..ProfilePatch::default()
        };
        assert!(!same_goal.apply_to(&mut profile));

        let new_type = ProfilePatch {
            goal_type: Some(GoalType::Lose),
            ..ProfilePatch::default()
        };
        assert!(new_type.apply_to(&mut profile));
        assert_eq!(profile.goal_type, GoalType::Lose);
    }

    #[test]
    fn test_profile_patch_validation() {
        assert!(ProfilePatch::default().validate().is_ok());
        assert!(ProfilePatch::default().is_empty());
        let bad = ProfilePatch {
            height_cm: Some(-5.0),
            ..ProfilePatch::default()
        };
        assert!(bad.validate().is_err());
        let bad_goal = ProfilePatch {
            daily_calorie_goal: Some(0),
            ..ProfilePatch::default()
        };
        assert!(bad_goal.validate().is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T14:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01 12:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-01-01T12:00:00+0000"), Some(expected));
        assert_eq!(
            parse_timestamp("2024-01-01"),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_format_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-03-05T07:08:09Z");
    }

    #[test]
    fn test_parse_day() {
        assert_eq!(
            parse_day("2024-02-29").unwrap(),
            NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()
        );
        assert!(parse_day("2024-13-01").is_err());
    }
}
