//! Pure calculators: macro splits by goal type and the initial daily calorie goal.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;

use crate::models::{ActivityLevel, Gender, GoalType};

pub const KCAL_PER_G_PROTEIN: f64 = 4.0;
pub const KCAL_PER_G_CARBS: f64 = 4.0;
pub const KCAL_PER_G_FAT: f64 = 9.0;

/// Daily adjustment applied on top of maintenance calories for lose/gain goals.
pub const GOAL_ADJUSTMENT_KCAL: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacroSplit {
    pub protein_g: f64,
    pub carbs_g: f64,
    pub fat_g: f64,
}

/// Calorie fractions as (protein, fat, carbs).
fn split_fractions(goal_type: GoalType) -> (f64, f64, f64) {
    match goal_type {
        GoalType::Lose => (0.35, 0.35, 0.30),
        GoalType::Maintain => (0.25, 0.25, 0.50),
        GoalType::Gain => (0.30, 0.25, 0.45),
    }
}

#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn compute_macros(calorie_target: i64, goal_type: GoalType) -> MacroSplit {
    let calories = calorie_target.max(0) as f64;
    let (protein, fat, carbs) = split_fractions(goal_type);
    MacroSplit {
        protein_g: calories * protein / KCAL_PER_G_PROTEIN,
        carbs_g: calories * carbs / KCAL_PER_G_CARBS,
        fat_g: calories * fat / KCAL_PER_G_FAT,
    }
}

fn activity_multiplier(level: ActivityLevel) -> f64 {
    match level {
        ActivityLevel::Sedentary => 1.2,
        ActivityLevel::Light => 1.375,
        ActivityLevel::Moderate => 1.55,
        ActivityLevel::Active => 1.725,
        ActivityLevel::VeryActive => 1.9,
    }
}

/// Whole years between `birthdate` and `today`, never negative.
#[must_use]
pub fn age_in_years(birthdate: NaiveDate, today: NaiveDate) -> i64 {
    let mut age = i64::from(today.year() - birthdate.year());
    if (today.month(), today.day()) < (birthdate.month(), birthdate.day()) {
        age -= 1;
    }
    age.max(0)
}

/// Mifflin-St Jeor BMR scaled by activity, shifted by the goal adjustment, truncated.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn initial_calorie_goal(
    weight_kg: f64,
    height_cm: f64,
    gender: Gender,
    age_years: i64,
    activity: ActivityLevel,
    goal_type: GoalType,
) -> i64 {
    let base = 10.0 * weight_kg + 6.25 * height_cm - 5.0 * age_years as f64;
    let bmr = match gender {
        Gender::Male => base + 5.0,
        Gender::Female | Gender::Other => base - 161.0,
    };
    let maintenance = bmr * activity_multiplier(activity);
    let adjusted = match goal_type {
        GoalType::Lose => maintenance - GOAL_ADJUSTMENT_KCAL,
        GoalType::Maintain => maintenance,
        GoalType::Gain => maintenance + GOAL_ADJUSTMENT_KCAL,
    };
    (adjusted.trunc() as i64).max(0)
}
