use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use tally_core::models::{DailyNutrition, UserGoals};
use tally_core::service::TallyService;

use super::helpers::{no_neg_zero, parse_date, print_json};

#[allow(clippy::cast_precision_loss)]
fn print_remaining(totals: &DailyNutrition, goals: &UserGoals) {
    let tcal = goals.target_calories;
    println!(
        "  TARGET: {tcal} kcal | P:{:.0}g C:{:.0}g F:{:.0}g",
        goals.target_protein, goals.target_carbs, goals.target_fats
    );
    let rcal = tcal as f64 - totals.calories;
    let rp = goals.target_protein - totals.protein;
    let rc = goals.target_carbs - totals.carbs;
    let rf = goals.target_fats - totals.fats;
    println!("  REMAINING: {rcal:.0} kcal | P:{rp:.0}g C:{rc:.0}g F:{rf:.0}g");
}

pub(crate) fn cmd_summary(
    svc: &TallyService,
    user_id: i64,
    date: Option<&str>,
    json: bool,
) -> Result<()> {
    let day = parse_date(date)?.format("%Y-%m-%d").to_string();
    let totals = svc.daily_nutrition(user_id, Some(&day))?;
    let goals = svc.get_goals(user_id)?;

    if json {
        return print_json(&serde_json::json!({
            "nutrition": totals,
            "goals": goals,
        }));
    }

    println!("=== {day} ===\n");
    let cal = no_neg_zero(totals.calories);
    let p = no_neg_zero(totals.protein);
    let c = no_neg_zero(totals.carbs);
    let f = no_neg_zero(totals.fats);
    println!("  TOTAL: {cal:.0} kcal | P:{p:.0}g C:{c:.0}g F:{f:.0}g");
    print_remaining(&totals, &goals);
    Ok(())
}

/// Prints one row per day plus the average. Exits with code 2 when every day is empty.
pub(super) fn print_days(days: &[DailyNutrition]) {
    #[derive(Tabled)]
    struct HistoryRow {
        #[tabled(rename = "Date")]
        date: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
    }

    if days.iter().all(DailyNutrition::is_zero) {
        eprintln!("No entries between {} and {}", first_day(days), last_day(days));
        process::exit(2);
    }

    let rows: Vec<HistoryRow> = days
        .iter()
        .map(|d| {
            let cal = no_neg_zero(d.calories);
            let p = no_neg_zero(d.protein);
            let c = no_neg_zero(d.carbs);
            let f = no_neg_zero(d.fats);
            HistoryRow {
                date: d.date.to_string(),
                calories: format!("{cal:.0}"),
                protein: format!("{p:.0}g"),
                carbs: format!("{c:.0}g"),
                fat: format!("{f:.0}g"),
            }
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    #[allow(clippy::cast_precision_loss)]
    let avg = days.iter().map(|d| d.calories).sum::<f64>() / days.len() as f64;
    println!("Average: {:.0} kcal/day over {} days", no_neg_zero(avg), days.len());
}

pub(crate) fn cmd_history(
    svc: &TallyService,
    user_id: i64,
    start: Option<&str>,
    end: Option<&str>,
    json: bool,
) -> Result<()> {
    let start = start.map(|s| parse_date(Some(s))).transpose()?;
    let end = end.map(|s| parse_date(Some(s))).transpose()?;
    let start = start.map(|d| d.format("%Y-%m-%d").to_string());
    let end = end.map(|d| d.format("%Y-%m-%d").to_string());
    let days = svc.history(user_id, start.as_deref(), end.as_deref())?;

    if json {
        return print_json(&days);
    }
    print_days(&days);
    Ok(())
}

fn first_day(days: &[DailyNutrition]) -> String {
    days.first().map(|d| d.date.to_string()).unwrap_or_default()
}

fn last_day(days: &[DailyNutrition]) -> String {
    days.last().map(|d| d.date.to_string()).unwrap_or_default()
}
