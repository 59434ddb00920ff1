use anyhow::Result;
use chrono::{DateTime, Utc};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use tally_core::models::{FoodEntry, NewFoodEntry};
use tally_core::service::TallyService;

use super::helpers::{json_error, no_neg_zero, parse_date, print_json, slugify, truncate};

/// A food logged from the command line, before it is turned into a ledger entry.
pub(crate) struct LogRequest {
    pub name: String,
    pub food_id: Option<String>,
    pub amount: f64,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
}

impl LogRequest {
    pub(crate) fn into_entry(self, date: DateTime<Utc>) -> NewFoodEntry {
        let food_id = self
            .food_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| slugify(&self.name));
        NewFoodEntry {
            food_id,
            name: self.name.trim().to_string(),
            amount: self.amount,
            calories: self.calories,
            protein: self.protein,
            carbs: self.carbs,
            fat: self.fat,
            date,
        }
    }
}

pub(crate) fn cmd_log(
    svc: &TallyService,
    user_id: i64,
    request: LogRequest,
    date: DateTime<Utc>,
    json: bool,
) -> Result<()> {
    let entry = svc.record_entry(user_id, &request.into_entry(date))?;

    if json {
        return print_json(&entry);
    }

    let day = entry.date.date_naive();
    println!(
        "Logged [{}] {} ({}) on {day}: {:.0} kcal | P:{:.1}g C:{:.1}g F:{:.1}g",
        entry.id, entry.name, entry.amount, entry.calories, entry.protein, entry.carbs, entry.fat
    );
    let totals = svc.daily_nutrition(user_id, Some(&day.format("%Y-%m-%d").to_string()))?;
    println!("Day total: {:.0} kcal", no_neg_zero(totals.calories));
    Ok(())
}

pub(crate) fn cmd_delete(svc: &TallyService, user_id: i64, entry_id: i64, json: bool) -> Result<()> {
    match svc.delete_entry(user_id, entry_id) {
        Ok(()) => {
            if json {
                println!("{}", serde_json::json!({ "deleted": entry_id }));
            } else {
                println!("Deleted entry {entry_id}");
            }
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            if json {
                println!("{}", json_error(&e.to_string()));
            } else {
                eprintln!("{e}");
            }
            process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn cmd_entries(
    svc: &TallyService,
    user_id: i64,
    date: Option<&str>,
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Time (UTC)")]
        time: String,
        #[tabled(rename = "Food")]
        name: String,
        #[tabled(rename = "Amount")]
        amount: String,
        #[tabled(rename = "Calories")]
        calories: String,
        #[tabled(rename = "Protein")]
        protein: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Fat")]
        fat: String,
    }

    let day = parse_date(date)?;
    let day_str = day.format("%Y-%m-%d").to_string();
    let entries: Vec<FoodEntry> = svc.list_daily_entries(user_id, Some(&day_str))?;

    if json {
        return print_json(&entries);
    }

    if entries.is_empty() {
        eprintln!("No entries for {day}");
        process::exit(2);
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|e| EntryRow {
            id: e.id,
            time: e.date.format("%H:%M").to_string(),
            name: truncate(&e.name, 35),
            amount: format!("{}", e.amount),
            calories: format!("{:.0}", e.calories),
            protein: format!("{:.1}g", e.protein),
            carbs: format!("{:.1}g", e.carbs),
            fat: format!("{:.1}g", e.fat),
        })
        .collect();

    println!("=== {day} ===\n");
    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(3..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
