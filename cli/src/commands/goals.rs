use anyhow::Result;

use tally_core::models::{GoalsUpdate, UserGoals};
use tally_core::service::TallyService;

use super::helpers::print_json;

pub(super) fn print_goals(goals: &UserGoals) {
    println!("Goals for user #{}", goals.user_id);
    println!("  Calories: {} kcal/day", goals.target_calories);
    println!("  Protein:  {:.1} g", goals.target_protein);
    println!("  Carbs:    {:.1} g", goals.target_carbs);
    println!("  Fat:      {:.1} g", goals.target_fats);
    println!("  Weight:   {:.1} kg", goals.target_weight);
}

pub(crate) fn cmd_goals_show(svc: &TallyService, user_id: i64, json: bool) -> Result<()> {
    let goals = svc.get_goals(user_id)?;
    if json {
        return print_json(&goals);
    }
    print_goals(&goals);
    Ok(())
}

pub(crate) fn cmd_goals_set(
    svc: &TallyService,
    user_id: i64,
    update: &GoalsUpdate,
    json: bool,
) -> Result<()> {
    let goals = svc.update_goals(user_id, update)?;
    if json {
        return print_json(&goals);
    }
    if update.needs_macro_recompute() {
        println!("Macros derived from the calorie target and goal type.");
    }
    print_goals(&goals);
    Ok(())
}

pub(crate) fn cmd_goals_sync(
    svc: &TallyService,
    user_id: i64,
    calories: i64,
    json: bool,
) -> Result<()> {
    let goals = svc.sync_calorie_goal(user_id, calories)?;
    if json {
        return print_json(&goals);
    }
    println!("Profile and goals set to {calories} kcal/day");
    print_goals(&goals);
    Ok(())
}

pub(crate) fn cmd_goals_recalc(svc: &TallyService, json: bool) -> Result<()> {
    let summary = svc.recalculate_all_goals()?;
    if json {
        return print_json(&summary);
    }
    println!(
        "Recalculated goals for {} user(s), {} failed",
        summary.updated, summary.failed
    );
    Ok(())
}
