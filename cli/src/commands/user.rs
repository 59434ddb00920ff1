use anyhow::{Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use tally_core::models::{NewUserProfile, ProfilePatch, UserProfile};
use tally_core::service::TallyService;

use super::helpers::{print_json, truncate};

fn print_profile(user: &UserProfile) {
    println!("User #{} ({})", user.id, user.username);
    println!("  Name:       {}", user.full_name);
    println!("  Email:      {}", user.email);
    println!("  Born:       {}", user.birthdate);
    println!("  Gender:     {}", user.gender);
    println!("  Height:     {:.1} cm", user.height_cm);
    println!("  Weight:     {:.1} kg", user.weight_kg);
    println!("  Activity:   {}", user.activity_level);
    println!("  Goal:       {}", user.goal_type);
    println!("  Calories:   {} kcal/day", user.daily_calorie_goal);
    println!("  Role:       {}", user.role);
}

pub(crate) fn cmd_user_create(svc: &TallyService, user: &NewUserProfile, json: bool) -> Result<()> {
    let created = svc.create_user(user)?;
    if json {
        return print_json(&created);
    }
    println!("Created user #{} ({})", created.id, created.username);
    println!(
        "Daily goal: {} kcal ({})",
        created.daily_calorie_goal, created.goal_type
    );
    Ok(())
}

pub(crate) fn cmd_user_show(svc: &TallyService, user_id: i64, json: bool) -> Result<()> {
    let user = svc.get_user(user_id)?;
    if json {
        return print_json(&user);
    }
    print_profile(&user);
    Ok(())
}

pub(crate) fn cmd_user_update(
    svc: &TallyService,
    user_id: i64,
    patch: &ProfilePatch,
    json: bool,
) -> Result<()> {
    if patch.is_empty() {
        bail!("Nothing to update. Pass at least one field (see `tally user update --help`)");
    }
    let user = svc.update_profile(user_id, patch)?;
    if json {
        return print_json(&user);
    }
    println!("Updated user #{}", user.id);
    print_profile(&user);
    Ok(())
}

pub(crate) fn cmd_user_delete(svc: &TallyService, user_id: i64, json: bool) -> Result<()> {
    svc.delete_user(user_id)?;
    if json {
        println!("{}", serde_json::json!({ "deleted": user_id }));
    } else {
        println!("Deleted user #{user_id} and all of their entries");
    }
    Ok(())
}

/// Prints users as a table. Exits with code 2 and `empty_hint` when there are none.
pub(super) fn print_users(users: &[UserProfile], empty_hint: &str) {
    #[derive(Tabled)]
    struct UserRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Username")]
        username: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Goal")]
        goal: String,
        #[tabled(rename = "Role")]
        role: String,
        #[tabled(rename = "kcal/day")]
        calories: i64,
    }

    if users.is_empty() {
        eprintln!("{empty_hint}");
        process::exit(2);
    }

    let rows: Vec<UserRow> = users
        .iter()
        .map(|u| UserRow {
            id: u.id,
            username: truncate(&u.username, 24),
            name: truncate(&u.full_name, 30),
            goal: u.goal_type.to_string(),
            role: u.role.to_string(),
            calories: u.daily_calorie_goal,
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(5..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn cmd_user_list(svc: &TallyService, json: bool) -> Result<()> {
    let users = svc.list_users()?;
    if json {
        return print_json(&users);
    }
    print_users(&users, "No users yet. Create one with `tally user create`");
    Ok(())
}
