use anyhow::Result;

use tally_core::models::GoalsUpdate;
use tally_core::service::TallyService;

use super::goals::print_goals;
use super::helpers::print_json;
use super::summary::print_days;
use super::user::print_users;

pub(crate) fn cmd_dietitian_list(svc: &TallyService, json: bool) -> Result<()> {
    let dietitians = svc.list_dietitians()?;
    if json {
        return print_json(&dietitians);
    }
    print_users(
        &dietitians,
        "No dietitians registered. Create one with `tally user create --role dietitian`",
    );
    Ok(())
}

pub(crate) fn cmd_subscribe(
    svc: &TallyService,
    user_id: i64,
    dietitian_id: i64,
    json: bool,
) -> Result<()> {
    let created = svc.subscribe(user_id, dietitian_id)?;
    if json {
        return print_json(&serde_json::json!({
            "dietitian_id": dietitian_id,
            "subscribed": true,
            "created": created,
        }));
    }
    if created {
        println!("Subscribed to dietitian #{dietitian_id}");
    } else {
        println!("Already subscribed to dietitian #{dietitian_id}");
    }
    Ok(())
}

pub(crate) fn cmd_unsubscribe(
    svc: &TallyService,
    user_id: i64,
    dietitian_id: i64,
    json: bool,
) -> Result<()> {
    let removed = svc.unsubscribe(user_id, dietitian_id)?;
    if json {
        return print_json(&serde_json::json!({
            "dietitian_id": dietitian_id,
            "removed": removed,
        }));
    }
    if removed {
        println!("Unsubscribed from dietitian #{dietitian_id}");
    } else {
        println!("Not subscribed to dietitian #{dietitian_id}");
    }
    Ok(())
}

pub(crate) fn cmd_clients(svc: &TallyService, dietitian_id: i64, json: bool) -> Result<()> {
    let clients = svc.list_clients(dietitian_id)?;
    if json {
        return print_json(&clients);
    }
    print_users(&clients, "No clients yet");
    Ok(())
}

pub(crate) fn cmd_client_goals(
    svc: &TallyService,
    dietitian_id: i64,
    client_id: i64,
    json: bool,
) -> Result<()> {
    let goals = svc.client_goals(dietitian_id, client_id)?;
    if json {
        return print_json(&goals);
    }
    print_goals(&goals);
    Ok(())
}

pub(crate) fn cmd_set_client_goals(
    svc: &TallyService,
    dietitian_id: i64,
    client_id: i64,
    update: &GoalsUpdate,
    json: bool,
) -> Result<()> {
    let goals = svc.update_client_goals(dietitian_id, client_id, update)?;
    if json {
        return print_json(&goals);
    }
    println!("Updated goals for client #{client_id}");
    print_goals(&goals);
    Ok(())
}

pub(crate) fn cmd_client_progress(
    svc: &TallyService,
    dietitian_id: i64,
    client_id: i64,
    json: bool,
) -> Result<()> {
    let progress = svc.client_progress(dietitian_id, client_id)?;
    if json {
        return print_json(&progress);
    }
    let client = &progress.client;
    println!(
        "{} (#{}) | {:.1} kg | {} | {} kcal/day",
        client.full_name, client.id, client.weight_kg, client.goal_type, client.daily_calorie_goal
    );
    print_days(&progress.days);
    Ok(())
}
