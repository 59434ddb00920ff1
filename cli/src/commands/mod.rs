mod dietitian;
mod goals;
mod helpers;
mod log;
mod summary;
mod user;

pub(crate) use dietitian::{
    cmd_client_goals, cmd_client_progress, cmd_clients, cmd_dietitian_list, cmd_set_client_goals,
    cmd_subscribe, cmd_unsubscribe,
};
pub(crate) use goals::{cmd_goals_recalc, cmd_goals_set, cmd_goals_show, cmd_goals_sync};
pub(crate) use helpers::{entry_timestamp, require_user};
pub(crate) use log::{LogRequest, cmd_delete, cmd_entries, cmd_log};
pub(crate) use summary::{cmd_history, cmd_summary};
pub(crate) use user::{cmd_user_create, cmd_user_delete, cmd_user_list, cmd_user_show, cmd_user_update};
