mod commands;
mod config;
mod rate_limit;
mod server;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::process;
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::commands::{
    LogRequest, cmd_client_goals, cmd_client_progress, cmd_clients, cmd_delete,
    cmd_dietitian_list, cmd_entries, cmd_goals_recalc, cmd_goals_set, cmd_goals_show,
    cmd_goals_sync, cmd_history, cmd_log, cmd_set_client_goals, cmd_subscribe, cmd_summary,
    cmd_unsubscribe, cmd_user_create, cmd_user_delete, cmd_user_list, cmd_user_show,
    cmd_user_update, entry_timestamp, require_user,
};
use crate::config::Config;
use crate::rate_limit::FixedWindowLimiter;
use tally_core::models::{
    ActivityLevel, Gender, GoalType, GoalsUpdate, NewUserProfile, ProfilePatch, Role,
};
use tally_core::service::TallyService;

#[derive(Parser)]
#[command(
    name = "tally",
    version,
    about = "Track what you eat against a daily calorie and macro goal"
)]
struct Cli {
    /// User to act as (see `tally user list`)
    #[arg(short, long, global = true)]
    user: Option<i64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage user profiles
    User {
        #[command(subcommand)]
        command: UserCommands,
    },
    /// Log a food entry
    Log {
        /// Food name
        name: String,
        /// Calories for the amount eaten
        #[arg(short, long)]
        calories: f64,
        /// Amount eaten (servings, grams, whatever unit you track in)
        #[arg(short, long, default_value = "1")]
        amount: f64,
        /// Protein in grams
        #[arg(short, long, default_value = "0")]
        protein: f64,
        /// Carbohydrates in grams
        #[arg(long, default_value = "0")]
        carbs: f64,
        /// Fat in grams
        #[arg(short, long, default_value = "0")]
        fat: f64,
        /// Catalog id of the food (default: derived from the name)
        #[arg(long)]
        food_id: Option<String>,
        /// Day to log for (YYYY-MM-DD or today/yesterday/tomorrow, default: now)
        #[arg(long, conflicts_with = "at")]
        date: Option<String>,
        /// Exact time eaten (RFC 3339, e.g. 2024-01-15T08:30:00Z)
        #[arg(long)]
        at: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a food entry by ID
    Delete {
        /// Entry ID to delete
        entry_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the entries logged on a day (defaults to today, UTC)
    Entries {
        /// Date to show (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a day's totals against your goals (defaults to today, UTC)
    Summary {
        /// Date to show (YYYY-MM-DD or today/yesterday/tomorrow)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show daily totals for a date range (default: the last 7 days)
    History {
        /// First day of the range
        #[arg(long, requires = "end")]
        start: Option<String>,
        /// Last day of the range (at most 31 days including the start)
        #[arg(long, requires = "start")]
        end: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage calorie and macro goals
    Goals {
        #[command(subcommand)]
        command: GoalsCommands,
    },
    /// Work with dietitians and their clients
    Dietitian {
        #[command(subcommand)]
        command: DietitianCommands,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Args)]
struct ProfileArgs {
    /// Full name
    #[arg(long)]
    name: Option<String>,
    /// Birthdate (YYYY-MM-DD)
    #[arg(long)]
    birthdate: Option<NaiveDate>,
    /// Gender: male, female, other
    #[arg(long)]
    gender: Option<Gender>,
    /// Height in centimetres
    #[arg(long)]
    height: Option<f64>,
    /// Weight in kilograms
    #[arg(long)]
    weight: Option<f64>,
    /// Activity: sedentary, light, moderate, active, very_active
    #[arg(long)]
    activity: Option<ActivityLevel>,
    /// Goal: lose, maintain, gain
    #[arg(long)]
    goal: Option<GoalType>,
    /// Daily calorie goal
    #[arg(long)]
    calories: Option<i64>,
}

impl ProfileArgs {
    fn into_patch(self) -> ProfilePatch {
        ProfilePatch {
            full_name: self.name,
            birthdate: self.birthdate,
            gender: self.gender,
            height_cm: self.height,
            weight_kg: self.weight,
            activity_level: self.activity,
            goal_type: self.goal,
            daily_calorie_goal: self.calories,
        }
    }
}

#[derive(Args)]
struct GoalTargetArgs {
    /// Daily calorie target
    calories: i64,
    /// Protein in grams (all three macros are derived unless every one is given)
    #[arg(long)]
    protein: Option<f64>,
    /// Carbohydrates in grams
    #[arg(long)]
    carbs: Option<f64>,
    /// Fat in grams
    #[arg(long)]
    fat: Option<f64>,
    /// Target body weight in kilograms
    #[arg(long)]
    weight: Option<f64>,
}

impl GoalTargetArgs {
    fn into_update(self) -> GoalsUpdate {
        GoalsUpdate {
            target_calories: self.calories,
            target_protein: self.protein,
            target_carbs: self.carbs,
            target_fats: self.fat,
            target_weight: self.weight,
        }
    }
}

#[derive(Subcommand)]
enum UserCommands {
    /// Register a new user
    Create {
        /// Email address
        #[arg(long)]
        email: String,
        /// Unique username
        #[arg(long)]
        username: String,
        /// Full name
        #[arg(long, default_value = "")]
        name: String,
        /// Birthdate (YYYY-MM-DD)
        #[arg(long)]
        birthdate: NaiveDate,
        /// Gender: male, female, other
        #[arg(long)]
        gender: Gender,
        /// Height in centimetres
        #[arg(long)]
        height: f64,
        /// Weight in kilograms
        #[arg(long)]
        weight: f64,
        /// Activity: sedentary, light, moderate, active, very_active
        #[arg(long, default_value = "moderate")]
        activity: ActivityLevel,
        /// Goal: lose, maintain, gain
        #[arg(long, default_value = "maintain")]
        goal: GoalType,
        /// Daily calorie goal (default: estimated from body metrics and activity)
        #[arg(long)]
        calories: Option<i64>,
        /// Account role: user, dietitian
        #[arg(long, default_value = "user")]
        role: Role,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the selected user's profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update the selected user's profile
    Update {
        #[command(flatten)]
        profile: ProfileArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the selected user and all of their data
    Delete {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all users
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GoalsCommands {
    /// Show the selected user's goals
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the calorie target, optionally with explicit macros in grams
    Set {
        #[command(flatten)]
        target: GoalTargetArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set the profile's calorie goal and re-derive macros from it
    Sync {
        /// Daily calorie goal
        calories: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Re-derive every user's goals from their profile
    Recalc {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum DietitianCommands {
    /// List registered dietitians
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Subscribe the selected user to a dietitian
    Subscribe {
        /// Dietitian's user ID
        dietitian_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// End the selected user's subscription to a dietitian
    Unsubscribe {
        /// Dietitian's user ID
        dietitian_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List the selected dietitian's clients
    Clients {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a client's goals
    ClientGoals {
        /// Client's user ID
        client_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set a client's calorie target and macros
    SetClientGoals {
        /// Client's user ID
        client_id: i64,
        #[command(flatten)]
        target: GoalTargetArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a client's daily totals for the last 30 days
    Progress {
        /// Client's user ID
        client_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let default_level = if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    init_tracing(config.log_level_or(default_level));

    let svc = TallyService::new(&config.db_path)?;
    let user = cli.user;

    match cli.command {
        Commands::User { command } => match command {
            UserCommands::Create {
                email,
                username,
                name,
                birthdate,
                gender,
                height,
                weight,
                activity,
                goal,
                calories,
                role,
                json,
            } => cmd_user_create(
                &svc,
                &NewUserProfile {
                    email,
                    username,
                    full_name: name,
                    birthdate,
                    gender,
                    height_cm: height,
                    weight_kg: weight,
                    activity_level: activity,
                    goal_type: goal,
                    daily_calorie_goal: calories,
                    role,
                },
                json,
            ),
            UserCommands::Show { json } => cmd_user_show(&svc, require_user(user)?, json),
            UserCommands::Update { profile, json } => {
                cmd_user_update(&svc, require_user(user)?, &profile.into_patch(), json)
            }
            UserCommands::Delete { json } => cmd_user_delete(&svc, require_user(user)?, json),
            UserCommands::List { json } => cmd_user_list(&svc, json),
        },
        Commands::Log {
            name,
            calories,
            amount,
            protein,
            carbs,
            fat,
            food_id,
            date,
            at,
            json,
        } => {
            let user_id = require_user(user)?;
            let when = entry_timestamp(at.as_deref(), date.as_deref())?;
            let request = LogRequest {
                name,
                food_id,
                amount,
                calories,
                protein,
                carbs,
                fat,
            };
            cmd_log(&svc, user_id, request, when, json)
        }
        Commands::Delete { entry_id, json } => cmd_delete(&svc, require_user(user)?, entry_id, json),
        Commands::Entries { date, json } => {
            cmd_entries(&svc, require_user(user)?, date.as_deref(), json)
        }
        Commands::Summary { date, json } => {
            cmd_summary(&svc, require_user(user)?, date.as_deref(), json)
        }
        Commands::History { start, end, json } => cmd_history(
            &svc,
            require_user(user)?,
            start.as_deref(),
            end.as_deref(),
            json,
        ),
        Commands::Goals { command } => match command {
            GoalsCommands::Show { json } => cmd_goals_show(&svc, require_user(user)?, json),
            GoalsCommands::Set { target, json } => {
                cmd_goals_set(&svc, require_user(user)?, &target.into_update(), json)
            }
            GoalsCommands::Sync { calories, json } => {
                cmd_goals_sync(&svc, require_user(user)?, calories, json)
            }
            GoalsCommands::Recalc { json } => cmd_goals_recalc(&svc, json),
        },
        Commands::Dietitian { command } => match command {
            DietitianCommands::List { json } => cmd_dietitian_list(&svc, json),
            DietitianCommands::Subscribe { dietitian_id, json } => {
                cmd_subscribe(&svc, require_user(user)?, dietitian_id, json)
            }
            DietitianCommands::Unsubscribe { dietitian_id, json } => {
                cmd_unsubscribe(&svc, require_user(user)?, dietitian_id, json)
            }
            DietitianCommands::Clients { json } => cmd_clients(&svc, require_user(user)?, json),
            DietitianCommands::ClientGoals { client_id, json } => {
                cmd_client_goals(&svc, require_user(user)?, client_id, json)
            }
            DietitianCommands::SetClientGoals {
                client_id,
                target,
                json,
            } => cmd_set_client_goals(
                &svc,
                require_user(user)?,
                client_id,
                &target.into_update(),
                json,
            ),
            DietitianCommands::Progress { client_id, json } => {
                cmd_client_progress(&svc, require_user(user)?, client_id, json)
            }
        },
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                let (key, new) = config.load_or_create_api_key()?;
                if new {
                    eprintln!("Generated new API key: {key}");
                    eprintln!("Include in requests: Authorization: Bearer {key}");
                }
                Some(key)
            };
            let limiter = Arc::new(FixedWindowLimiter::new(config.rate_limit));
            server::start_server(svc, limiter, port, &bind, api_key).await
        }
    }
}
