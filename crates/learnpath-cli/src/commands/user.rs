use clap::Subcommand;

use super::{open_service, parse_user_id, print_json, CliResult};

#[derive(Subcommand)]
pub enum UserAction {
    /// Register a new user
    Create {
        /// Weekly module goal (default from config)
        #[arg(long)]
        weekly_goal: Option<u32>,
    },
    /// Show a user record
    Show {
        /// User ID
        id: String,
    },
    /// List all users
    List,
    /// Correct counters without lowering the level
    Correct {
        /// User ID
        id: String,
        /// New completed-module count
        #[arg(long)]
        modules: Option<u32>,
        /// New point total
        #[arg(long)]
        points: Option<u64>,
    },
}

pub fn run(action: UserAction) -> CliResult {
    let svc = open_service()?;

    match action {
        UserAction::Create { weekly_goal } => {
            let user = svc.register_user(weekly_goal)?;
            print_json(&user)?;
        }
        UserAction::Show { id } => {
            let user = svc.user(parse_user_id(&id)?)?;
            print_json(&user)?;
        }
        UserAction::List => {
            let users = svc.store().list_users()?;
            print_json(&users)?;
        }
        UserAction::Correct {
            id,
            modules,
            points,
        } => {
            if modules.is_none() && points.is_none() {
                return Err("nothing to correct: pass --modules and/or --points".into());
            }
            let update = svc.correct_counts(parse_user_id(&id)?, modules, points)?;
            print_json(&update)?;
        }
    }
    Ok(())
}
