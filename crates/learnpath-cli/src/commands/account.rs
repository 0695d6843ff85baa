use clap::Subcommand;

use super::{open_service, parse_user_id, print_json, CliResult};

#[derive(Subcommand)]
pub enum AccountAction {
    /// Request account deletion after the grace period
    Delete {
        /// User ID
        user_id: String,
        /// Optional reason
        #[arg(long)]
        reason: Option<String>,
    },
    /// Cancel a pending deletion
    Cancel {
        /// User ID
        user_id: String,
    },
    /// Show deletion status
    Status {
        /// User ID
        user_id: String,
    },
}

pub fn run(action: AccountAction) -> CliResult {
    let svc = open_service()?;

    match action {
        AccountAction::Delete { user_id, reason } => {
            let update = svc.request_deletion(parse_user_id(&user_id)?, reason.as_deref())?;
            print_json(&update)?;
        }
        AccountAction::Cancel { user_id } => {
            let update = svc.cancel_deletion(parse_user_id(&user_id)?)?;
            print_json(&update)?;
        }
        AccountAction::Status { user_id } => {
            let status = svc.deletion_status(parse_user_id(&user_id)?)?;
            print_json(&status)?;
        }
    }
    Ok(())
}
