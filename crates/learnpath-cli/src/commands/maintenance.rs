use clap::Subcommand;
use serde_json::json;

use super::{open_service, print_json, CliResult};

#[derive(Subcommand)]
pub enum MaintenanceAction {
    /// Permanently remove users whose deletion grace period has ended
    Purge,
    /// Delete quiz attempt records past their lifetime
    Sweep,
}

pub fn run(action: MaintenanceAction) -> CliResult {
    let svc = open_service()?;

    match action {
        MaintenanceAction::Purge => {
            let events = svc.purge_due()?;
            print_json(&events)?;
        }
        MaintenanceAction::Sweep => {
            let removed = svc.sweep_attempts()?;
            print_json(&json!({ "removed": removed }))?;
        }
    }
    Ok(())
}
