use clap::Subcommand;

use super::{open_service, parse_user_id, print_json, CliResult};

#[derive(Subcommand)]
pub enum LevelAction {
    /// Progress toward the next level
    Progress {
        /// User ID
        user_id: String,
    },
}

pub fn run(action: LevelAction) -> CliResult {
    let svc = open_service()?;

    match action {
        LevelAction::Progress { user_id } => {
            let progress = svc.level_progress(parse_user_id(&user_id)?)?;
            print_json(&progress)?;
        }
    }
    Ok(())
}
