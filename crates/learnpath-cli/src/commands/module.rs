use clap::Subcommand;

use super::{open_service, parse_user_id, print_json, CliResult};

#[derive(Subcommand)]
pub enum ModuleAction {
    /// Record a completed module
    Complete {
        /// User ID
        user_id: String,
        /// Module ID
        module_id: String,
        /// Points awarded for the module
        #[arg(long, default_value = "0")]
        points: u64,
    },
}

pub fn run(action: ModuleAction) -> CliResult {
    let svc = open_service()?;

    match action {
        ModuleAction::Complete {
            user_id,
            module_id,
            points,
        } => {
            let completion = svc.complete_module(parse_user_id(&user_id)?, &module_id, points)?;
            print_json(&completion)?;
        }
    }
    Ok(())
}
