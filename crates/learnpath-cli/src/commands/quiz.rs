use clap::Subcommand;

use super::{open_service, parse_user_id, print_json, CliResult};

#[derive(Subcommand)]
pub enum QuizAction {
    /// Check whether an attempt is allowed now
    Check {
        /// User ID
        user_id: String,
        /// Quiz ID
        quiz_id: String,
    },
    /// Register a quiz attempt
    Submit {
        /// User ID
        user_id: String,
        /// Quiz ID
        quiz_id: String,
        /// Points scored
        #[arg(long, default_value = "0")]
        points: u64,
    },
}

pub fn run(action: QuizAction) -> CliResult {
    let svc = open_service()?;

    match action {
        QuizAction::Check { user_id, quiz_id } => {
            let decision = svc.check_quiz(parse_user_id(&user_id)?, &quiz_id)?;
            print_json(&decision)?;
        }
        QuizAction::Submit {
            user_id,
            quiz_id,
            points,
        } => {
            let submission = svc.submit_quiz(parse_user_id(&user_id)?, &quiz_id, points)?;
            print_json(&submission)?;
        }
    }
    Ok(())
}
