pub mod account;
pub mod config;
pub mod level;
pub mod maintenance;
pub mod module;
pub mod quiz;
pub mod user;

use learnpath_core::{Config, Database, ProgressService, UserId};
use serde::Serialize;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Service over the on-disk database, configured from `config.toml`.
pub fn open_service() -> Result<ProgressService<Database>, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let db = Database::open()?;
    Ok(ProgressService::with_system_clock(db, config))
}

pub fn parse_user_id(raw: &str) -> Result<UserId, Box<dyn std::error::Error>> {
    Ok(raw.parse::<UserId>()?)
}

pub fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
