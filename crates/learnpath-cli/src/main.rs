use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "learnpath", version, about = "learnpath progress CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// User registration and lookup
    User {
        #[command(subcommand)]
        action: commands::user::UserAction,
    },
    /// Module completion
    Module {
        #[command(subcommand)]
        action: commands::module::ModuleAction,
    },
    /// Quiz attempts
    Quiz {
        #[command(subcommand)]
        action: commands::quiz::QuizAction,
    },
    /// Level progression
    Level {
        #[command(subcommand)]
        action: commands::level::LevelAction,
    },
    /// Account deletion
    Account {
        #[command(subcommand)]
        action: commands::account::AccountAction,
    },
    /// Purge and sweep jobs
    Maintenance {
        #[command(subcommand)]
        action: commands::maintenance::MaintenanceAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("LEARNPATH_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::User { action } => commands::user::run(action),
        Commands::Module { action } => commands::module::run(action),
        Commands::Quiz { action } => commands::quiz::run(action),
        Commands::Level { action } => commands::level::run(action),
        Commands::Account { action } => commands::account::run(action),
        Commands::Maintenance { action } => commands::maintenance::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
