//! Create or reset an approved account directly in the database.
//!
//! Usage: create_account [--config diamond.json] [--role admin] <username> <password>
//!
//! Admin and supplier accounts can only be made this way; the bot's own
//! sign-up flow creates clients.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use diamond_bot::config::Config;
use diamond_bot::desk::accounts::{self, Role};
use diamond_bot::store::Store;

fn parse_role(value: &str) -> Result<Role, String> {
    Role::parse(value).ok_or_else(|| format!("unknown role '{value}' (expected admin, supplier or client)"))
}

#[derive(Parser, Debug)]
#[command(name = "create_account", about = "Create an approved Diamond Trading Bot account")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "diamond.json")]
    config: PathBuf,

    /// Account role
    #[arg(short, long, default_value = "admin", value_parser = parse_role)]
    role: Role,

    username: String,
    password: String,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };
    let db_path = config.database_path();
    if let Some(dir) = db_path.parent()
        && let Err(e) = std::fs::create_dir_all(dir)
    {
        eprintln!("Failed to create {}: {e}", dir.display());
        return ExitCode::FAILURE;
    }
    let store = match Store::open(&db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open database {}: {e}", db_path.display());
            return ExitCode::FAILURE;
        }
    };

    match accounts::provision(&store, &args.username, &args.password, args.role) {
        Ok(account) => {
            println!("✅ {} account '{}' is ready", account.role.label(), account.username);
            println!("Database: {}", db_path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {}", e.detail());
            ExitCode::FAILURE
        }
    }
}
