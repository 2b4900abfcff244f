//! Command-line interface and the handlers behind each subcommand.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use teloxide::Bot;
use tracing::info;

use crate::bot::conversation::Conversation;
use crate::config::Config;
use crate::store::Store;
use crate::supervisor::launcher::BotLauncher;
use crate::supervisor::monitor::Monitor;
use crate::supervisor::process::SysinfoTable;
use crate::supervisor::status_log::StatusLog;
use crate::supervisor::{self, ProcessStatus, bot_pattern, monitor_pattern};
use crate::{bot, health, logging, setup};

pub const DEFAULT_CONFIG: &str = "diamond.json";

/// Diamond Trading Bot: Telegram bot, health service and process supervisor.
#[derive(Parser, Debug)]
#[command(name = "diamond-bot")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Create directories, a config template and the database
    Setup,
    /// Run the Telegram bot in the foreground
    Run,
    /// Run the health-check HTTP service with the bot in the background
    Serve,
    /// Launch the bot as a detached process unless it is already running
    Start,
    /// Kill the bot and its monitor
    Stop,
    /// Restart the bot whenever it disappears
    Monitor,
    /// Show whether the bot and monitor are running
    Status,
}

impl Cli {
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Run)
    }
}

/// Execute the parsed command line.
pub async fn execute(cli: Cli) -> Result<(), String> {
    let command = cli.command();
    if command == Commands::Setup {
        let report = setup::run(&cli.config)?;
        println!("{}", report.message());
        return Ok(());
    }

    let config = Config::load(&cli.config).map_err(|e| e.to_string())?;
    let forward = matches!(command, Commands::Run | Commands::Serve);
    let _guard = logging::init(&config, forward)?;

    match command {
        Commands::Setup => Ok(()),
        Commands::Run => run(config).await,
        Commands::Serve => serve(config).await,
        Commands::Start => start(&config),
        Commands::Stop => stop(&config).await,
        Commands::Monitor => monitor(&config).await,
        Commands::Status => {
            let status = ProcessStatus::collect(&mut SysinfoTable::new(), &config);
            println!("{}", status.message());
            Ok(())
        }
    }
}

fn open_store(config: &Config) -> Result<Arc<Store>, String> {
    let path = config.database_path();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
    }
    let store = Store::open(&path).map_err(|e| format!("Failed to open database {}: {e}", path.display()))?;
    Ok(Arc::new(store))
}

async fn run(config: Config) -> Result<(), String> {
    config.check_token().map_err(|e| e.to_string())?;
    info!("🚀 Starting Diamond Trading Bot ({})", config.environment);
    info!("Loaded config from {}", config.config_path.display());
    let store = open_store(&config)?;
    let bot = Bot::new(config.telegram_bot_token.clone());
    let conversation = Arc::new(Conversation::from_config(store, &config));
    bot::run(conversation, bot, true).await
}

async fn serve(config: Config) -> Result<(), String> {
    config.check_token().map_err(|e| e.to_string())?;
    info!("🚀 Starting Diamond Trading Bot service ({})", config.environment);
    let store = open_store(&config)?;
    health::serve(config, store).await
}

fn start(config: &Config) -> Result<(), String> {
    config.check_token().map_err(|e| e.to_string())?;
    let mut launcher = BotLauncher::for_config(config)?;
    let outcome = supervisor::start(&mut SysinfoTable::new(), &mut launcher, &bot_pattern(config))?;
    println!("{}", outcome.message());
    println!("📄 Output: {}", config.bot_output_path().display());
    Ok(())
}

async fn stop(config: &Config) -> Result<(), String> {
    let report = supervisor::stop::stop(
        &mut SysinfoTable::new(),
        &bot_pattern(config),
        &monitor_pattern(config),
        config.supervisor.stop_settle,
    )
    .await;
    println!("{}", report.message());
    if report.is_success() { Ok(()) } else { Err("Bot could not be stopped".to_string()) }
}

async fn monitor(config: &Config) -> Result<(), String> {
    let log = StatusLog::open(&config.monitor_log_path())?;
    println!("👀 Monitoring bot, status log: {}", log.path().display());
    let mut monitor = Monitor::new(
        Box::new(SysinfoTable::new()),
        Box::new(BotLauncher::for_config(config)?),
        bot_pattern(config),
        config.supervisor.poll_interval,
        config.supervisor.restart_grace,
        log,
    );
    monitor.run().await;
    Ok(())
}
