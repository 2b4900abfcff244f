use teloxide::Bot;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use crate::config::Config;
use crate::telegram_log::TelegramLogLayer;

pub const LOG_FILE: &str = "diamond-bot.log";

/// Install the global subscriber: stdout plus `<data_dir>/logs/diamond-bot.log`,
/// and the admin chat when `forward` is set and `log_chat_id` is configured.
/// Keep the returned guard alive for the life of the process.
pub fn init(config: &Config, forward: bool) -> Result<WorkerGuard, String> {
    let log_dir = config.logs_dir();
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| format!("Failed to create log directory {}: {e}", log_dir.display()))?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join(LOG_FILE))
        .map_err(|e| format!("Failed to open log file: {e}"))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer().with_writer(std::io::stdout).with_filter(
                tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
            ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
                ),
        );

    match config.log_chat_id {
        Some(chat_id) if forward && config.check_token().is_ok() => {
            let bot = Bot::new(config.telegram_bot_token.clone());
            registry
                .with(TelegramLogLayer::new(bot, chat_id, &config.environment))
                .try_init()
                .map_err(|e| format!("Failed to install logger: {e}"))?;
        }
        _ => registry.try_init().map_err(|e| format!("Failed to install logger: {e}"))?,
    }
    Ok(guard)
}
