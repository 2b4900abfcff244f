//! First-run setup: directories, config template and database.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{self, Config};
use crate::store::Store;

#[derive(Debug)]
pub struct SetupReport {
    pub config_path: PathBuf,
    /// A template was written because no config file existed.
    pub wrote_config: bool,
    pub data_dir: PathBuf,
    pub database: PathBuf,
    pub token_configured: bool,
}

impl SetupReport {
    pub fn message(&self) -> String {
        let mut lines = vec!["💎 Diamond Trading Bot setup".to_string()];
        if self.wrote_config {
            lines.push(format!("📝 Wrote config template to {}", self.config_path.display()));
        } else {
            lines.push(format!("✅ Using config {}", self.config_path.display()));
        }
        lines.push(format!("📁 Data directory: {}", self.data_dir.display()));
        lines.push(format!("🗄️ Database ready: {}", self.database.display()));
        if self.token_configured {
            lines.push("✅ Bot token configured".to_string());
        } else {
            lines.push("⚠️ No valid bot token. Set telegram_bot_token in the config or BOT_TOKEN.".to_string());
        }

        let config = self.config_path.display();
        lines.push(String::new());
        lines.push("Next steps:".to_string());
        lines.push(format!("  1. create_account --config {config} --role admin <username> <password>"));
        lines.push(format!("  2. diamond-bot --config {config} start"));
        lines.push(format!("  3. diamond-bot --config {config} monitor"));
        lines.join("\n")
    }
}

pub fn run(config_path: &Path) -> Result<SetupReport, String> {
    let wrote_config = !config_path.exists();
    if wrote_config {
        if let Some(dir) = config_path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
        }
        std::fs::write(config_path, config::template())
            .map_err(|e| format!("Failed to write {}: {e}", config_path.display()))?;
        info!("Wrote config template to {}", config_path.display());
    }

    let config = Config::load(config_path).map_err(|e| e.to_string())?;
    let logs = config.logs_dir();
    std::fs::create_dir_all(&logs).map_err(|e| format!("Failed to create {}: {e}", logs.display()))?;

    let database = config.database_path();
    Store::open(&database).map_err(|e| format!("Failed to open database {}: {e}", database.display()))?;

    Ok(SetupReport {
        config_path: config.config_path.clone(),
        wrote_config,
        data_dir: config.data_dir.clone(),
        database,
        token_configured: config.check_token().is_ok(),
    })
}
