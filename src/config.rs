use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teloxide::types::ChatId;

/// Errors that can occur when loading configuration.
#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    ReadFile { path: PathBuf, source: std::io::Error },
    /// Failed to parse JSON.
    ParseJson { path: PathBuf, source: serde_json::Error },
    /// An environment override could not be used.
    InvalidEnv { name: &'static str, value: String },
    /// Validation error.
    Validation(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadFile { path, source } => {
                write!(f, "failed to read config file '{}': {}", path.display(), source)
            }
            Self::ParseJson { path, source } => {
                write!(f, "failed to parse config file '{}': {}", path.display(), source)
            }
            Self::InvalidEnv { name, value } => {
                write!(f, "invalid value '{}' in environment variable {}", value, name)
            }
            Self::Validation(msg) => write!(f, "config validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFile { source, .. } => Some(source),
            Self::ParseJson { source, .. } => Some(source),
            Self::InvalidEnv { .. } | Self::Validation(_) => None,
        }
    }
}

/// How the supervised program runs the bot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    /// Bot only, in the foreground.
    Run,
    /// Health-check HTTP service with the bot as a background task.
    Serve,
}

impl BotMode {
    pub fn as_arg(&self) -> &'static str {
        match self {
            BotMode::Run => "run",
            BotMode::Serve => "serve",
        }
    }
}

#[derive(Deserialize)]
struct SupervisorFile {
    #[serde(default = "default_mode")]
    mode: BotMode,
    #[serde(default = "default_program")]
    program: String,
    #[serde(default = "default_poll_interval")]
    poll_interval_secs: u64,
    #[serde(default = "default_restart_grace")]
    restart_grace_secs: u64,
    #[serde(default = "default_stop_settle")]
    stop_settle_secs: u64,
}

impl Default for SupervisorFile {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            program: default_program(),
            poll_interval_secs: default_poll_interval(),
            restart_grace_secs: default_restart_grace(),
            stop_settle_secs: default_stop_settle(),
        }
    }
}

#[derive(Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    telegram_bot_token: String,
    /// Directory for the database and logs. Defaults to `data`.
    data_dir: Option<String>,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_environment")]
    environment: String,
    #[serde(default = "default_session_timeout")]
    session_timeout_secs: u64,
    #[serde(default = "default_rate_limit")]
    rate_limit: usize,
    #[serde(default = "default_rate_limit_window")]
    rate_limit_window_secs: u64,
    /// Chat that receives forwarded log lines.
    log_chat_id: Option<i64>,
    /// URL pinged periodically so the hosting platform keeps the service awake.
    keep_alive_url: Option<String>,
    #[serde(default)]
    supervisor: SupervisorFile,
}

fn default_mode() -> BotMode {
    BotMode::Run
}

fn default_program() -> String {
    "diamond-bot".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_restart_grace() -> u64 {
    10
}

fn default_stop_settle() -> u64 {
    2
}

fn default_port() -> u16 {
    8000
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_session_timeout() -> u64 {
    3600
}

fn default_rate_limit() -> usize {
    5
}

fn default_rate_limit_window() -> u64 {
    10
}

/// Settings for the start, stop and monitor routines.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub mode: BotMode,
    /// Executable name the process table is matched against.
    pub program: String,
    pub poll_interval: Duration,
    /// Pause after a restart before the next check.
    pub restart_grace: Duration,
    /// Pause between a kill and the verification scan.
    pub stop_settle: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub config_path: PathBuf,
    pub telegram_bot_token: String,
    pub data_dir: PathBuf,
    pub port: u16,
    pub environment: String,
    pub session_timeout: Duration,
    pub rate_limit: usize,
    pub rate_limit_window: Duration,
    pub log_chat_id: Option<ChatId>,
    pub keep_alive_url: Option<String>,
    pub supervisor: SupervisorConfig,
}

impl Config {
    /// Load the config file with overrides from the process environment.
    /// A missing file yields the defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let config_path = path.as_ref().to_path_buf();
        let file: ConfigFile = match std::fs::read_to_string(&config_path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseJson { path: config_path.clone(), source: e })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConfigFile::default_values(),
            Err(e) => return Err(ConfigError::ReadFile { path: config_path.clone(), source: e }),
        };

        let mut telegram_bot_token = file.telegram_bot_token;
        if let Some(token) = env("BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            telegram_bot_token = token;
        }
        let mut port = file.port;
        if let Some(value) = env("PORT") {
            port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name: "PORT", value })?;
        }
        let mut environment = file.environment;
        if let Some(value) = env("DEPLOY_ENV").filter(|v| !v.trim().is_empty()) {
            environment = value;
        }

        if file.session_timeout_secs == 0 {
            return Err(ConfigError::Validation("session_timeout_secs must be greater than 0".into()));
        }
        if file.rate_limit == 0 || file.rate_limit_window_secs == 0 {
            return Err(ConfigError::Validation(
                "rate_limit and rate_limit_window_secs must be greater than 0".into(),
            ));
        }
        let supervisor = file.supervisor;
        if supervisor.program.trim().is_empty() {
            return Err(ConfigError::Validation("supervisor.program is required".into()));
        }
        if supervisor.poll_interval_secs == 0 {
            return Err(ConfigError::Validation("supervisor.poll_interval_secs must be greater than 0".into()));
        }

        Ok(Self {
            config_path,
            telegram_bot_token: telegram_bot_token.trim().to_string(),
            data_dir: file.data_dir.map(PathBuf::from).unwrap_or_else(|| PathBuf::from("data")),
            port,
            environment,
            session_timeout: Duration::from_secs(file.session_timeout_secs),
            rate_limit: file.rate_limit,
            rate_limit_window: Duration::from_secs(file.rate_limit_window_secs),
            log_chat_id: file.log_chat_id.map(ChatId),
            keep_alive_url: file.keep_alive_url.filter(|u| !u.trim().is_empty()),
            supervisor: SupervisorConfig {
                mode: supervisor.mode,
                program: supervisor.program,
                poll_interval: Duration::from_secs(supervisor.poll_interval_secs),
                restart_grace: Duration::from_secs(supervisor.restart_grace_secs),
                stop_settle: Duration::from_secs(supervisor.stop_settle_secs),
            },
        })
    }

    /// Telegram tokens are formatted as {bot_id}:{secret} where bot_id is numeric.
    pub fn check_token(&self) -> Result<(), ConfigError> {
        if self.telegram_bot_token.is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token is required (set it in the config file or BOT_TOKEN)".into(),
            ));
        }
        let token_parts: Vec<&str> = self.telegram_bot_token.split(':').collect();
        if token_parts.len() != 2 || token_parts[0].parse::<u64>().is_err() || token_parts[1].is_empty() {
            return Err(ConfigError::Validation(
                "telegram_bot_token appears invalid (expected format: 123456789:ABCdefGHI...)".into(),
            ));
        }
        Ok(())
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("diamond.db")
    }

    pub fn monitor_log_path(&self) -> PathBuf {
        self.logs_dir().join("monitor.log")
    }

    pub fn bot_output_path(&self) -> PathBuf {
        self.logs_dir().join("bot-stdout.log")
    }
}

impl ConfigFile {
    fn default_values() -> Self {
        Self {
            port: default_port(),
            environment: default_environment(),
            session_timeout_secs: default_session_timeout(),
            rate_limit: default_rate_limit(),
            rate_limit_window_secs: default_rate_limit_window(),
            ..Default::default()
        }
    }
}

/// Starter config written by `setup`.
pub fn template() -> String {
    serde_json::to_string_pretty(&serde_json::json!({
        "telegram_bot_token": "",
        "data_dir": "data",
        "port": default_port(),
        "environment": default_environment(),
        "session_timeout_secs": default_session_timeout(),
        "rate_limit": default_rate_limit(),
        "rate_limit_window_secs": default_rate_limit_window(),
        "log_chat_id": null,
        "keep_alive_url": null,
        "supervisor": {
            "mode": "run",
            "program": default_program(),
            "poll_interval_secs": default_poll_interval(),
            "restart_grace_secs": default_restart_grace(),
            "stop_settle_secs": default_stop_settle()
        }
    }))
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn assert_err<T>(result: Result<T, ConfigError>) -> ConfigError {
        match result {
            Ok(_) => panic!("expected error, got Ok"),
            Err(e) => e,
        }
    }

    #[test]
    fn test_valid_config() {
        let file = write_config(r#"{
            "telegram_bot_token": "123456789:ABCdefGHIjklMNOpqrsTUVwxyz",
            "data_dir": "/srv/diamond",
            "log_chat_id": -100123,
            "supervisor": { "mode": "serve", "poll_interval_secs": 5 }
        }"#);
        let config = Config::load_with_env(file.path(), no_env).expect("should load valid config");
        assert!(config.check_token().is_ok());
        assert_eq!(config.database_path(), PathBuf::from("/srv/diamond/diamond.db"));
        assert_eq!(config.log_chat_id, Some(ChatId(-100123)));
        assert_eq!(config.supervisor.mode, BotMode::Serve);
        assert_eq!(config.supervisor.poll_interval, Duration::from_secs(5));
        assert_eq!(config.supervisor.restart_grace, Duration::from_secs(10));
        assert_eq!(config.supervisor.program, "diamond-bot");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load_with_env("/nonexistent/path/diamond.json", no_env).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.environment, "production");
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.session_timeout, Duration::from_secs(3600));
        assert_eq!(config.rate_limit, 5);
        assert_eq!(config.rate_limit_window, Duration::from_secs(10));
        assert_eq!(config.supervisor.poll_interval, Duration::from_secs(30));
        assert_eq!(config.supervisor.stop_settle, Duration::from_secs(2));
        assert!(config.keep_alive_url.is_none());
    }

    #[test]
    fn test_env_overrides() {
        let file = write_config(r#"{ "telegram_bot_token": "1:file", "port": 9000 }"#);
        let env: HashMap<&str, &str> =
            [("BOT_TOKEN", "42:fromenv"), ("PORT", "10000"), ("DEPLOY_ENV", "staging")].into();
        let config = Config::load_with_env(file.path(), |name| env.get(name).map(|v| v.to_string())).unwrap();
        assert_eq!(config.telegram_bot_token, "42:fromenv");
        assert_eq!(config.port, 10000);
        assert_eq!(config.environment, "staging");
    }

    #[test]
    fn test_invalid_port_env() {
        let err = assert_err(Config::load_with_env("/nonexistent/diamond.json", |name| {
            (name == "PORT").then(|| "eighty".to_string())
        }));
        assert!(matches!(err, ConfigError::InvalidEnv { name: "PORT", .. }));
    }

    #[test]
    fn test_empty_token() {
        let config = Config::load_with_env("/nonexistent/diamond.json", no_env).unwrap();
        let err = assert_err(config.check_token());
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("telegram_bot_token"));
    }

    #[test]
    fn test_invalid_token_formats() {
        for token in ["invalid_token_no_colon", "notanumber:ABCdef", "123456789:"] {
            let file = write_config(&format!(r#"{{ "telegram_bot_token": "{token}" }}"#));
            let config = Config::load_with_env(file.path(), no_env).unwrap();
            let err = assert_err(config.check_token());
            assert!(matches!(err, ConfigError::Validation(_)), "{token}");
        }
    }

    #[test]
    fn test_zero_intervals_rejected() {
        let file = write_config(r#"{ "supervisor": { "poll_interval_secs": 0 } }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(err.to_string().contains("poll_interval_secs"));

        let file = write_config(r#"{ "rate_limit": 0 }"#);
        assert!(matches!(assert_err(Config::load_with_env(file.path(), no_env)), ConfigError::Validation(_)));
    }

    #[test]
    fn test_unknown_mode() {
        let file = write_config(r#"{ "supervisor": { "mode": "daemon" } }"#);
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_invalid_json() {
        let file = write_config("{ invalid json }");
        let err = assert_err(Config::load_with_env(file.path(), no_env));
        assert!(matches!(err, ConfigError::ParseJson { .. }));
    }

    #[test]
    fn test_template_parses() {
        let file = write_config(&template());
        let config = Config::load_with_env(file.path(), no_env).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.supervisor.mode, BotMode::Run);
    }
}
