//! Process lifecycle: start, stop, monitor and the in-process supervised task.

pub mod launcher;
pub mod monitor;
pub mod process;
pub mod status_log;
pub mod stop;
pub mod task;

use crate::config::Config;
use launcher::Launcher;
use process::{ProcessPattern, ProcessTable};

pub use monitor::join_pids;

/// Subcommands that run the bot.
const BOT_ROLES: [&str; 2] = ["run", "serve"];

pub fn bot_pattern(config: &Config) -> ProcessPattern {
    ProcessPattern::new(&config.supervisor.program, &BOT_ROLES)
}

pub fn monitor_pattern(config: &Config) -> ProcessPattern {
    ProcessPattern::new(&config.supervisor.program, &["monitor"])
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    AlreadyRunning { pids: Vec<u32> },
    Started { pid: u32 },
}

impl StartOutcome {
    pub fn message(&self) -> String {
        match self {
            StartOutcome::AlreadyRunning { pids } => {
                format!("⚠️ Bot is already running (PID {})", join_pids(pids))
            }
            StartOutcome::Started { pid } => format!("🚀 Bot started (PID {pid})"),
        }
    }
}

/// Launch the bot unless a matching process is already alive.
pub fn start(
    table: &mut dyn ProcessTable,
    launcher: &mut dyn Launcher,
    pattern: &ProcessPattern,
) -> Result<StartOutcome, String> {
    let pids = pattern.find(table);
    if !pids.is_empty() {
        return Ok(StartOutcome::AlreadyRunning { pids });
    }
    let pid = launcher.launch()?;
    Ok(StartOutcome::Started { pid })
}

/// Bot and monitor PIDs, for `status`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStatus {
    pub bot: Vec<u32>,
    pub monitor: Vec<u32>,
}

impl ProcessStatus {
    pub fn collect(table: &mut dyn ProcessTable, config: &Config) -> Self {
        Self { bot: bot_pattern(config).find(table), monitor: monitor_pattern(config).find(table) }
    }

    pub fn message(&self) -> String {
        let line = |label: &str, pids: &[u32]| {
            if pids.is_empty() {
                format!("❌ {label}: not running")
            } else {
                format!("✅ {label}: running (PID {})", join_pids(pids))
            }
        };
        format!("{}\n{}", line("Bot", &self.bot), line("Monitor", &self.monitor))
    }
}

#[cfg(test)]
mod tests {
    use super::launcher::fake::FakeLauncher;
    use super::process::fake::FakeTable;
    use super::*;

    fn config() -> Config {
        Config::load_with_env("/nonexistent/diamond.json", |_| None).unwrap()
    }

    #[test]
    fn test_start_skips_running_bot() {
        let table = FakeTable::with(&[(10, "diamond-bot serve")]);
        let mut launcher = FakeLauncher::new(table.clone(), "diamond-bot run");
        let outcome = start(&mut table.clone(), &mut launcher, &bot_pattern(&config())).unwrap();
        assert_eq!(outcome, StartOutcome::AlreadyRunning { pids: vec![10] });
        assert_eq!(launcher.launches, 0);
    }

    #[test]
    fn test_start_launches_when_absent() {
        let table = FakeTable::default();
        let mut launcher = FakeLauncher::new(table.clone(), "diamond-bot run");
        let outcome = start(&mut table.clone(), &mut launcher, &bot_pattern(&config())).unwrap();
        assert_eq!(outcome, StartOutcome::Started { pid: 100 });
        assert!(outcome.message().contains("PID 100"));
    }

    #[test]
    fn test_status_lists_bot_and_monitor() {
        let table = FakeTable::with(&[(10, "diamond-bot run"), (11, "diamond-bot monitor")]);
        let status = ProcessStatus::collect(&mut table.clone(), &config());
        assert_eq!(status.bot, vec![10]);
        assert_eq!(status.monitor, vec![11]);
        assert!(status.message().contains("Monitor: running (PID 11)"));
    }
}
