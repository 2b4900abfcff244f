//! Stop routine: kill the bot and its monitor, verify, escalate.

use std::time::Duration;
use tracing::{info, warn};

use super::monitor::join_pids;
use super::process::{ProcessPattern, ProcessTable};

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// Nothing was running; no signals were sent.
    Idle,
    /// The bot exited after the first kill.
    Stopped { pids: Vec<u32> },
    /// The bot survived the first kill and was removed by the broad kill.
    Escalated { pids: Vec<u32> },
    /// These processes are still alive after escalation.
    StillRunning { pids: Vec<u32> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopReport {
    pub outcome: StopOutcome,
    pub monitors_killed: Vec<u32>,
}

impl StopReport {
    pub fn message(&self) -> String {
        let mut text = match &self.outcome {
            StopOutcome::Idle => "✅ Bot is not running. Nothing to stop.".to_string(),
            StopOutcome::Stopped { pids } => format!("✅ Bot stopped (PID {})", join_pids(pids)),
            StopOutcome::Escalated { pids } => {
                format!("✅ Bot stopped after a forced cleanup (PID {})", join_pids(pids))
            }
            StopOutcome::StillRunning { pids } => {
                format!("❌ Bot is still running (PID {})", join_pids(pids))
            }
        };
        if !self.monitors_killed.is_empty() {
            text.push_str(&format!("\n🛑 Monitor stopped (PID {})", join_pids(&self.monitors_killed)));
        }
        text
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, StopOutcome::StillRunning { .. })
    }
}

fn kill_all(table: &mut dyn ProcessTable, pids: &[u32]) {
    for &pid in pids {
        if !table.kill(pid) {
            warn!("Failed to signal PID {pid}");
        }
    }
}

/// Stop every process matching `bot`. The monitor is killed first so it
/// cannot restart the bot in between.
pub async fn stop(
    table: &mut dyn ProcessTable,
    bot: &ProcessPattern,
    monitor: &ProcessPattern,
    settle: Duration,
) -> StopReport {
    let pids = bot.find(table);
    if pids.is_empty() {
        info!("Stop requested but the bot is not running");
        return StopReport { outcome: StopOutcome::Idle, monitors_killed: Vec::new() };
    }

    let monitors = monitor.find(table);
    for &pid in &monitors {
        // Best effort: the monitor may already be gone.
        let _ = table.kill(pid);
    }

    info!("🛑 Killing bot (PID {})", join_pids(&pids));
    kill_all(table, &pids);
    tokio::time::sleep(settle).await;
    if bot.find(table).is_empty() {
        return StopReport { outcome: StopOutcome::Stopped { pids }, monitors_killed: monitors };
    }

    let broad = bot.find_broadly(table);
    warn!("Bot survived SIGKILL, escalating (PID {})", join_pids(&broad));
    kill_all(table, &broad);
    tokio::time::sleep(settle).await;

    let mut remaining = bot.find(table);
    for pid in bot.find_broadly(table) {
        if !remaining.contains(&pid) {
            remaining.push(pid);
        }
    }
    let outcome = if remaining.is_empty() {
        StopOutcome::Escalated { pids }
    } else {
        StopOutcome::StillRunning { pids: remaining }
    };
    StopReport { outcome, monitors_killed: monitors }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::process::fake::FakeTable;

    fn patterns() -> (ProcessPattern, ProcessPattern) {
        (
            ProcessPattern::new("diamond-bot", &["run", "serve"]),
            ProcessPattern::new("diamond-bot", &["monitor"]),
        )
    }

    #[tokio::test]
    async fn test_idle_sends_no_signals() {
        let table = FakeTable::with(&[(7, "diamond-bot monitor"), (8, "bash")]);
        let (bot, monitor) = patterns();
        let report = stop(&mut table.clone(), &bot, &monitor, Duration::ZERO).await;

        assert_eq!(report.outcome, StopOutcome::Idle);
        assert!(table.state().kills.is_empty());
        assert!(report.message().contains("not running"));
    }

    #[tokio::test]
    async fn test_stop_kills_monitor_then_bot() {
        let table = FakeTable::with(&[(7, "diamond-bot monitor"), (10, "diamond-bot run"), (11, "diamond-bot serve")]);
        let (bot, monitor) = patterns();
        let report = stop(&mut table.clone(), &bot, &monitor, Duration::ZERO).await;

        assert_eq!(report.outcome, StopOutcome::Stopped { pids: vec![10, 11] });
        assert_eq!(report.monitors_killed, vec![7]);
        assert_eq!(table.state().kills, vec![7, 10, 11]);
        assert!(table.state().processes.is_empty());
        assert!(report.is_success());
    }

    #[tokio::test]
    async fn test_survivor_is_escalated() {
        let table = FakeTable::with(&[(10, "diamond-bot run")]);
        table.state().unkillable.push(10);
        let (bot, monitor) = patterns();
        let report = stop(&mut table.clone(), &bot, &monitor, Duration::ZERO).await;

        assert_eq!(report.outcome, StopOutcome::Escalated { pids: vec![10] });
        assert_eq!(table.state().kills, vec![10, 10]);
        assert!(bot.find(&mut table.clone()).is_empty());
    }

    #[tokio::test]
    async fn test_unkillable_is_reported() {
        let table = FakeTable::with(&[(10, "diamond-bot run")]);
        table.state().unkillable.extend([10, 10, 10]);
        let (bot, monitor) = patterns();
        let report = stop(&mut table.clone(), &bot, &monitor, Duration::ZERO).await;

        assert_eq!(report.outcome, StopOutcome::StillRunning { pids: vec![10] });
        assert!(!report.is_success());
        assert!(report.message().contains("still running"));
    }
}
