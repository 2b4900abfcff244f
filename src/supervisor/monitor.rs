//! Process monitor: keep the bot process alive by restarting it when it
//! disappears from the process table.

use std::time::Duration;
use tracing::{info, warn};

use super::launcher::Launcher;
use super::process::{ProcessPattern, ProcessTable};
use super::status_log::{Marker, StatusLog};

/// What one check found and did.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Running { pids: Vec<u32> },
    Restarted { pid: u32 },
    RestartFailed { error: String },
}

impl Observation {
    /// How long to wait before the next check.
    fn pause(&self, poll_interval: Duration, restart_grace: Duration) -> Duration {
        match self {
            Observation::Running { .. } => poll_interval,
            _ => restart_grace,
        }
    }
}

pub fn join_pids(pids: &[u32]) -> String {
    pids.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(", ")
}

pub struct Monitor {
    table: Box<dyn ProcessTable>,
    launcher: Box<dyn Launcher>,
    pattern: ProcessPattern,
    poll_interval: Duration,
    restart_grace: Duration,
    log: StatusLog,
}

impl Monitor {
    pub fn new(
        table: Box<dyn ProcessTable>,
        launcher: Box<dyn Launcher>,
        pattern: ProcessPattern,
        poll_interval: Duration,
        restart_grace: Duration,
        log: StatusLog,
    ) -> Self {
        Self { table, launcher, pattern, poll_interval, restart_grace, log }
    }

    fn record(&self, marker: Marker, message: &str) {
        if let Err(e) = self.log.record(marker, message) {
            warn!("{e}");
        }
    }

    /// Check once; restart the bot if no matching process is alive.
    pub fn tick(&mut self) -> Observation {
        self.launcher.reap();

        let pids = self.pattern.find(self.table.as_mut());
        if !pids.is_empty() {
            self.record(Marker::Ok, &format!("Bot is running (PID {})", join_pids(&pids)));
            return Observation::Running { pids };
        }

        match self.launcher.launch() {
            Ok(pid) => {
                let message = format!("Bot not running. Restarted (PID {pid})");
                warn!("{message}");
                self.record(Marker::Failed, &message);
                Observation::Restarted { pid }
            }
            Err(error) => {
                let message = format!("Bot not running. Restart failed: {error}");
                warn!("{message}");
                self.record(Marker::Failed, &message);
                Observation::RestartFailed { error }
            }
        }
    }

    /// Check forever, until Ctrl-C.
    pub async fn run(&mut self) {
        let started = format!(
            "Monitor started (PID {}, checking every {}s)",
            std::process::id(),
            self.poll_interval.as_secs()
        );
        info!("👀 {started}");
        self.record(Marker::Start, &started);

        loop {
            let observation = self.tick();
            let pause = observation.pause(self.poll_interval, self.restart_grace);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Monitor stopping");
                    self.record(Marker::Stop, "Monitor stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::launcher::fake::FakeLauncher;
    use crate::supervisor::process::fake::FakeTable;

    fn monitor(table: &FakeTable, fail: bool, dir: &tempfile::TempDir) -> Monitor {
        let mut launcher = FakeLauncher::new(table.clone(), "diamond-bot --config diamond.json run");
        launcher.fail = fail;
        Monitor::new(
            Box::new(table.clone()),
            Box::new(launcher),
            ProcessPattern::new("diamond-bot", &["run", "serve"]),
            Duration::from_secs(30),
            Duration::from_secs(10),
            StatusLog::open(&dir.path().join("monitor.log")).unwrap(),
        )
    }

    fn log_lines(dir: &tempfile::TempDir) -> Vec<String> {
        std::fs::read_to_string(dir.path().join("monitor.log"))
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_running_bot_is_confirmed_with_pid() {
        let dir = tempfile::tempdir().unwrap();
        let table = FakeTable::with(&[(42, "diamond-bot run"), (43, "diamond-bot monitor")]);
        let mut monitor = monitor(&table, false, &dir);

        assert_eq!(monitor.tick(), Observation::Running { pids: vec![42] });
        let lines = log_lines(&dir);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("✅ Bot is running (PID 42)"));
    }

    #[test]
    fn test_absent_bot_is_restarted_once() {
        let dir = tempfile::tempdir().unwrap();
        let table = FakeTable::with(&[(43, "diamond-bot monitor")]);
        let mut monitor = monitor(&table, false, &dir);

        assert_eq!(monitor.tick(), Observation::Restarted { pid: 100 });
        // The restarted process is found on the next check.
        assert_eq!(monitor.tick(), Observation::Running { pids: vec![100] });

        let lines = log_lines(&dir);
        assert_eq!(lines.iter().filter(|l| l.contains("Restarted")).count(), 1);
        assert!(lines[0].contains("❌ Bot not running. Restarted (PID 100)"));
    }

    #[test]
    fn test_failed_restart_is_retried_on_next_tick() {
        let dir = tempfile::tempdir().unwrap();
        let table = FakeTable::default();
        let mut monitor = monitor(&table, true, &dir);

        assert!(matches!(monitor.tick(), Observation::RestartFailed { .. }));
        assert!(matches!(monitor.tick(), Observation::RestartFailed { .. }));
        let lines = log_lines(&dir);
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.contains("Restart failed: exec format error")));
    }

    #[test]
    fn test_pause_after_restart_uses_grace_period() {
        let poll = Duration::from_secs(30);
        let grace = Duration::from_secs(10);
        assert_eq!(Observation::Running { pids: vec![1] }.pause(poll, grace), poll);
        assert_eq!(Observation::Restarted { pid: 1 }.pause(poll, grace), grace);
    }
}
