//! Start routine: launch the bot detached from the calling terminal.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::{info, warn};

use crate::config::Config;

/// Something that can start the bot process.
pub trait Launcher: Send {
    /// Start a new bot process and return its PID.
    fn launch(&mut self) -> Result<u32, String>;
    /// Collect exit statuses of launched children that have finished.
    fn reap(&mut self) {}
}

/// Launches `<exe> --config <path> <mode>` with output appended to a log file.
pub struct BotLauncher {
    exe: PathBuf,
    args: Vec<String>,
    output: PathBuf,
    children: Vec<Child>,
}

impl BotLauncher {
    pub fn new(exe: PathBuf, args: Vec<String>, output: PathBuf) -> Self {
        Self { exe, args, output, children: Vec::new() }
    }

    /// Relaunch the running executable in the configured mode.
    pub fn for_config(config: &Config) -> Result<Self, String> {
        let exe = std::env::current_exe().map_err(|e| format!("Failed to locate executable: {e}"))?;
        let args = vec![
            "--config".to_string(),
            config.config_path.to_string_lossy().into_owned(),
            config.supervisor.mode.as_arg().to_string(),
        ];
        Ok(Self::new(exe, args, config.bot_output_path()))
    }

    pub fn command_line(&self) -> String {
        format!("{} {}", self.exe.display(), self.args.join(" "))
    }
}

fn open_output(path: &Path) -> Result<std::fs::File, String> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open {}: {e}", path.display()))
}

impl Launcher for BotLauncher {
    fn launch(&mut self) -> Result<u32, String> {
        let stdout = open_output(&self.output)?;
        let stderr = stdout
            .try_clone()
            .map_err(|e| format!("Failed to open {}: {e}", self.output.display()))?;

        let mut cmd = Command::new(&self.exe);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr));
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Own process group, so a Ctrl-C in the launching terminal does not reach it.
            cmd.process_group(0);
        }

        let child = cmd
            .spawn()
            .map_err(|e| format!("Failed to start {}: {e}", self.command_line()))?;
        let pid = child.id();
        info!("🚀 Started {} (PID {pid})", self.command_line());
        self.children.push(child);
        Ok(pid)
    }

    fn reap(&mut self) {
        self.children.retain_mut(|child| match child.try_wait() {
            Ok(Some(status)) => {
                warn!("Bot process {} exited with {status}", child.id());
                false
            }
            Ok(None) => true,
            Err(e) => {
                warn!("Failed to poll bot process {}: {e}", child.id());
                false
            }
        });
    }
}


#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_launch_appends_output_and_reaps() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("logs").join("bot-stdout.log");
        let mut launcher = BotLauncher::new(
            PathBuf::from("/bin/sh"),
            vec!["-c".to_string(), "echo started".to_string()],
            output.clone(),
        );

        let pid = launcher.launch().unwrap();
        assert!(pid > 0);
        for _ in 0..50 {
            launcher.reap();
            if launcher.children.is_empty() {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        assert!(launcher.children.is_empty());
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "started\n");
    }

    #[test]
    fn test_launch_reports_missing_executable() {
        let dir = tempfile::tempdir().unwrap();
        let mut launcher = BotLauncher::new(
            PathBuf::from("/nonexistent/diamond-bot"),
            vec!["run".to_string()],
            dir.path().join("out.log"),
        );
        let err = launcher.launch().unwrap_err();
        assert!(err.contains("Failed to start"));
    }
}
