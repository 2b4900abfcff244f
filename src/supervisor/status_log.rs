//! Append-only status log: `[YYYY-MM-DD HH:MM:SS] <emoji> <message>`.

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Start,
    Ok,
    Failed,
    Warning,
    Stop,
}

impl Marker {
    pub fn emoji(&self) -> &'static str {
        match self {
            Marker::Start => "🚀",
            Marker::Ok => "✅",
            Marker::Failed => "❌",
            Marker::Warning => "⚠️",
            Marker::Stop => "🛑",
        }
    }
}

pub struct StatusLog {
    path: PathBuf,
}

impl StatusLog {
    pub fn open(path: &Path) -> Result<Self, String> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| format!("Failed to create {}: {e}", dir.display()))?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("Failed to open {}: {e}", path.display()))?;
        Ok(Self { path: path.to_path_buf() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn line(marker: Marker, message: &str) -> String {
        format!("[{}] {} {}", Local::now().format("%Y-%m-%d %H:%M:%S"), marker.emoji(), message)
    }

    /// Append a line. The file is reopened each time so that external
    /// rotation or truncation is picked up.
    pub fn record(&self, marker: Marker, message: &str) -> Result<(), String> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| format!("Failed to open {}: {e}", self.path.display()))?;
        writeln!(file, "{}", Self::line(marker, message))
            .map_err(|e| format!("Failed to write {}: {e}", self.path.display()))
    }
}
