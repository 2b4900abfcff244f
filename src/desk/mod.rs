//! The trading desk: accounts, sessions, stock, deals, notifications and
//! the activity trail. Everything here is transport-agnostic; the Telegram
//! layer in `bot` only formats and routes.

pub mod accounts;
pub mod activity;
pub mod deals;
pub mod sessions;
pub mod stock;
pub mod workbooks;

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;
use chrono_tz::Tz;
use std::fmt;

/// Current time in the desk's timezone (IST).
pub fn desk_now() -> DateTime<Tz> {
    Utc::now().with_timezone(&Kolkata)
}

/// `YYYY-MM-DD HH:MM:SS` in IST.
pub fn timestamp(at: &DateTime<Tz>) -> String {
    at.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Errors from desk operations.
#[derive(Debug)]
pub enum DeskError {
    /// The database failed.
    Store(rusqlite::Error),
    /// A referenced account, stone or deal does not exist.
    NotFound(String),
    /// The input was rejected.
    Invalid(String),
    /// The operation conflicts with current state (taken name, locked stone, settled deal).
    Conflict(String),
    /// The caller may not perform this operation.
    Forbidden(String),
}

impl DeskError {
    /// Reason without the error class, safe to show to a chat user.
    pub fn detail(&self) -> String {
        match self {
            Self::Store(_) => "Something went wrong. Please try again, or use /fix.".to_string(),
            Self::NotFound(msg) | Self::Invalid(msg) | Self::Conflict(msg) | Self::Forbidden(msg) => msg.clone(),
        }
    }

    pub fn user_message(&self) -> String {
        format!("❌ {}", self.detail())
    }
}

impl fmt::Display for DeskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "storage error: {}", e),
            Self::NotFound(msg) => write!(f, "not found: {}", msg),
            Self::Invalid(msg) => write!(f, "invalid input: {}", msg),
            Self::Conflict(msg) => write!(f, "conflict: {}", msg),
            Self::Forbidden(msg) => write!(f, "forbidden: {}", msg),
        }
    }
}

impl std::error::Error for DeskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DeskError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e)
    }
}
