//! Logged-in sessions and per-user rate limiting.

use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::info;

use super::accounts::{Account, Role, supplier_key};
use super::activity::{self, Actor};
use super::DeskError;
use crate::store::Store;

/// Timestamps kept per user by the rate limiter.
const RATE_HISTORY_CAP: usize = 10;

/// A logged-in Telegram user.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub telegram_id: i64,
    pub chat_id: i64,
    pub username: String,
    pub role: Role,
    /// Unix seconds.
    pub last_active: i64,
}

impl Session {
    pub fn supplier_key(&self) -> String {
        supplier_key(&self.username)
    }
}

/// Sessions persisted in the store, expired after a period of inactivity.
pub struct SessionBook {
    store: Arc<Store>,
    timeout_secs: i64,
}

impl SessionBook {
    pub fn new(store: Arc<Store>, timeout: Duration) -> Self {
        Self { store, timeout_secs: timeout.as_secs() as i64 }
    }

    pub fn login(&self, telegram_id: i64, chat_id: i64, account: &Account, now: i64) -> Result<Session, DeskError> {
        let session = Session {
            telegram_id,
            chat_id,
            username: account.username.clone(),
            role: account.role,
            last_active: now,
        };
        self.store.save_session(&session)?;
        activity::record(&self.store, &Actor::from(&session), "LOGIN", json!({}))?;
        info!("🔑 {} logged in as {}", session.username, session.role);
        Ok(session)
    }

    /// The user's live session, refreshed. An expired session is removed.
    pub fn current(&self, telegram_id: i64, now: i64) -> Result<Option<Session>, DeskError> {
        let Some(mut session) = self.store.session(telegram_id)? else {
            return Ok(None);
        };
        if now - session.last_active > self.timeout_secs {
            self.store.delete_session(telegram_id)?;
            activity::record(&self.store, &Actor::from(&session), "SESSION_EXPIRED", json!({}))?;
            return Ok(None);
        }
        self.store.touch_session(telegram_id, now)?;
        session.last_active = now;
        Ok(Some(session))
    }

    pub fn logout(&self, telegram_id: i64) -> Result<Option<Session>, DeskError> {
        let session = self.store.session(telegram_id)?;
        if let Some(ref s) = session {
            self.store.delete_session(telegram_id)?;
            activity::record(&self.store, &Actor::from(s), "LOGOUT", json!({}))?;
        }
        Ok(session)
    }

    /// Drop every session idle for longer than the timeout.
    pub fn expire(&self, now: i64) -> Result<Vec<Session>, DeskError> {
        let expired = self.store.take_expired_sessions(now - self.timeout_secs)?;
        for session in &expired {
            activity::record(&self.store, &Actor::from(session), "SESSION_EXPIRED", json!({}))?;
        }
        Ok(expired)
    }

    pub fn active(&self) -> Result<Vec<Session>, DeskError> {
        Ok(self.store.sessions()?)
    }

    /// Chat of the user's most recent session, for direct pushes.
    pub fn chat_of(&self, username: &str) -> Result<Option<i64>, DeskError> {
        Ok(self.store.session_for_username(username)?.map(|s| s.chat_id))
    }
}

/// Sliding-window message limiter.
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    history: Mutex<HashMap<i64, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self { limit, window, history: Mutex::new(HashMap::new()) }
    }

    /// Record a message from `user`. Returns true if it exceeds the limit;
    /// rejected messages are not recorded.
    pub fn is_limited(&self, user: i64, now: Instant) -> bool {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let entries = history.entry(user).or_default();

        while let Some(&front) = entries.front() {
            if now.saturating_duration_since(front) >= self.window {
                entries.pop_front();
            } else {
                break;
            }
        }

        if entries.len() >= self.limit {
            return true;
        }
        entries.push_back(now);
        if entries.len() > RATE_HISTORY_CAP {
            entries.pop_front();
        }
        false
    }

    pub fn reset(&self, user: i64) {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).remove(&user);
    }

    /// Forget users with no message inside the window. Returns how many.
    pub fn prune(&self, now: Instant) -> usize {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let before = history.len();
        history.retain(|_, entries| {
            entries
                .back()
                .is_some_and(|&last| now.saturating_duration_since(last) < self.window)
        });
        before - history.len()
    }

    /// Users currently tracked.
    pub fn tracked(&self) -> usize {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
