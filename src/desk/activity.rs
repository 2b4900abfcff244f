//! Notifications and the activity audit trail.

use serde_json::Value;

use super::accounts::Role;
use super::sessions::Session;
use super::{DeskError, desk_now};
use crate::store::Store;

/// How many unread notifications are shown on login.
pub const LOGIN_DIGEST_SIZE: usize = 5;

/// A stored message for a user, shown on their next login.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: i64,
    pub username: String,
    pub role: Role,
    pub message: String,
    /// `YYYY-MM-DD HH:MM` (IST)
    pub created_at: String,
    pub read: bool,
}

/// One row of the audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityEntry {
    pub date: String,
    pub time: String,
    pub login_id: String,
    pub role: String,
    pub action: String,
    /// JSON object with action-specific fields.
    pub details: String,
    pub telegram_id: Option<i64>,
}

/// Who performed an audited action.
#[derive(Debug, Clone, PartialEq)]
pub struct Actor {
    pub login_id: String,
    pub role: String,
    pub telegram_id: Option<i64>,
}

impl Actor {
    pub fn new(login_id: &str, role: Role, telegram_id: Option<i64>) -> Self {
        Self { login_id: login_id.to_string(), role: role.as_str().to_string(), telegram_id }
    }

    pub fn system() -> Self {
        Self { login_id: "system".to_string(), role: "system".to_string(), telegram_id: None }
    }
}

impl From<&Session> for Actor {
    fn from(session: &Session) -> Self {
        Self::new(&session.username, session.role, Some(session.telegram_id))
    }
}

/// Append an entry to the audit trail.
pub fn record(store: &Store, actor: &Actor, action: &str, details: Value) -> Result<(), DeskError> {
    let now = desk_now();
    store.log_activity(&ActivityEntry {
        date: now.format("%Y-%m-%d").to_string(),
        time: now.format("%H:%M:%S").to_string(),
        login_id: actor.login_id.clone(),
        role: actor.role.clone(),
        action: action.to_string(),
        details: details.to_string(),
        telegram_id: actor.telegram_id,
    })?;
    Ok(())
}

/// Store a notification for a user.
pub fn notify(store: &Store, username: &str, role: Role, message: &str) -> Result<(), DeskError> {
    let created_at = desk_now().format("%Y-%m-%d %H:%M").to_string();
    store.add_notification(username, role, message, &created_at)?;
    Ok(())
}

/// A message for one user, produced by a desk operation. The bot pushes it
/// to the user's chat when they are logged in and stores it otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub username: String,
    pub role: Role,
    pub message: String,
}

impl Notice {
    pub fn new(username: &str, role: Role, message: impl Into<String>) -> Self {
        Self { username: username.to_string(), role, message: message.into() }
    }
}

/// One notice per admin account.
pub fn admin_notices(store: &Store, message: &str) -> Result<Vec<Notice>, DeskError> {
    Ok(store
        .usernames_with_role(Role::Admin)?
        .iter()
        .map(|admin| Notice::new(admin, Role::Admin, message))
        .collect())
}

/// Keep notices for the recipients' next login.
pub fn store_notices(store: &Store, notices: &[Notice]) -> Result<(), DeskError> {
    for notice in notices {
        notify(store, &notice.username, notice.role, &notice.message)?;
    }
    Ok(())
}

/// Unread notifications collected at login.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadDigest {
    pub shown: Vec<Notification>,
    pub more: usize,
}

impl UnreadDigest {
    pub fn render(&self) -> Option<String> {
        if self.shown.is_empty() {
            return None;
        }
        let mut text = String::from("🔔 Notifications:\n");
        for n in &self.shown {
            text.push_str(&format!("\n• [{}] {}", n.created_at, n.message));
        }
        if self.more > 0 {
            text.push_str(&format!("\n\n... and {} more", self.more));
        }
        Some(text)
    }
}

/// Mark all unread notifications read and return the first few.
pub fn take_unread(store: &Store, username: &str, role: Role) -> Result<UnreadDigest, DeskError> {
    let mut unread = store.take_unread_notifications(username, role)?;
    let more = unread.len().saturating_sub(LOGIN_DIGEST_SIZE);
    unread.truncate(LOGIN_DIGEST_SIZE);
    Ok(UnreadDigest { shown: unread, more })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_digest_caps_and_counts_rest() {
        let store = Store::in_memory().unwrap();
        for i in 0..7 {
            notify(&store, "bob", Role::Client, &format!("message {i}")).unwrap();
        }
        let digest = take_unread(&store, "bob", Role::Client).unwrap();
        assert_eq!(digest.shown.len(), 5);
        assert_eq!(digest.more, 2);
        let text = digest.render().unwrap();
        assert!(text.contains("message 0"));
        assert!(text.contains("... and 2 more"));

        let empty = take_unread(&store, "bob", Role::Client).unwrap();
        assert!(empty.render().is_none());
    }

    #[test]
    fn test_admin_notices_reach_every_admin() {
        let store = Store::in_memory().unwrap();
        for (name, role) in [("root", Role::Admin), ("ops", Role::Admin), ("bob", Role::Client)] {
            store
                .insert_account(&super::super::accounts::Account {
                    username: name.to_string(),
                    password: "1234".to_string(),
                    role,
                    approved: true,
                    created_at: String::new(),
                })
                .unwrap();
        }
        let notices = admin_notices(&store, "new signup").unwrap();
        assert_eq!(notices.len(), 2);
        assert!(notices.iter().all(|n| n.role == Role::Admin));

        store_notices(&store, &notices).unwrap();
        assert_eq!(take_unread(&store, "ops", Role::Admin).unwrap().shown.len(), 1);
        assert!(take_unread(&store, "bob", Role::Client).unwrap().shown.is_empty());
    }

    #[test]
    fn test_record_writes_json_details() {
        let store = Store::in_memory().unwrap();
        let actor = Actor::new("bob", Role::Client, Some(42));
        record(&store, &actor, "REQUEST_DEAL", json!({"stone_id": "D1", "offer": 4500.0})).unwrap();

        let entries = store.activity().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "REQUEST_DEAL");
        assert_eq!(entries[0].role, "client");
        assert_eq!(entries[0].telegram_id, Some(42));
        let details: Value = serde_json::from_str(&entries[0].details).unwrap();
        assert_eq!(details["stone_id"], "D1");
    }
}
