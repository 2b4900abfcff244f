//! Per-user conversation state for multi-step prompts.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::desk::stock::CaratFilter;

/// Answers collected so far in a search.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDraft {
    pub carat: CaratFilter,
    pub shapes: Option<Vec<String>>,
    pub colors: Option<Vec<String>>,
}

/// What the user's next text message answers.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow {
    CreateUsername,
    CreatePassword { username: String },
    LoginUsername,
    LoginPassword { username: String },
    SearchCarat,
    SearchShape(SearchDraft),
    SearchColor(SearchDraft),
    SearchClarity(SearchDraft),
    DealStone,
    DealOffer { stock_id: String },
    /// Waiting for a filled bulk deal sheet.
    BulkDeal,
    /// Waiting for a stock file.
    Upload,
}

impl Flow {
    pub fn name(&self) -> &'static str {
        match self {
            Flow::CreateUsername => "create_username",
            Flow::CreatePassword { .. } => "create_password",
            Flow::LoginUsername => "login_username",
            Flow::LoginPassword { .. } => "login_password",
            Flow::SearchCarat => "search_carat",
            Flow::SearchShape(_) => "search_shape",
            Flow::SearchColor(_) => "search_color",
            Flow::SearchClarity(_) => "search_clarity",
            Flow::DealStone => "deal_stone",
            Flow::DealOffer { .. } => "deal_offer",
            Flow::BulkDeal => "bulk_deal_excel",
            Flow::Upload => "upload_excel",
        }
    }

    /// Steps that run before the user is logged in.
    pub fn is_anonymous(&self) -> bool {
        matches!(
            self,
            Flow::CreateUsername | Flow::CreatePassword { .. } | Flow::LoginUsername | Flow::LoginPassword { .. }
        )
    }
}

/// Flows keyed by Telegram user id, stamped with when they were last set.
#[derive(Default)]
pub struct FlowBook {
    flows: Mutex<HashMap<i64, (Flow, Instant)>>,
}

impl FlowBook {
    fn lock(&self) -> MutexGuard<'_, HashMap<i64, (Flow, Instant)>> {
        self.flows.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, user: i64, flow: Flow) {
        self.lock().insert(user, (flow, Instant::now()));
    }

    pub fn get(&self, user: i64) -> Option<Flow> {
        self.lock().get(&user).map(|(flow, _)| flow.clone())
    }

    pub fn clear(&self, user: i64) -> Option<Flow> {
        self.lock().remove(&user).map(|(flow, _)| flow)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop flows untouched for longer than `max_age`. Returns how many.
    pub fn prune(&self, max_age: Duration, now: Instant) -> usize {
        let mut flows = self.lock();
        let before = flows.len();
        flows.retain(|_, (_, at)| now.saturating_duration_since(*at) <= max_age);
        before - flows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_replaces_and_clear_removes() {
        let book = FlowBook::default();
        book.set(1, Flow::LoginUsername);
        book.set(1, Flow::LoginPassword { username: "alice".into() });
        assert_eq!(book.get(1), Some(Flow::LoginPassword { username: "alice".into() }));
        assert_eq!(book.clear(1).map(|f| f.name()), Some("login_password"));
        assert_eq!(book.get(1), None);
    }

    #[test]
    fn test_prune_drops_stale_flows() {
        let book = FlowBook::default();
        book.set(1, Flow::Upload);
        book.set(2, Flow::SearchCarat);

        assert_eq!(book.prune(Duration::from_secs(1800), Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(1801);
        assert_eq!(book.prune(Duration::from_secs(1800), later), 2);
        assert_eq!(book.get(1), None);
    }
}
