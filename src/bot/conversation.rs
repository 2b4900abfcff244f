//! The chat side of the desk: commands, menu buttons, prompts, uploads and
//! inline buttons become lists of outgoing messages. Nothing here talks to
//! Telegram; `bot::run` sends what these methods return.

use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::commands::Command;
use super::flows::{Flow, FlowBook, SearchDraft};
use super::keyboards::{CallbackAction, Keyboard, MenuButton};
use crate::config::Config;
use crate::desk::accounts::{self, Role};
use crate::desk::activity::{self, Actor, Notice};
use crate::desk::deals::{self, Deal, DealAction, DealCounts, DealStatus};
use crate::desk::sessions::{RateLimiter, Session, SessionBook};
use crate::desk::stock::{self, CaratFilter, SearchQuery, Stone};
use crate::desk::workbooks;
use crate::desk::DeskError;
use crate::sheet::{Sheet, SheetFormat, read_sheet, write_xlsx};
use crate::store::Store;
use crate::text::{clean_text, format_money, format_number, parse_amount};

const WELCOME: &str = "💎 Welcome to the Diamond Trading Bot!\n\n\
    🔑 /login to sign in\n\
    🆕 /createaccount to request an account\n\
    ❓ /help for all commands";
const LOGIN_REQUIRED: &str = "🔒 Please login first using /login\nOr create an account using /createaccount";
const RATE_LIMITED: &str = "⏳ Too many messages. Please slow down.";
const USE_MENU: &str = "Please use the menu buttons.";
const NO_STONES: &str = "💎 No stones are available right now. Please check back later.";

const CARAT_PROMPT: &str = "Enter Carat (e.g., 1.5 or 1-2) or 'any':";
const SHAPE_PROMPT: &str = "Enter Shape(s) (e.g., round, oval) or 'any':";
const COLOR_PROMPT: &str = "Enter Color(s) (e.g., d, e, f) or 'any':";
const CLARITY_PROMPT: &str = "Enter Clarity(ies) (e.g., vs1, vvs2) or 'any':";
const STONE_PROMPT: &str = "🔢 Enter the Stock # you want to make an offer on:";
const OFFER_PROMPT: &str = "💰 Enter your offer price ($ per carat):";

/// With more stones than this in stock, deal requests go through a sheet.
const BULK_DEAL_THRESHOLD: usize = 20;
const BULK_TEMPLATE_STONES: usize = 10;
const DEAL_CHOICES: usize = 5;
const SMART_DEALS_SHOWN: usize = 5;
const LEADERBOARD_SHOWN: usize = 10;
const UPLOAD_ERRORS_SHOWN: usize = 5;
const UPLOAD_WARNINGS_SHOWN: usize = 3;
const BULK_FAILURES_SHOWN: usize = 10;
/// Deals listed with action buttons under "View Deals".
const DEAL_CARDS_SHOWN: usize = 10;

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Sender of an update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Origin {
    pub user_id: i64,
    pub chat_id: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Text { chat_id: i64, text: String, keyboard: Option<Keyboard> },
    Document { chat_id: i64, file_name: String, bytes: Vec<u8>, caption: String },
}

impl Outgoing {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Outgoing::Text { chat_id, text: text.into(), keyboard: None }
    }

    pub fn chat_id(&self) -> i64 {
        match self {
            Outgoing::Text { chat_id, .. } | Outgoing::Document { chat_id, .. } => *chat_id,
        }
    }
}

/// Replies to one chat, plus pushes to others.
struct Replies {
    chat_id: i64,
    out: Vec<Outgoing>,
}

impl Replies {
    fn new(chat_id: i64) -> Self {
        Self { chat_id, out: Vec::new() }
    }

    fn say(&mut self, text: impl Into<String>) {
        self.out.push(Outgoing::text(self.chat_id, text));
    }

    fn say_with(&mut self, text: impl Into<String>, keyboard: Keyboard) {
        self.out.push(Outgoing::Text { chat_id: self.chat_id, text: text.into(), keyboard: Some(keyboard) });
    }

    fn push_to(&mut self, chat_id: i64, text: impl Into<String>) {
        self.out.push(Outgoing::text(chat_id, text));
    }

    fn workbook(&mut self, file_name: &str, sheets: &[Sheet], caption: impl Into<String>) {
        match write_xlsx(sheets) {
            Ok(bytes) => self.out.push(Outgoing::Document {
                chat_id: self.chat_id,
                file_name: file_name.to_string(),
                bytes,
                caption: caption.into(),
            }),
            Err(e) => {
                error!("Failed to build {file_name}: {e}");
                self.say("❌ Could not build the spreadsheet. Please try again.");
            }
        }
    }

    fn finish(self) -> Vec<Outgoing> {
        self.out
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UploadKind {
    Stock,
    BulkDeal,
}

/// A document accepted for download and processing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PendingUpload {
    pub kind: UploadKind,
    pub format: SheetFormat,
}

/// Answer to an inline button press.
#[derive(Debug, Default, PartialEq)]
pub struct CallbackReply {
    /// Toast shown to the presser; an alert when `alert` is set.
    pub answer: Option<String>,
    pub alert: bool,
    /// New text for the message carrying the button.
    pub edit: Option<String>,
    pub messages: Vec<Outgoing>,
}

impl CallbackReply {
    fn alert(text: impl Into<String>) -> Self {
        Self { answer: Some(text.into()), alert: true, ..Default::default() }
    }
}

/// Sizes of the conversation's in-memory state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeskActivity {
    pub open_flows: usize,
    pub rate_limited_users: usize,
}

pub struct Conversation {
    store: Arc<Store>,
    sessions: SessionBook,
    flows: FlowBook,
    limiter: RateLimiter,
}

fn welcome(session: &Session) -> String {
    match session.role {
        Role::Admin => format!("👑 Welcome Admin {}", session.username),
        Role::Supplier => format!("💎 Welcome Supplier {}", session.username),
        Role::Client => format!("🥂 Welcome {}", session.username),
    }
}

fn awaits(role: Role, deal: &Deal) -> bool {
    deal.final_status == DealStatus::Open
        && match role {
            Role::Supplier => deal.supplier_action == DealAction::Pending,
            Role::Admin => deal.supplier_action == DealAction::Accepted && deal.admin_action == DealAction::Pending,
            Role::Client => false,
        }
}

fn deal_buttons(role: Role, deal: &Deal) -> Keyboard {
    let id = deal.deal_id.clone();
    match role {
        Role::Admin => Keyboard::choice(
            ("✅ Approve", CallbackAction::ApproveDeal(id.clone())),
            ("❌ Close", CallbackAction::CloseDeal(id)),
        ),
        _ => Keyboard::choice(
            ("✅ Accept", CallbackAction::AcceptDeal(id.clone())),
            ("❌ Decline", CallbackAction::DeclineDeal(id)),
        ),
    }
}

fn forbid_unless_admin(session: &Session) -> Result<(), DeskError> {
    if session.role != Role::Admin {
        return Err(DeskError::Forbidden("Only admins can do that.".to_string()));
    }
    Ok(())
}

impl Conversation {
    pub fn new(store: Arc<Store>, session_timeout: Duration, rate_limit: usize, rate_window: Duration) -> Self {
        Self {
            sessions: SessionBook::new(store.clone(), session_timeout),
            store,
            flows: FlowBook::default(),
            limiter: RateLimiter::new(rate_limit, rate_window),
        }
    }

    pub fn from_config(store: Arc<Store>, config: &Config) -> Self {
        Self::new(store, config.session_timeout, config.rate_limit, config.rate_limit_window)
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Remove idle sessions. Returns how many were removed.
    pub fn expire_sessions(&self) -> Result<usize, DeskError> {
        Ok(self.sessions.expire(unix_now())?.len())
    }

    /// Forget prompts left unanswered for longer than `max_age`.
    pub fn prune_flows(&self, max_age: Duration) -> usize {
        self.flows.prune(max_age, Instant::now())
    }

    /// Drop rate-limit history of users who have gone quiet.
    pub fn prune_rate_limits(&self) -> usize {
        self.limiter.prune(Instant::now())
    }

    /// In-memory bookkeeping sizes.
    pub fn activity(&self) -> DeskActivity {
        DeskActivity { open_flows: self.flows.len(), rate_limited_users: self.limiter.tracked() }
    }

    fn session(&self, from: Origin) -> Result<Option<Session>, DeskError> {
        self.sessions.current(from.user_id, unix_now())
    }

    fn limited(&self, from: Origin) -> Option<Vec<Outgoing>> {
        if self.limiter.is_limited(from.user_id, Instant::now()) {
            info!("Rate limited user {}", from.user_id);
            return Some(vec![Outgoing::text(from.chat_id, RATE_LIMITED)]);
        }
        None
    }

    fn report(&self, error: DeskError, out: &mut Replies) {
        if matches!(error, DeskError::Store(_)) {
            error!("❌ Desk operation failed: {error}");
        }
        out.say(error.user_message());
    }

    /// Store notices for the recipients and push them to those with a session.
    fn deliver(&self, notices: Vec<Notice>, out: &mut Replies) {
        if let Err(e) = activity::store_notices(&self.store, &notices) {
            error!("Failed to store notifications: {e}");
        }
        for notice in notices {
            match self.sessions.chat_of(&notice.username) {
                Ok(Some(chat_id)) => out.push_to(chat_id, notice.message),
                Ok(None) => {}
                Err(e) => warn!("Failed to look up a chat for {}: {e}", notice.username),
            }
        }
    }

    // ---- commands ----

    pub fn command(&self, from: Origin, command: Command) -> Vec<Outgoing> {
        if command != Command::Fix
            && let Some(out) = self.limited(from)
        {
            return out;
        }
        let mut out = Replies::new(from.chat_id);
        if let Err(e) = self.on_command(from, command, &mut out) {
            self.report(e, &mut out);
        }
        out.finish()
    }

    fn on_command(&self, from: Origin, command: Command, out: &mut Replies) -> Result<(), DeskError> {
        match command {
            Command::Start => match self.session(from)? {
                Some(session) => out.say_with(format!("{}\n\n{WELCOME}", welcome(&session)), Keyboard::Menu(session.role)),
                None => out.say(WELCOME),
            },
            Command::Help => out.say(Command::help()),
            Command::CreateAccount => match self.session(from)? {
                Some(session) => out.say(format!("You are already logged in as {}. Use /logout first.", session.username)),
                None => {
                    self.flows.set(from.user_id, Flow::CreateUsername);
                    out.say_with(
                        format!("👤 Choose a username (at least {} characters):", accounts::MIN_USERNAME_LEN),
                        Keyboard::Remove,
                    );
                }
            },
            Command::Login => match self.session(from)? {
                Some(session) => out.say_with(
                    format!("You are already logged in as {}.", session.username),
                    Keyboard::Menu(session.role),
                ),
                None => {
                    self.flows.set(from.user_id, Flow::LoginUsername);
                    out.say_with("👤 Enter your username:", Keyboard::Remove);
                }
            },
            Command::Logout => self.logout(from, out)?,
            Command::Reset => {
                self.flows.clear(from.user_id);
                self.say_with_menu(from, "🔄 Conversation reset.", out)?;
            }
            Command::Fix => {
                self.flows.clear(from.user_id);
                self.limiter.reset(from.user_id);
                info!("🛠 Cleared state for user {}", from.user_id);
                self.say_with_menu(from, "🛠 Conversation state and message limit cleared.", out)?;
            }
            Command::Upload => {
                let Some(session) = self.session(from)? else {
                    out.say(LOGIN_REQUIRED);
                    return Ok(());
                };
                if session.role != Role::Supplier {
                    return Err(DeskError::Forbidden("Only suppliers can upload stock.".to_string()));
                }
                self.start_upload(&session, out)?;
            }
            Command::MyState => {
                let flow = self.flows.get(from.user_id).map(|f| f.name()).unwrap_or("none");
                let who = match self.session(from)? {
                    Some(s) => format!("👤 Logged in as {} ({})", s.username, s.role),
                    None => "👤 Not logged in".to_string(),
                };
                out.say(format!("{who}\n🧭 Prompt: {flow}\n🆔 Telegram ID: {}", from.user_id));
            }
            Command::TestData => {
                let Some(session) = self.session(from)? else {
                    out.say(LOGIN_REQUIRED);
                    return Ok(());
                };
                forbid_unless_admin(&session)?;
                let c = self.store.counts()?;
                out.say(format!(
                    "🧪 Database\n👥 Accounts: {}\n🔑 Sessions: {}\n💎 Stones: {}\n🤝 Deals: {}\n🔔 Notifications: {}\n📑 Activity: {}",
                    c.accounts, c.sessions, c.stones, c.deals, c.notifications, c.activity
                ));
            }
        }
        Ok(())
    }

    fn say_with_menu(&self, from: Origin, text: &str, out: &mut Replies) -> Result<(), DeskError> {
        match self.session(from)? {
            Some(session) => out.say_with(text, Keyboard::Menu(session.role)),
            None => out.say(text),
        }
        Ok(())
    }

    fn logout(&self, from: Origin, out: &mut Replies) -> Result<(), DeskError> {
        self.flows.clear(from.user_id);
        match self.sessions.logout(from.user_id)? {
            Some(session) => {
                info!("👋 {} logged out", session.username);
                out.say_with("👋 Logged out. Use /login to sign in again.", Keyboard::Remove);
            }
            None => out.say("You are not logged in."),
        }
        Ok(())
    }

    // ---- text ----

    pub fn text(&self, from: Origin, text: &str) -> Vec<Outgoing> {
        if let Some(out) = self.limited(from) {
            return out;
        }
        let mut out = Replies::new(from.chat_id);
        if let Err(e) = self.on_text(from, text, &mut out) {
            self.report(e, &mut out);
        }
        out.finish()
    }

    fn on_text(&self, from: Origin, text: &str, out: &mut Replies) -> Result<(), DeskError> {
        let flow = self.flows.get(from.user_id);
        match &flow {
            Some(Flow::CreateUsername) => return self.create_username(from, text, out),
            Some(Flow::CreatePassword { username }) => return self.create_password(from, username, text, out),
            Some(Flow::LoginUsername) => {
                self.flows.set(from.user_id, Flow::LoginPassword { username: clean_text(text) });
                out.say("🔑 Enter your password:");
                return Ok(());
            }
            Some(Flow::LoginPassword { username }) => return self.login(from, username, text, out),
            _ => {}
        }

        let Some(session) = self.session(from)? else {
            self.flows.clear(from.user_id);
            out.say(LOGIN_REQUIRED);
            return Ok(());
        };
        if let Some(button) = MenuButton::parse(session.role, text) {
            self.flows.clear(from.user_id);
            return self.on_button(&session, button, out);
        }
        match flow {
            Some(flow) => self.on_step(&session, flow, text, out),
            None => {
                out.say_with(USE_MENU, Keyboard::Menu(session.role));
                Ok(())
            }
        }
    }

    fn create_username(&self, from: Origin, text: &str, out: &mut Replies) -> Result<(), DeskError> {
        match accounts::check_username(&self.store, text) {
            Ok(username) => {
                self.flows.set(from.user_id, Flow::CreatePassword { username });
                out.say(format!("🔑 Choose a password (at least {} characters):", accounts::MIN_PASSWORD_LEN));
            }
            Err(DeskError::Store(e)) => return Err(DeskError::Store(e)),
            Err(e) => out.say(format!("{}\n👤 Try another username:", e.user_message())),
        }
        Ok(())
    }

    fn create_password(&self, from: Origin, username: &str, text: &str, out: &mut Replies) -> Result<(), DeskError> {
        match accounts::register(&self.store, username, text, Some(from.user_id)) {
            Ok((account, notices)) => {
                self.flows.clear(from.user_id);
                info!("🆕 Account request from {}", account.username);
                out.say(format!(
                    "✅ Account {} created. An admin will review it; you can /login once it is approved.",
                    account.username
                ));
                self.deliver(notices, out);
                Ok(())
            }
            Err(DeskError::Invalid(msg)) => {
                out.say(format!("❌ {msg}\n🔑 Try another password:"));
                Ok(())
            }
            Err(e) => {
                self.flows.clear(from.user_id);
                Err(e)
            }
        }
    }

    fn login(&self, from: Origin, username: &str, password: &str, out: &mut Replies) -> Result<(), DeskError> {
        self.flows.clear(from.user_id);
        let account = accounts::authenticate(&self.store, username, password)?;
        let session = self.sessions.login(from.user_id, from.chat_id, &account, unix_now())?;
        out.say_with(welcome(&session), Keyboard::Menu(session.role));
        if let Some(digest) = activity::take_unread(&self.store, &session.username, session.role)?.render() {
            out.say(digest);
        }
        Ok(())
    }

    fn on_step(&self, session: &Session, flow: Flow, text: &str, out: &mut Replies) -> Result<(), DeskError> {
        let user = session.telegram_id;
        match flow {
            Flow::SearchCarat => match CaratFilter::parse(text) {
                Ok(carat) => {
                    self.flows.set(user, Flow::SearchShape(SearchDraft { carat, shapes: None, colors: None }));
                    out.say(SHAPE_PROMPT);
                }
                Err(e) => out.say(format!("{}\n{CARAT_PROMPT}", e.user_message())),
            },
            Flow::SearchShape(mut draft) => {
                draft.shapes = stock::parse_choices(text);
                self.flows.set(user, Flow::SearchColor(draft));
                out.say(COLOR_PROMPT);
            }
            Flow::SearchColor(mut draft) => {
                draft.colors = stock::parse_choices(text);
                self.flows.set(user, Flow::SearchClarity(draft));
                out.say(CLARITY_PROMPT);
            }
            Flow::SearchClarity(draft) => {
                self.flows.clear(user);
                let query = SearchQuery {
                    carat: draft.carat,
                    shapes: draft.shapes,
                    colors: draft.colors,
                    clarities: stock::parse_choices(text),
                };
                self.search(session, &query, out)?;
            }
            Flow::DealStone => {
                let stock_id = clean_text(text);
                match self.store.find_stone(&stock_id)? {
                    None => out.say(format!("❌ Stone {stock_id} not found.\n{STONE_PROMPT}")),
                    Some(stone) if stone.locked => {
                        out.say(format!("❌ Stone {stock_id} is locked in another deal.\n{STONE_PROMPT}"))
                    }
                    Some(stone) => {
                        self.flows.set(user, Flow::DealOffer { stock_id: stone.stock_id.clone() });
                        out.say(format!("{}\n\n{OFFER_PROMPT}", stone.card()));
                    }
                }
            }
            Flow::DealOffer { stock_id } => {
                let Some(offer) = parse_amount(text).filter(|v| *v > 0.0) else {
                    out.say(format!("❌ Offer price must be a number greater than 0.\n{OFFER_PROMPT}"));
                    return Ok(());
                };
                self.flows.clear(user);
                let (deal, notice) = deals::request_deal(&self.store, session, &stock_id, offer)?;
                info!("🤝 {} offered {}/ct on {} ({})", session.username, offer, deal.stone_id, deal.deal_id);
                out.say_with(
                    format!(
                        "✅ Deal {} requested for stone {} at {}/ct. The supplier has been notified.",
                        deal.deal_id,
                        deal.stone_id,
                        format_money(offer)
                    ),
                    Keyboard::Menu(session.role),
                );
                self.deliver(vec![notice], out);
            }
            Flow::BulkDeal => out.say("📎 Send the filled bulk deal sheet (.xlsx or .csv), or /reset to cancel."),
            Flow::Upload => out.say("📎 Send your stock file (.xlsx or .csv), or /reset to cancel."),
            Flow::CreateUsername | Flow::CreatePassword { .. } | Flow::LoginUsername | Flow::LoginPassword { .. } => {}
        }
        Ok(())
    }

    fn search(&self, session: &Session, query: &SearchQuery, out: &mut Replies) -> Result<(), DeskError> {
        let stones = self.store.stones()?;
        let found: Vec<Stone> = stock::search(&stones, query).into_iter().cloned().collect();
        activity::record(
            &self.store,
            &Actor::from(session),
            "SEARCH",
            json!({
                "carat": format!("{:?}", query.carat),
                "shapes": query.shapes,
                "colors": query.colors,
                "clarities": query.clarities,
                "results": found.len(),
            }),
        )?;

        let menu = Keyboard::Menu(session.role);
        if found.is_empty() {
            out.say_with("❌ No diamonds match your filters.", menu);
        } else if found.len() > stock::SEARCH_INLINE_LIMIT {
            out.say_with(format!("💎 Found {} diamonds. Sending them as a spreadsheet.", found.len()), menu);
            out.workbook(
                "search_results.xlsx",
                &[workbooks::stones_sheet("Results", &found)],
                format!("💎 {} diamonds", found.len()),
            );
        } else {
            out.say_with(format!("💎 Found {} diamond(s):", found.len()), menu);
            for stone in &found {
                out.say(stone.card());
            }
        }
        Ok(())
    }

    // ---- menu buttons ----

    fn record(&self, session: &Session, action: &str) -> Result<(), DeskError> {
        activity::record(&self.store, &Actor::from(session), action, json!({}))
    }

    fn on_button(&self, session: &Session, button: MenuButton, out: &mut Replies) -> Result<(), DeskError> {
        match button {
            MenuButton::ViewAllStock => {
                self.record(session, "VIEW_ALL_STOCK")?;
                let stones = self.store.stones()?;
                if stones.is_empty() {
                    out.say("💎 No stock on the desk yet.");
                    return Ok(());
                }
                out.say(stock::summarize(&stones).render("💎 All Stock"));
                out.workbook("all_stock.xlsx", &[workbooks::stones_sheet("Stock", &stones)], "💎 All stock");
            }
            MenuButton::ViewUsers => {
                self.record(session, "VIEW_USERS")?;
                let users = self.store.accounts()?;
                let s = accounts::summarize_users(&users);
                out.say(format!(
                    "👥 Users: {}\n👑 Admins: {}\n🏭 Suppliers: {}\n🥂 Clients: {}\n✅ Approved: {}\n⏳ Pending: {}",
                    s.total, s.admins, s.suppliers, s.clients, s.approved, s.pending
                ));
                out.workbook("users.xlsx", &[workbooks::accounts_sheet(&users)], "👥 Users");
            }
            MenuButton::PendingAccounts => {
                self.record(session, "VIEW_PENDING_ACCOUNTS")?;
                let pending = self.store.pending_accounts()?;
                if pending.is_empty() {
                    out.say("✅ No pending accounts.");
                    return Ok(());
                }
                for account in pending {
                    out.say_with(
                        format!("👤 {} ({})\n🕒 Requested {}", account.username, account.role, account.created_at),
                        Keyboard::choice(
                            ("✅ Approve", CallbackAction::ApproveAccount(account.username.clone())),
                            ("❌ Reject", CallbackAction::RejectAccount(account.username.clone())),
                        ),
                    );
                }
            }
            MenuButton::SupplierLeaderboard => {
                self.record(session, "VIEW_SUPPLIER_LEADERBOARD")?;
                let standings = stock::leaderboard(&self.store.stones()?);
                if standings.is_empty() {
                    out.say("🏆 No supplier stock yet.");
                    return Ok(());
                }
                let mut text = String::from("🏆 Supplier Leaderboard\n");
                for (rank, s) in standings.iter().take(LEADERBOARD_SHOWN).enumerate() {
                    text.push_str(&format!(
                        "\n{}. {}: {} stones | {} ct | avg {}/ct | {}",
                        rank + 1,
                        s.display_name(),
                        s.stones,
                        format_number(s.carats, 2),
                        format_money(s.avg_price),
                        format_money(s.value),
                    ));
                }
                out.say(text);
                out.workbook("leaderboard.xlsx", &[workbooks::leaderboard_sheet(&standings)], "🏆 Leaderboard");
            }
            MenuButton::ViewDeals => self.view_deals(session, out)?,
            MenuButton::ActivityReport => {
                self.record(session, "DOWNLOAD_ACTIVITY_REPORT")?;
                let entries = self.store.activity()?;
                out.workbook(
                    "activity_report.xlsx",
                    &[workbooks::activity_sheet(&entries)],
                    format!("📑 Activity report ({} entries)", entries.len()),
                );
            }
            MenuButton::DeleteSupplierStock => {
                out.say_with(
                    "⚠️ This deletes ALL supplier stock. Are you sure?",
                    Keyboard::choice(
                        ("✅ Yes, delete all", CallbackAction::ConfirmDeleteStock),
                        ("❌ Cancel", CallbackAction::CancelDeleteStock),
                    ),
                );
            }
            MenuButton::SearchDiamonds => {
                self.record(session, "START_SEARCH")?;
                self.flows.set(session.telegram_id, Flow::SearchCarat);
                out.say(CARAT_PROMPT);
            }
            MenuButton::SmartDeals => {
                self.record(session, "VIEW_SMART_DEALS")?;
                let found = stock::smart_deals(&self.store.stones()?, stock::SMART_DEAL_MIN_DISCOUNT);
                if found.is_empty() {
                    out.say("🔥 No smart deals right now. Please check back later.");
                    return Ok(());
                }
                out.say(format!("🔥 {} smart deal(s), best first:", found.len()));
                for deal in found.iter().take(SMART_DEALS_SHOWN) {
                    out.say(format!(
                        "{}\n🔥 {}% below market ({}/ct)",
                        deal.stone.card(),
                        deal.discount_pct,
                        format_money(deal.market_price)
                    ));
                }
                if found.len() > SMART_DEALS_SHOWN {
                    out.workbook("smart_deals.xlsx", &[workbooks::smart_deals_sheet(&found)], "🔥 All smart deals");
                }
            }
            MenuButton::RequestDeal => self.start_deal_request(session, out)?,
            MenuButton::UploadStock => self.start_upload(session, out)?,
            MenuButton::MyStock => {
                self.record(session, "VIEW_MY_STOCK")?;
                let stones = self.store.supplier_stones(&session.supplier_key())?;
                if stones.is_empty() {
                    out.say("📦 You have no stock yet. Use 📤 Upload Excel.");
                    return Ok(());
                }
                out.say(stock::summarize(&stones).render("📦 My Stock"));
                out.workbook("my_stock.xlsx", &[workbooks::stones_sheet("My Stock", &stones)], "📦 My stock");
            }
            MenuButton::MyAnalytics => {
                self.record(session, "VIEW_MY_ANALYTICS")?;
                let comparisons = stock::price_analytics(&self.store.stones()?, &session.supplier_key());
                let s = stock::AnalyticsSummary::from_comparisons(&comparisons);
                out.say(format!(
                    "📊 My Analytics\n\n🔍 Stones compared: {}\n🔺 Above market: {}\n🔻 Below market: {}\n⚖️ At market: {}\n\n💡 {}",
                    s.analysed,
                    s.above,
                    s.below,
                    s.at_market,
                    s.recommendation()
                ));
                if !comparisons.is_empty() {
                    out.workbook("my_analytics.xlsx", &[workbooks::analytics_sheet(&comparisons)], "📊 Price comparison");
                }
            }
            MenuButton::DownloadSample => {
                self.record(session, "DOWNLOAD_SAMPLE")?;
                out.workbook(
                    "sample_stock.xlsx",
                    &workbooks::sample_stock(),
                    "📥 Fill in the Stock sheet and upload it with 📤 Upload Excel.",
                );
            }
            MenuButton::Logout => {
                self.logout(Origin { user_id: session.telegram_id, chat_id: session.chat_id }, out)?;
            }
        }
        Ok(())
    }

    fn start_upload(&self, session: &Session, out: &mut Replies) -> Result<(), DeskError> {
        self.record(session, "UPLOAD_PROMPT")?;
        self.flows.set(session.telegram_id, Flow::Upload);
        out.say(format!(
            "📤 Send your stock file (.xlsx or .csv, max {} MB).\nRequired columns: {}",
            stock::MAX_UPLOAD_BYTES / (1024 * 1024),
            stock::REQUIRED_COLUMNS.join(", ")
        ));
        Ok(())
    }

    fn start_deal_request(&self, session: &Session, out: &mut Replies) -> Result<(), DeskError> {
        self.record(session, "START_DEAL_REQUEST")?;
        if self.store.counts()?.stones > BULK_DEAL_THRESHOLD {
            let stones = self.store.unlocked_stones(BULK_TEMPLATE_STONES)?;
            if stones.is_empty() {
                out.say(NO_STONES);
                return Ok(());
            }
            self.flows.set(session.telegram_id, Flow::BulkDeal);
            out.workbook(
                "bulk_deal_template.xlsx",
                &[workbooks::bulk_deal_template(&stones)],
                format!("📝 Fill in '{}' for the stones you want and send the file back.", deals::BULK_OFFER_COLUMN),
            );
            return Ok(());
        }

        let stones = self.store.unlocked_stones(DEAL_CHOICES)?;
        if stones.is_empty() {
            out.say(NO_STONES);
            return Ok(());
        }
        self.flows.set(session.telegram_id, Flow::DealStone);
        out.say("💎 Available stones:");
        for stone in &stones {
            out.say(stone.card());
        }
        out.say(STONE_PROMPT);
        Ok(())
    }

    fn view_deals(&self, session: &Session, out: &mut Replies) -> Result<(), DeskError> {
        let deals = deals::visible_deals(&self.store, session)?;
        activity::record(
            &self.store,
            &Actor::from(session),
            &format!("VIEW_{}_DEALS", session.role.as_str().to_uppercase()),
            json!({ "count": deals.len() }),
        )?;
        if deals.is_empty() {
            out.say("🤝 No deals yet.");
            return Ok(());
        }

        out.say(format!("🤝 Deals: {}\n\n{}", deals.len(), DealCounts::from_deals(&deals).render()));
        out.workbook("deals.xlsx", &[workbooks::deals_sheet(&deals)], "🤝 Deals");
        for deal in deals.iter().filter(|d| awaits(session.role, d)).take(DEAL_CARDS_SHOWN) {
            out.say_with(deal.card(), deal_buttons(session.role, deal));
        }
        Ok(())
    }

    // ---- documents ----

    /// Decide whether a document should be downloaded, before fetching it.
    pub fn accept_document(&self, from: Origin, file_name: &str, size: u32) -> Result<PendingUpload, Vec<Outgoing>> {
        if let Some(out) = self.limited(from) {
            return Err(out);
        }
        let refuse = |text: String| Err(vec![Outgoing::text(from.chat_id, text)]);

        let session = match self.session(from) {
            Ok(Some(session)) => session,
            Ok(None) => return refuse(LOGIN_REQUIRED.to_string()),
            Err(e) => {
                error!("❌ Session lookup failed: {e}");
                return refuse(e.user_message());
            }
        };
        let kind = match session.role {
            Role::Supplier => UploadKind::Stock,
            Role::Client if self.flows.get(from.user_id) == Some(Flow::BulkDeal) => UploadKind::BulkDeal,
            Role::Client => return refuse("📎 To send offers as a sheet, press 🤝 Request Deal first.".to_string()),
            Role::Admin => return refuse("❌ Only suppliers can upload stock.".to_string()),
        };
        if size > stock::MAX_UPLOAD_BYTES {
            return refuse(format!(
                "❌ File too large. Maximum size is {} MB.",
                stock::MAX_UPLOAD_BYTES / (1024 * 1024)
            ));
        }
        match SheetFormat::from_file_name(file_name) {
            Ok(format) => Ok(PendingUpload { kind, format }),
            Err(e) => refuse(format!("❌ {e}")),
        }
    }

    /// Process a downloaded document accepted by `accept_document`.
    pub fn document(&self, from: Origin, upload: PendingUpload, data: &[u8]) -> Vec<Outgoing> {
        let mut out = Replies::new(from.chat_id);
        if let Err(e) = self.on_document(from, upload, data, &mut out) {
            self.report(e, &mut out);
        }
        out.finish()
    }

    fn on_document(&self, from: Origin, upload: PendingUpload, data: &[u8], out: &mut Replies) -> Result<(), DeskError> {
        let Some(session) = self.session(from)? else {
            out.say(LOGIN_REQUIRED);
            return Ok(());
        };
        let sheet = match read_sheet(data, upload.format) {
            Ok(sheet) => sheet,
            Err(e) => {
                warn!("Unreadable upload from {}: {e}", session.username);
                out.say(format!("❌ Could not read the file: {e}"));
                return Ok(());
            }
        };
        match upload.kind {
            UploadKind::Stock => self.upload_stock(&session, &sheet, out),
            UploadKind::BulkDeal => self.bulk_deals(&session, &sheet, out),
        }
    }

    fn upload_stock(&self, session: &Session, sheet: &Sheet, out: &mut Replies) -> Result<(), DeskError> {
        let report = stock::upload_stock(&self.store, session, sheet)?;
        if !report.is_valid() {
            let mut text = format!("❌ Upload rejected ({} problem(s)):", report.errors.len());
            for e in report.errors.iter().take(UPLOAD_ERRORS_SHOWN) {
                text.push_str(&format!("\n• {e}"));
            }
            if report.errors.len() > UPLOAD_ERRORS_SHOWN {
                text.push_str(&format!("\n... and {} more", report.errors.len() - UPLOAD_ERRORS_SHOWN));
            }
            text.push_str("\n\nFix the file and send it again. 📥 Download Sample Excel shows the expected layout.");
            out.say(text);
            return Ok(());
        }

        self.flows.clear(session.telegram_id);
        info!("📤 {} uploaded {} stones", session.username, report.stones.len());
        let summary = stock::summarize(&report.stones);
        let min = report.stones.iter().map(|s| s.price_per_carat).fold(f64::INFINITY, f64::min);
        let max = report.stones.iter().map(|s| s.price_per_carat).fold(0.0, f64::max);
        let shapes: Vec<String> = summary.top_shapes.iter().map(|(shape, n)| format!("{shape} {n}")).collect();

        let mut text = format!(
            "✅ Stock uploaded\n\n💎 Stones: {}\n⚖️ Total carats: {}\n💰 Price range: {} - {} /ct\n📊 Shapes: {}",
            summary.stones,
            format_number(summary.carats, 2),
            format_money(min),
            format_money(max),
            shapes.join(", "),
        );
        if !report.warnings.is_empty() {
            text.push_str("\n\n⚠️ Warnings:");
            for w in report.warnings.iter().take(UPLOAD_WARNINGS_SHOWN) {
                text.push_str(&format!("\n• {w}"));
            }
        }
        out.say_with(text, Keyboard::Menu(session.role));
        Ok(())
    }

    fn bulk_deals(&self, session: &Session, sheet: &Sheet, out: &mut Replies) -> Result<(), DeskError> {
        let outcome = deals::bulk_request(&self.store, session, sheet)?;
        self.flows.clear(session.telegram_id);
        info!(
            "🤝 {} sent a bulk sheet: {} deals, {} failed",
            session.username,
            outcome.created.len(),
            outcome.failed.len()
        );

        let mut text = format!("✅ Created {} deal(s)", outcome.created.len());
        for deal in &outcome.created {
            text.push_str(&format!("\n• {} → {} ({}/ct)", deal.stone_id, deal.deal_id, format_money(deal.offer_price)));
        }
        if !outcome.failed.is_empty() {
            text.push_str(&format!("\n\n❌ Not created ({}):", outcome.failed.len()));
            for (stock_id, reason) in outcome.failed.iter().take(BULK_FAILURES_SHOWN) {
                text.push_str(&format!("\n• {stock_id}: {reason}"));
            }
        }
        out.say_with(text, Keyboard::Menu(session.role));
        self.deliver(outcome.notices, out);
        Ok(())
    }

    // ---- inline buttons ----

    pub fn callback(&self, from: Origin, data: &str) -> CallbackReply {
        let Some(action) = CallbackAction::parse(data) else {
            warn!("Unknown callback data {data:?}");
            return CallbackReply::alert("This button is no longer valid.");
        };
        let session = match self.session(from) {
            Ok(Some(session)) => session,
            Ok(None) => return CallbackReply::alert("🔒 Please login first using /login"),
            Err(e) => {
                error!("❌ Session lookup failed: {e}");
                return CallbackReply::alert(e.user_message());
            }
        };

        let mut out = Replies::new(from.chat_id);
        match self.on_callback(&session, action, &mut out) {
            Ok(edit) => CallbackReply { edit: Some(edit), messages: out.finish(), ..Default::default() },
            Err(e) => {
                if matches!(e, DeskError::Store(_)) {
                    error!("❌ Button action failed: {e}");
                }
                CallbackReply { answer: Some(e.user_message()), alert: true, edit: None, messages: out.finish() }
            }
        }
    }

    /// Run a button action; returns the new text of the button's message.
    fn on_callback(&self, session: &Session, action: CallbackAction, out: &mut Replies) -> Result<String, DeskError> {
        let admin = Actor::from(session);
        match action {
            CallbackAction::ApproveAccount(username) => {
                forbid_unless_admin(session)?;
                let (account, notice) = accounts::approve(&self.store, &admin, &username)?;
                info!("✅ {} approved {}", session.username, account.username);
                self.deliver(vec![notice], out);
                Ok(format!("✅ {} approved", account.username))
            }
            CallbackAction::RejectAccount(username) => {
                forbid_unless_admin(session)?;
                let account = accounts::reject(&self.store, &admin, &username)?;
                info!("❌ {} rejected {}", session.username, account.username);
                Ok(format!("❌ {} rejected and removed.", account.username))
            }
            CallbackAction::ConfirmDeleteStock => {
                forbid_unless_admin(session)?;
                let (stones, suppliers) = stock::delete_all_stock(&self.store, &admin)?;
                warn!("🗑 {} deleted all supplier stock ({stones} stones)", session.username);
                Ok(format!(
                    "🗑 All supplier stock deleted. Deleted {suppliers} supplier inventories ({stones} stones)."
                ))
            }
            CallbackAction::CancelDeleteStock => {
                forbid_unless_admin(session)?;
                Ok("❌ Stock deletion cancelled.".to_string())
            }
            CallbackAction::AcceptDeal(id) => self.supplier_verdict(session, &id, true, out),
            CallbackAction::DeclineDeal(id) => self.supplier_verdict(session, &id, false, out),
            CallbackAction::ApproveDeal(id) => self.admin_verdict(session, &id, true, out),
            CallbackAction::CloseDeal(id) => self.admin_verdict(session, &id, false, out),
        }
    }

    fn supplier_verdict(&self, session: &Session, deal_id: &str, accept: bool, out: &mut Replies) -> Result<String, DeskError> {
        let (deal, notices) = deals::supplier_respond(&self.store, session, deal_id, accept)?;
        self.deliver(notices, out);
        let verdict = if accept { "✅ You accepted this offer." } else { "❌ You declined this offer." };
        Ok(format!("{}\n\n{verdict}", deal.card()))
    }

    fn admin_verdict(&self, session: &Session, deal_id: &str, approve: bool, out: &mut Replies) -> Result<String, DeskError> {
        let (deal, notices) = deals::admin_decide(&self.store, session, deal_id, approve)?;
        self.deliver(notices, out);
        let verdict = if approve { "✅ Deal completed." } else { "❌ Deal closed." };
        Ok(format!("{}\n\n{verdict}", deal.card()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::Cell;

    const ADMIN: Origin = Origin { user_id: 1, chat_id: 101 };
    const SUPPLIER: Origin = Origin { user_id: 2, chat_id: 102 };
    const CLIENT: Origin = Origin { user_id: 3, chat_id: 103 };

    fn desk() -> Conversation {
        let store = Arc::new(Store::in_memory().unwrap());
        accounts::provision(&store, "prince", "1234", Role::Admin).unwrap();
        accounts::provision(&store, "gems", "5678", Role::Supplier).unwrap();
        accounts::provision(&store, "alice", "abcd", Role::Client).unwrap();
        Conversation::new(store, Duration::from_secs(3600), 1000, Duration::from_secs(10))
    }

    fn texts(out: &[Outgoing]) -> Vec<&str> {
        out.iter()
            .filter_map(|o| match o {
                Outgoing::Text { text, .. } => Some(text.as_str()),
                Outgoing::Document { .. } => None,
            })
            .collect()
    }

    fn documents(out: &[Outgoing]) -> Vec<&str> {
        out.iter()
            .filter_map(|o| match o {
                Outgoing::Document { file_name, .. } => Some(file_name.as_str()),
                Outgoing::Text { .. } => None,
            })
            .collect()
    }

    fn login(desk: &Conversation, from: Origin, username: &str, password: &str) -> Vec<Outgoing> {
        desk.command(from, Command::Login);
        desk.text(from, username);
        desk.text(from, password)
    }

    fn stock_csv(rows: &[&str]) -> Vec<u8> {
        let mut csv = String::from(
            "Stock #,Shape,Weight,Color,Clarity,Price Per Carat,Lab,Report #,Diamond Type,Description,CUT,Polish,Symmetry\n",
        );
        for row in rows {
            csv.push_str(row);
            csv.push('\n');
        }
        csv.into_bytes()
    }

    fn upload(desk: &Conversation, from: Origin, name: &str, data: &[u8]) -> Vec<Outgoing> {
        let pending = desk.accept_document(from, name, data.len() as u32).unwrap();
        desk.document(from, pending, data)
    }

    fn seed_stock(desk: &Conversation) {
        login(desk, SUPPLIER, "gems", "5678");
        let data = stock_csv(&[
            "D1,Round,1.0,D,VS1,5000,GIA,11,Natural,Bright,EX,EX,EX",
            "D2,Oval,1.5,E,VVS2,4000,IGI,12,Natural,Clean,VG,VG,VG",
        ]);
        let out = upload(desk, SUPPLIER, "stock.csv", &data);
        assert!(texts(&out)[0].starts_with("✅ Stock uploaded"), "{:?}", texts(&out));
    }

    #[test]
    fn test_menu_requires_login() {
        let desk = desk();
        let out = desk.text(CLIENT, "💎 Search Diamonds");
        assert_eq!(texts(&out), vec![LOGIN_REQUIRED]);
    }

    #[test]
    fn test_login_shows_role_menu_and_unread_notifications() {
        let desk = desk();
        activity::notify(&desk.store, "alice", Role::Client, "Deal completed").unwrap();

        let out = login(&desk, CLIENT, "alice", "abcd");
        assert_eq!(
            out[0],
            Outgoing::Text { chat_id: 103, text: "🥂 Welcome alice".into(), keyboard: Some(Keyboard::Menu(Role::Client)) }
        );
        assert!(texts(&out)[1].contains("Deal completed"));

        let again = desk.command(CLIENT, Command::Login);
        assert!(texts(&again)[0].contains("already logged in"));
    }

    #[test]
    fn test_wrong_password_ends_login() {
        let desk = desk();
        let out = login(&desk, CLIENT, "alice", "nope");
        assert_eq!(texts(&out), vec!["❌ Invalid username or password."]);
        assert_eq!(desk.flows.get(CLIENT.user_id), None);
    }

    #[test]
    fn test_signup_waits_for_approval() {
        let desk = desk();
        login(&desk, ADMIN, "prince", "1234");
        let newcomer = Origin { user_id: 9, chat_id: 109 };

        desk.command(newcomer, Command::CreateAccount);
        assert!(texts(&desk.text(newcomer, "al"))[0].contains("at least 3"));
        desk.text(newcomer, "bob");
        let out = desk.text(newcomer, "secret");
        assert!(texts(&out)[0].contains("Account bob created"));
        // The logged-in admin gets a push.
        assert!(out.iter().any(|o| o.chat_id() == ADMIN.chat_id));

        assert!(texts(&login(&desk, newcomer, "bob", "secret"))[0].contains("waiting for admin approval"));

        let reply = desk.callback(ADMIN, "approve:bob");
        assert_eq!(reply.edit.as_deref(), Some("✅ bob approved"));
        assert_eq!(texts(&login(&desk, newcomer, "bob", "secret"))[0], "🥂 Welcome bob");
    }

    #[test]
    fn test_non_admin_cannot_approve() {
        let desk = desk();
        login(&desk, CLIENT, "alice", "abcd");
        let reply = desk.callback(CLIENT, "approve:alice");
        assert!(reply.alert);
        assert_eq!(reply.answer.as_deref(), Some("❌ Only admins can do that."));
    }

    #[test]
    fn test_search_flow() {
        let desk = desk();
        seed_stock(&desk);
        login(&desk, CLIENT, "alice", "abcd");

        assert_eq!(texts(&desk.text(CLIENT, "💎 Search Diamonds")), vec![CARAT_PROMPT]);
        assert!(texts(&desk.text(CLIENT, "heavy"))[0].starts_with("❌"));
        assert_eq!(texts(&desk.text(CLIENT, "1-2")), vec![SHAPE_PROMPT]);
        assert_eq!(texts(&desk.text(CLIENT, "round, oval")), vec![COLOR_PROMPT]);
        assert_eq!(texts(&desk.text(CLIENT, "any")), vec![CLARITY_PROMPT]);
        let out = desk.text(CLIENT, "vvs2");
        let found = texts(&out);
        assert_eq!(found[0], "💎 Found 1 diamond(s):");
        assert!(found[1].contains("D2"));
        assert_eq!(desk.flows.get(CLIENT.user_id), None);
    }

    #[test]
    fn test_deal_lifecycle_through_buttons() {
        let desk = desk();
        seed_stock(&desk);
        login(&desk, CLIENT, "alice", "abcd");
        login(&desk, ADMIN, "prince", "1234");

        let out = desk.text(CLIENT, "🤝 Request Deal");
        assert_eq!(texts(&out).last().copied(), Some(STONE_PROMPT));
        assert!(texts(&desk.text(CLIENT, "D9"))[0].contains("not found"));
        assert!(texts(&desk.text(CLIENT, "D1"))[0].contains(OFFER_PROMPT));
        assert!(texts(&desk.text(CLIENT, "free"))[0].contains("greater than 0"));
        let out = desk.text(CLIENT, "$4,500");
        assert!(texts(&out)[0].contains("requested for stone D1"));
        // The supplier is logged in and gets the request live.
        assert!(out.iter().any(|o| o.chat_id() == SUPPLIER.chat_id));
        assert!(desk.store.find_stone("D1").unwrap().unwrap().locked);

        let out = desk.text(SUPPLIER, "🤝 View Deals");
        let deal_id = out
            .iter()
            .find_map(|o| match o {
                Outgoing::Text { keyboard: Some(Keyboard::Inline(rows)), .. } => match &rows[0][0].1 {
                    CallbackAction::AcceptDeal(id) => Some(id.clone()),
                    _ => None,
                },
                _ => None,
            })
            .unwrap();
        assert_eq!(documents(&out), vec!["deals.xlsx"]);

        // Admin cannot approve before the supplier accepts.
        let early = desk.callback(ADMIN, &format!("deal_approve:{deal_id}"));
        assert!(early.answer.unwrap().contains("waiting for the supplier"));

        let reply = desk.callback(SUPPLIER, &format!("deal_accept:{deal_id}"));
        assert!(reply.edit.unwrap().ends_with("You accepted this offer."));
        assert!(reply.messages.iter().any(|o| o.chat_id() == ADMIN.chat_id));

        let reply = desk.callback(ADMIN, &format!("deal_approve:{deal_id}"));
        assert!(reply.edit.unwrap().ends_with("Deal completed."));
        assert!(desk.store.find_stone("D1").unwrap().is_none());

        let again = desk.callback(ADMIN, &format!("deal_close:{deal_id}"));
        assert!(again.answer.unwrap().contains("already completed"));
    }

    fn open_deal_for(desk: &Conversation, stock_id: &str) -> String {
        desk.text(CLIENT, "🤝 Request Deal");
        desk.text(CLIENT, stock_id);
        desk.text(CLIENT, "4000");
        desk.store
            .deals()
            .unwrap()
            .into_iter()
            .find(|d| d.stone_id == stock_id && d.final_status == DealStatus::Open)
            .map(|d| d.deal_id)
            .unwrap()
    }

    #[test]
    fn test_decline_and_close_buttons() {
        let desk = desk();
        seed_stock(&desk);
        login(&desk, CLIENT, "alice", "abcd");
        login(&desk, ADMIN, "prince", "1234");

        let declined = open_deal_for(&desk, "D1");
        let reply = desk.callback(SUPPLIER, &format!("deal_decline:{declined}"));
        assert!(reply.edit.unwrap().ends_with("❌ You declined this offer."));
        assert!(!desk.store.find_stone("D1").unwrap().unwrap().locked);

        let closed = open_deal_for(&desk, "D2");
        desk.callback(SUPPLIER, &format!("deal_accept:{closed}"));
        let reply = desk.callback(ADMIN, &format!("deal_close:{closed}"));
        assert!(reply.edit.unwrap().ends_with("❌ Deal closed."));
        assert!(!desk.store.find_stone("D2").unwrap().unwrap().locked);
    }

    #[test]
    fn test_upload_errors_are_listed() {
        let desk = desk();
        login(&desk, SUPPLIER, "gems", "5678");
        let data = stock_csv(&["D1,Round,0,D,VS1,5000,GIA,11,Natural,A,,,", "D1,Oval,1,E,VS2,4000,IGI,12,Natural,B,,,"]);
        let out = upload(&desk, SUPPLIER, "stock.csv", &data);
        let text = texts(&out)[0];
        assert!(text.starts_with("❌ Upload rejected"));
        assert!(text.contains("Duplicate Stock #"));
        assert!(text.contains("'Weight' must be a number"));
        assert!(desk.store.supplier_stones("supplier_gems").unwrap().is_empty());
    }

    #[test]
    fn test_documents_are_gated_by_role_and_name() {
        let desk = desk();
        login(&desk, ADMIN, "prince", "1234");
        login(&desk, SUPPLIER, "gems", "5678");

        let refused = desk.accept_document(ADMIN, "stock.xlsx", 100).unwrap_err();
        assert!(texts(&refused)[0].contains("Only suppliers"));
        let refused = desk.accept_document(SUPPLIER, "stock.xls", 100).unwrap_err();
        assert!(texts(&refused)[0].contains(".xlsx"));
        let refused = desk.accept_document(SUPPLIER, "stock.xlsx", stock::MAX_UPLOAD_BYTES + 1).unwrap_err();
        assert!(texts(&refused)[0].contains("too large"));
        assert_eq!(
            desk.accept_document(SUPPLIER, "Stock.XLSX", 100),
            Ok(PendingUpload { kind: UploadKind::Stock, format: SheetFormat::Xlsx })
        );
    }

    #[test]
    fn test_bulk_deals_from_sheet() {
        let desk = desk();
        login(&desk, SUPPLIER, "gems", "5678");
        let rows: Vec<String> = (0..25).map(|i| format!("S{i},Round,1.0,D,VS1,{},GIA,{i},Natural,Stone {i},,,", 1000 + i)).collect();
        let rows: Vec<&str> = rows.iter().map(String::as_str).collect();
        upload(&desk, SUPPLIER, "stock.csv", &stock_csv(&rows));
        login(&desk, CLIENT, "alice", "abcd");

        let out = desk.text(CLIENT, "🤝 Request Deal");
        assert_eq!(documents(&out), vec!["bulk_deal_template.xlsx"]);
        assert_eq!(desk.flows.get(CLIENT.user_id), Some(Flow::BulkDeal));

        let mut sheet = Sheet::new("Bulk", &["Stock #", deals::BULK_OFFER_COLUMN]);
        sheet.push_row(vec![Cell::from("S1"), Cell::from(900.0)]);
        sheet.push_row(vec![Cell::from("S2"), Cell::from("")]);
        sheet.push_row(vec![Cell::from("S99"), Cell::from(500.0)]);
        let data = write_xlsx(&[sheet]).unwrap();

        let out = upload(&desk, CLIENT, "offers.xlsx", &data);
        let text = texts(&out)[0];
        assert!(text.starts_with("✅ Created 1 deal(s)"), "{text}");
        assert!(text.contains("S99: Stone S99 not found."));
        assert_eq!(desk.flows.get(CLIENT.user_id), None);
    }

    #[test]
    fn test_delete_stock_needs_confirmation() {
        let desk = desk();
        seed_stock(&desk);
        login(&desk, ADMIN, "prince", "1234");

        let out = desk.text(ADMIN, "🗑 Delete Supplier Stock");
        assert!(matches!(&out[0], Outgoing::Text { keyboard: Some(Keyboard::Inline(_)), .. }));
        assert_eq!(desk.callback(ADMIN, "cancel_delete").edit.as_deref(), Some("❌ Stock deletion cancelled."));
        assert_eq!(desk.store.stones().unwrap().len(), 2);

        let reply = desk.callback(ADMIN, "confirm_delete_stock");
        assert!(reply.edit.unwrap().contains("Deleted 1 supplier inventories"));
        assert!(desk.store.stones().unwrap().is_empty());
    }

    #[test]
    fn test_rate_limit_and_fix() {
        let store = Arc::new(Store::in_memory().unwrap());
        let desk = Conversation::new(store, Duration::from_secs(3600), 2, Duration::from_secs(10));
        desk.command(CLIENT, Command::Start);
        desk.command(CLIENT, Command::Help);
        assert_eq!(texts(&desk.text(CLIENT, "hello")), vec![RATE_LIMITED]);

        desk.command(CLIENT, Command::Fix);
        assert_eq!(texts(&desk.text(CLIENT, "hello")), vec![LOGIN_REQUIRED]);
    }

    #[test]
    fn test_activity_counts_flows_and_limiter() {
        let desk = desk();
        assert_eq!(desk.activity(), DeskActivity { open_flows: 0, rate_limited_users: 0 });
        desk.command(CLIENT, Command::Login);
        assert_eq!(desk.activity(), DeskActivity { open_flows: 1, rate_limited_users: 1 });
        assert_eq!(desk.prune_rate_limits(), 0);
        assert_eq!(desk.prune_flows(Duration::from_secs(3600)), 0);
        assert_eq!(desk.activity().open_flows, 1);
    }

    #[test]
    fn test_logout_clears_session_and_flow() {
        let desk = desk();
        login(&desk, CLIENT, "alice", "abcd");
        desk.text(CLIENT, "💎 Search Diamonds");
        let out = desk.text(CLIENT, "🚪 Logout");
        assert!(matches!(&out[0], Outgoing::Text { keyboard: Some(Keyboard::Remove), .. }));
        assert_eq!(desk.flows.get(CLIENT.user_id), None);
        assert_eq!(texts(&desk.text(CLIENT, "1")), vec![LOGIN_REQUIRED]);
    }

    #[test]
    fn test_supplier_reports() {
        let desk = desk();
        seed_stock(&desk);

        let out = desk.text(SUPPLIER, "📦 My Stock");
        assert!(texts(&out)[0].contains("Stones: 2"));
        assert_eq!(documents(&out), vec!["my_stock.xlsx"]);
        assert_eq!(documents(&desk.text(SUPPLIER, "📥 Download Sample Excel")), vec!["sample_stock.xlsx"]);
        assert!(texts(&desk.text(SUPPLIER, "📊 My Analytics"))[0].contains("Not enough comparable stones"));
    }
}
