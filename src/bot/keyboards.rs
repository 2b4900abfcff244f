//! Role menus and inline callback actions.

use teloxide::types::{
    InlineKeyboardButton, InlineKeyboardMarkup, KeyboardButton, KeyboardMarkup, KeyboardRemove, ReplyMarkup,
};

use crate::desk::accounts::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuButton {
    ViewAllStock,
    ViewUsers,
    PendingAccounts,
    SupplierLeaderboard,
    ViewDeals,
    ActivityReport,
    DeleteSupplierStock,
    SearchDiamonds,
    SmartDeals,
    RequestDeal,
    UploadStock,
    MyStock,
    MyAnalytics,
    DownloadSample,
    Logout,
}

use MenuButton::*;

const ADMIN_MENU: &[&[MenuButton]] = &[
    &[ViewAllStock, ViewUsers],
    &[PendingAccounts, SupplierLeaderboard],
    &[ViewDeals, ActivityReport],
    &[DeleteSupplierStock, Logout],
];

const SUPPLIER_MENU: &[&[MenuButton]] = &[
    &[UploadStock, MyStock],
    &[MyAnalytics, ViewDeals],
    &[DownloadSample, Logout],
];

const CLIENT_MENU: &[&[MenuButton]] = &[&[SearchDiamonds, SmartDeals], &[RequestDeal, ViewDeals], &[Logout]];

impl MenuButton {
    pub fn label(&self) -> &'static str {
        match self {
            ViewAllStock => "💎 View All Stock",
            ViewUsers => "👥 View Users",
            PendingAccounts => "⏳ Pending Accounts",
            SupplierLeaderboard => "🏆 Supplier Leaderboard",
            ViewDeals => "🤝 View Deals",
            ActivityReport => "📑 User Activity Report",
            DeleteSupplierStock => "🗑 Delete Supplier Stock",
            SearchDiamonds => "💎 Search Diamonds",
            SmartDeals => "🔥 Smart Deals",
            RequestDeal => "🤝 Request Deal",
            UploadStock => "📤 Upload Excel",
            MyStock => "📦 My Stock",
            MyAnalytics => "📊 My Analytics",
            DownloadSample => "📥 Download Sample Excel",
            Logout => "🚪 Logout",
        }
    }

    pub fn menu(role: Role) -> &'static [&'static [MenuButton]] {
        match role {
            Role::Admin => ADMIN_MENU,
            Role::Supplier => SUPPLIER_MENU,
            Role::Client => CLIENT_MENU,
        }
    }

    /// The button of `role`'s menu whose label is `text`.
    pub fn parse(role: Role, text: &str) -> Option<Self> {
        let text = text.trim();
        Self::menu(role).iter().flat_map(|row| row.iter()).copied().find(|b| b.label() == text)
    }
}

/// Data carried by an inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    ApproveAccount(String),
    RejectAccount(String),
    ConfirmDeleteStock,
    CancelDeleteStock,
    AcceptDeal(String),
    DeclineDeal(String),
    ApproveDeal(String),
    CloseDeal(String),
}

impl CallbackAction {
    pub fn encode(&self) -> String {
        match self {
            CallbackAction::ApproveAccount(u) => format!("approve:{u}"),
            CallbackAction::RejectAccount(u) => format!("reject:{u}"),
            CallbackAction::ConfirmDeleteStock => "confirm_delete_stock".to_string(),
            CallbackAction::CancelDeleteStock => "cancel_delete".to_string(),
            CallbackAction::AcceptDeal(id) => format!("deal_accept:{id}"),
            CallbackAction::DeclineDeal(id) => format!("deal_decline:{id}"),
            CallbackAction::ApproveDeal(id) => format!("deal_approve:{id}"),
            CallbackAction::CloseDeal(id) => format!("deal_close:{id}"),
        }
    }

    pub fn parse(data: &str) -> Option<Self> {
        match data {
            "confirm_delete_stock" => return Some(CallbackAction::ConfirmDeleteStock),
            "cancel_delete" => return Some(CallbackAction::CancelDeleteStock),
            _ => {}
        }
        let (kind, arg) = data.split_once(':')?;
        if arg.is_empty() {
            return None;
        }
        let arg = arg.to_string();
        Some(match kind {
            "approve" => CallbackAction::ApproveAccount(arg),
            "reject" => CallbackAction::RejectAccount(arg),
            "deal_accept" => CallbackAction::AcceptDeal(arg),
            "deal_decline" => CallbackAction::DeclineDeal(arg),
            "deal_approve" => CallbackAction::ApproveDeal(arg),
            "deal_close" => CallbackAction::CloseDeal(arg),
            _ => return None,
        })
    }
}

/// Keyboard attached to an outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum Keyboard {
    Menu(Role),
    Remove,
    /// Rows of (label, action).
    Inline(Vec<Vec<(String, CallbackAction)>>),
}

impl Keyboard {
    /// One row of two buttons.
    pub fn choice(yes: (&str, CallbackAction), no: (&str, CallbackAction)) -> Self {
        Keyboard::Inline(vec![vec![(yes.0.to_string(), yes.1), (no.0.to_string(), no.1)]])
    }

    pub fn markup(&self) -> ReplyMarkup {
        match self {
            Keyboard::Menu(role) => {
                let rows = MenuButton::menu(*role)
                    .iter()
                    .map(|row| row.iter().map(|b| KeyboardButton::new(b.label())).collect::<Vec<_>>());
                ReplyMarkup::Keyboard(KeyboardMarkup::new(rows).resize_keyboard())
            }
            Keyboard::Remove => ReplyMarkup::KeyboardRemove(KeyboardRemove::new()),
            Keyboard::Inline(rows) => {
                let rows = rows.iter().map(|row| {
                    row.iter()
                        .map(|(label, action)| InlineKeyboardButton::callback(label.clone(), action.encode()))
                        .collect::<Vec<_>>()
                });
                ReplyMarkup::InlineKeyboard(InlineKeyboardMarkup::new(rows))
            }
        }
    }
}
