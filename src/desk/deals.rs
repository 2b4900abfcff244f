//! Deal requests and their lifecycle.
//!
//! A client offer locks the stone and opens a deal. The supplier accepts or
//! declines; an accepted deal then needs an admin decision. Closing a deal
//! unlocks the stone, completing it removes the stone from stock.

use serde_json::json;
use std::fmt;
use uuid::Uuid;

use super::accounts::{Role, supplier_key, supplier_username};
use super::activity::{self, Actor, Notice};
use super::sessions::Session;
use super::{DeskError, desk_now, timestamp};
use crate::sheet::Sheet;
use crate::store::{StoneEffect, Store};
use crate::text::{clean_text, format_money};

/// Offer column of the bulk deal template.
pub const BULK_OFFER_COLUMN: &str = "Offer Price ($/ct)";

/// A party's decision on a deal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealAction {
    Pending,
    Accepted,
    Rejected,
}

impl DealAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "PENDING" => Some(DealAction::Pending),
            "ACCEPTED" => Some(DealAction::Accepted),
            "REJECTED" => Some(DealAction::Rejected),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DealAction::Pending => "PENDING",
            DealAction::Accepted => "ACCEPTED",
            DealAction::Rejected => "REJECTED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealStatus {
    Open,
    Completed,
    Closed,
}

impl DealStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_uppercase().as_str() {
            "OPEN" => Some(DealStatus::Open),
            "COMPLETED" => Some(DealStatus::Completed),
            "CLOSED" => Some(DealStatus::Closed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DealStatus::Open => "OPEN",
            DealStatus::Completed => "COMPLETED",
            DealStatus::Closed => "CLOSED",
        }
    }
}

impl fmt::Display for DealStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deal {
    pub deal_id: String,
    pub stone_id: String,
    pub supplier_username: String,
    pub client_username: String,
    /// List price per carat when the offer was made.
    pub actual_price: f64,
    pub offer_price: f64,
    pub supplier_action: DealAction,
    pub admin_action: DealAction,
    pub final_status: DealStatus,
    pub created_at: String,
}

impl Deal {
    pub fn supplier_key(&self) -> String {
        supplier_key(&self.supplier_username)
    }

    fn ensure_open(&self) -> Result<(), DeskError> {
        if self.final_status != DealStatus::Open {
            return Err(DeskError::Conflict(format!(
                "Deal {} is already {}.",
                self.deal_id,
                self.final_status.as_str().to_lowercase()
            )));
        }
        Ok(())
    }

    /// Apply the supplier's answer. Declining closes the deal.
    pub fn supplier_decision(&mut self, accept: bool) -> Result<StoneEffect, DeskError> {
        self.ensure_open()?;
        if self.supplier_action != DealAction::Pending {
            return Err(DeskError::Conflict(format!("You already answered deal {}.", self.deal_id)));
        }
        if accept {
            self.supplier_action = DealAction::Accepted;
            Ok(StoneEffect::Keep)
        } else {
            self.supplier_action = DealAction::Rejected;
            self.final_status = DealStatus::Closed;
            Ok(StoneEffect::Unlock)
        }
    }

    /// Apply the admin's decision. Approval needs the supplier's acceptance first.
    pub fn admin_decision(&mut self, approve: bool) -> Result<StoneEffect, DeskError> {
        self.ensure_open()?;
        if approve {
            if self.supplier_action != DealAction::Accepted {
                return Err(DeskError::Conflict(format!(
                    "Deal {} is waiting for the supplier to accept.",
                    self.deal_id
                )));
            }
            self.admin_action = DealAction::Accepted;
            self.final_status = DealStatus::Completed;
            Ok(StoneEffect::Remove)
        } else {
            self.admin_action = DealAction::Rejected;
            self.final_status = DealStatus::Closed;
            Ok(StoneEffect::Unlock)
        }
    }

    /// Multi-line description for chat.
    pub fn card(&self) -> String {
        format!(
            "🤝 {}\n💎 Stone: {}\n🏭 Supplier: {}\n👤 Client: {}\n💰 List: {}/ct | Offer: {}/ct\n📋 Supplier: {} | Admin: {} | Status: {}\n🕒 {}",
            self.deal_id,
            self.stone_id,
            self.supplier_username,
            self.client_username,
            format_money(self.actual_price),
            format_money(self.offer_price),
            self.supplier_action.as_str(),
            self.admin_action.as_str(),
            self.final_status,
            self.created_at,
        )
    }
}

/// `DEAL-` followed by ten upper-case hex characters.
pub fn new_deal_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("DEAL-{}", hex[..10].to_uppercase())
}

/// Place an offer on a stone. The stone is locked in the same transaction
/// that records the deal. Returns the deal and the supplier's notice.
pub fn request_deal(
    store: &Store,
    client: &Session,
    stock_id: &str,
    offer: f64,
) -> Result<(Deal, Notice), DeskError> {
    if !offer.is_finite() || offer <= 0.0 {
        return Err(DeskError::Invalid("Offer price must be a number greater than 0.".to_string()));
    }
    let stock_id = clean_text(stock_id);
    let stone = store
        .find_stone(&stock_id)?
        .ok_or_else(|| DeskError::NotFound(format!("Stone {stock_id} not found.")))?;
    if stone.locked {
        return Err(DeskError::Conflict(format!("Stone {stock_id} is locked in another deal.")));
    }

    let deal = Deal {
        deal_id: new_deal_id(),
        stone_id: stone.stock_id.clone(),
        supplier_username: supplier_username(&stone.supplier).to_string(),
        client_username: client.username.clone(),
        actual_price: stone.price_per_carat,
        offer_price: offer,
        supplier_action: DealAction::Pending,
        admin_action: DealAction::Pending,
        final_status: DealStatus::Open,
        created_at: timestamp(&desk_now()),
    };
    if !store.open_deal(&stone.supplier, &deal)? {
        return Err(DeskError::Conflict(format!("Stone {stock_id} was just locked in another deal.")));
    }

    activity::record(
        store,
        &Actor::from(client),
        "REQUEST_DEAL",
        json!({
            "deal_id": deal.deal_id,
            "stone_id": deal.stone_id,
            "supplier": deal.supplier_username,
            "actual_price": deal.actual_price,
            "offer_price": deal.offer_price,
        }),
    )?;
    let notice = Notice::new(
        &deal.supplier_username,
        Role::Supplier,
        format!(
            "🤝 New deal request {} for stone {}: offer {}/ct (list {}/ct). Open 🤝 View Deals to respond.",
            deal.deal_id,
            deal.stone_id,
            format_money(deal.offer_price),
            format_money(deal.actual_price)
        ),
    );
    Ok((deal, notice))
}

fn load_deal(store: &Store, deal_id: &str) -> Result<Deal, DeskError> {
    store
        .find_deal(deal_id)?
        .ok_or_else(|| DeskError::NotFound(format!("Deal {deal_id} not found.")))
}

/// Supplier accepts or declines one of their deals.
pub fn supplier_respond(
    store: &Store,
    supplier: &Session,
    deal_id: &str,
    accept: bool,
) -> Result<(Deal, Vec<Notice>), DeskError> {
    let mut deal = load_deal(store, deal_id)?;
    if supplier.role != Role::Supplier || !deal.supplier_username.eq_ignore_ascii_case(&supplier.username) {
        return Err(DeskError::Forbidden("This deal belongs to another supplier.".to_string()));
    }
    let effect = deal.supplier_decision(accept)?;
    store.settle_deal(&deal, &deal.supplier_key(), effect)?;

    let action = if accept { "SUPPLIER_ACCEPT_DEAL" } else { "SUPPLIER_REJECT_DEAL" };
    activity::record(store, &Actor::from(supplier), action, json!({ "deal_id": deal.deal_id }))?;

    let mut notices = Vec::new();
    if accept {
        notices.push(Notice::new(
            &deal.client_username,
            Role::Client,
            format!("✅ Supplier accepted your offer on {} ({}). Waiting for admin approval.", deal.stone_id, deal.deal_id),
        ));
        notices.extend(activity::admin_notices(
            store,
            &format!("📋 Deal {} for stone {} is accepted by the supplier and needs your decision.", deal.deal_id, deal.stone_id),
        )?);
    } else {
        notices.push(Notice::new(
            &deal.client_username,
            Role::Client,
            format!("❌ Supplier declined your offer on {} ({}).", deal.stone_id, deal.deal_id),
        ));
    }
    Ok((deal, notices))
}

/// Admin completes or closes a deal.
pub fn admin_decide(
    store: &Store,
    admin: &Session,
    deal_id: &str,
    approve: bool,
) -> Result<(Deal, Vec<Notice>), DeskError> {
    if admin.role != Role::Admin {
        return Err(DeskError::Forbidden("Only admins can decide deals.".to_string()));
    }
    let mut deal = load_deal(store, deal_id)?;
    let effect = deal.admin_decision(approve)?;
    store.settle_deal(&deal, &deal.supplier_key(), effect)?;

    let action = if approve { "ADMIN_APPROVE_DEAL" } else { "ADMIN_REJECT_DEAL" };
    activity::record(store, &Actor::from(admin), action, json!({ "deal_id": deal.deal_id }))?;

    let outcome = if approve { "✅ completed" } else { "❌ closed by admin" };
    let notices = vec![
        Notice::new(
            &deal.client_username,
            Role::Client,
            format!("Deal {} for stone {} was {}.", deal.deal_id, deal.stone_id, outcome),
        ),
        Notice::new(
            &deal.supplier_username,
            Role::Supplier,
            format!("Deal {} for stone {} was {}.", deal.deal_id, deal.stone_id, outcome),
        ),
    ];
    Ok((deal, notices))
}

/// Deals the session may see: admins all, suppliers and clients their own.
pub fn visible_deals(store: &Store, session: &Session) -> Result<Vec<Deal>, DeskError> {
    Ok(match session.role {
        Role::Admin => store.deals()?,
        Role::Supplier => store.deals_for_supplier(&session.username.to_lowercase())?,
        Role::Client => store.deals_for_client(&session.username)?,
    })
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DealCounts {
    pub open: usize,
    pub completed: usize,
    pub closed: usize,
    pub awaiting_supplier: usize,
    pub awaiting_admin: usize,
}

impl DealCounts {
    pub fn from_deals(deals: &[Deal]) -> Self {
        let mut counts = Self::default();
        for deal in deals {
            match deal.final_status {
                DealStatus::Open => {
                    counts.open += 1;
                    if deal.supplier_action == DealAction::Pending {
                        counts.awaiting_supplier += 1;
                    } else if deal.admin_action == DealAction::Pending {
                        counts.awaiting_admin += 1;
                    }
                }
                DealStatus::Completed => counts.completed += 1,
                DealStatus::Closed => counts.closed += 1,
            }
        }
        counts
    }

    pub fn render(&self) -> String {
        format!(
            "🟢 Open: {} (⏳ supplier: {}, 📋 admin: {})\n✅ Completed: {}\n❌ Closed: {}",
            self.open, self.awaiting_supplier, self.awaiting_admin, self.completed, self.closed
        )
    }
}

/// Result of a bulk deal sheet.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    pub created: Vec<Deal>,
    pub notices: Vec<Notice>,
    /// (stock id, reason)
    pub failed: Vec<(String, String)>,
}

/// Create one deal per row of a returned bulk template that carries an offer.
pub fn bulk_request(store: &Store, client: &Session, sheet: &Sheet) -> Result<BulkOutcome, DeskError> {
    let (Some(id_col), Some(offer_col)) = (sheet.column("Stock #"), sheet.column(BULK_OFFER_COLUMN)) else {
        return Err(DeskError::Invalid(format!(
            "The sheet must have 'Stock #' and '{BULK_OFFER_COLUMN}' columns."
        )));
    };

    let mut outcome = BulkOutcome::default();
    for r in 0..sheet.rows.len() {
        let stock_id = clean_text(&sheet.cell(r, id_col).as_text());
        let offer_cell = sheet.cell(r, offer_col);
        if stock_id.is_empty() || offer_cell.is_blank() {
            continue;
        }
        let Some(offer) = offer_cell.as_number() else {
            outcome.failed.push((stock_id, "Offer price is not a number.".to_string()));
            continue;
        };
        match request_deal(store, client, &stock_id, offer) {
            Ok((deal, notice)) => {
                outcome.created.push(deal);
                outcome.notices.push(notice);
            }
            Err(DeskError::Store(e)) => return Err(DeskError::Store(e)),
            Err(e) => outcome.failed.push((stock_id, e.detail())),
        }
    }

    if outcome.created.is_empty() && outcome.failed.is_empty() {
        return Err(DeskError::Invalid(format!("No offers found. Fill in '{BULK_OFFER_COLUMN}' for the stones you want.")));
    }
    Ok(outcome)
}
