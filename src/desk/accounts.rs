//! Accounts: signup, admin approval and credential checks.

use serde_json::json;
use std::fmt;

use super::activity::{self, Actor, Notice};
use super::{DeskError, desk_now, timestamp};
use crate::store::Store;
use crate::text::{clean_password, clean_text, normalize, title_case};

pub const MIN_USERNAME_LEN: usize = 3;
pub const MIN_PASSWORD_LEN: usize = 4;

/// Prefix of the owner tag stored on every stone.
const SUPPLIER_PREFIX: &str = "supplier_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Admin,
    Supplier,
    Client,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Supplier, Role::Client];

    pub fn parse(value: &str) -> Option<Self> {
        match normalize(value).as_str() {
            "admin" => Some(Role::Admin),
            "supplier" => Some(Role::Supplier),
            "client" => Some(Role::Client),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Supplier => "supplier",
            Role::Client => "client",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Role::Admin => "Admin",
            Role::Supplier => "Supplier",
            Role::Client => "Client",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub username: String,
    pub password: String,
    pub role: Role,
    pub approved: bool,
    pub created_at: String,
}

/// Owner tag for a supplier's stones: `supplier_<lowercase username>`.
pub fn supplier_key(username: &str) -> String {
    format!("{SUPPLIER_PREFIX}{}", username.to_lowercase())
}

/// Username behind a supplier key.
pub fn supplier_username(key: &str) -> &str {
    key.strip_prefix(SUPPLIER_PREFIX).unwrap_or(key)
}

/// Human-facing supplier name: `supplier_gem_house` -> `Gem House`.
pub fn display_supplier(key: &str) -> String {
    title_case(&supplier_username(key).replace('_', " "))
}

/// Validate a requested username and check it is free.
pub fn check_username(store: &Store, raw: &str) -> Result<String, DeskError> {
    let username = clean_text(raw);
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(DeskError::Invalid(format!(
            "Username must be at least {MIN_USERNAME_LEN} characters."
        )));
    }
    if store.find_account(&username)?.is_some() {
        return Err(DeskError::Conflict("Username already exists. Please choose another.".to_string()));
    }
    Ok(username)
}

pub fn check_password(raw: &str) -> Result<String, DeskError> {
    let password = clean_password(raw);
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(DeskError::Invalid(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters."
        )));
    }
    Ok(password)
}

/// Create a client account awaiting approval. Returns notices for the admins.
pub fn register(
    store: &Store,
    username: &str,
    password: &str,
    telegram_id: Option<i64>,
) -> Result<(Account, Vec<Notice>), DeskError> {
    let username = check_username(store, username)?;
    let password = check_password(password)?;

    let account = Account {
        username,
        password,
        role: Role::Client,
        approved: false,
        created_at: timestamp(&desk_now()),
    };
    if !store.insert_account(&account)? {
        return Err(DeskError::Conflict("Username already exists. Please choose another.".to_string()));
    }

    let notices = activity::admin_notices(
        store,
        &format!("🆕 New account request: {}. Open ⏳ Pending Accounts to review.", account.username),
    )?;
    activity::record(
        store,
        &Actor::new(&account.username, account.role, telegram_id),
        "ACCOUNT_CREATED",
        json!({ "username": account.username }),
    )?;
    Ok((account, notices))
}

/// Check credentials. Only approved accounts may log in.
pub fn authenticate(store: &Store, username: &str, password: &str) -> Result<Account, DeskError> {
    let invalid = || DeskError::Invalid("Invalid username or password.".to_string());

    let account = store.find_account(&clean_text(username))?.ok_or_else(invalid)?;
    if clean_password(&account.password) != clean_password(password) {
        return Err(invalid());
    }
    if !account.approved {
        return Err(DeskError::Forbidden("Your account is waiting for admin approval.".to_string()));
    }
    Ok(account)
}

/// Approve a signup. Returns the notice for the account owner.
pub fn approve(store: &Store, admin: &Actor, username: &str) -> Result<(Account, Notice), DeskError> {
    let mut account = store
        .find_account(username)?
        .ok_or_else(|| DeskError::NotFound(format!("Account {username} not found.")))?;
    if account.approved {
        return Err(DeskError::Conflict(format!("{} is already approved.", account.username)));
    }
    store.set_approved(&account.username, true)?;
    account.approved = true;

    let notice = Notice::new(
        &account.username,
        account.role,
        "✅ Your account has been approved. You can now /login.",
    );
    activity::record(store, admin, "ACCOUNT_APPROVED", json!({ "username": account.username }))?;
    Ok((account, notice))
}

/// Reject a signup by deleting the account.
pub fn reject(store: &Store, admin: &Actor, username: &str) -> Result<Account, DeskError> {
    let account = store
        .find_account(username)?
        .ok_or_else(|| DeskError::NotFound(format!("Account {username} not found.")))?;
    store.delete_account(&account.username)?;
    activity::record(store, admin, "ACCOUNT_REJECTED", json!({ "username": account.username }))?;
    Ok(account)
}

/// Create or overwrite an approved account with the given role. This is how
/// admins and suppliers are set up; self-service signups are always clients.
pub fn provision(store: &Store, username: &str, password: &str, role: Role) -> Result<Account, DeskError> {
    let username = clean_text(username);
    if username.chars().count() < MIN_USERNAME_LEN {
        return Err(DeskError::Invalid(format!(
            "Username must be at least {MIN_USERNAME_LEN} characters."
        )));
    }
    let account = Account {
        username,
        password: check_password(password)?,
        role,
        approved: true,
        created_at: timestamp(&desk_now()),
    };
    store.upsert_account(&account)?;
    activity::record(
        store,
        &Actor::system(),
        "ACCOUNT_PROVISIONED",
        json!({ "username": account.username, "role": account.role.as_str() }),
    )?;
    Ok(account)
}

/// Counts for the admin "View Users" screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserSummary {
    pub total: usize,
    pub admins: usize,
    pub suppliers: usize,
    pub clients: usize,
    pub approved: usize,
    pub pending: usize,
}

pub fn summarize_users(accounts: &[Account]) -> UserSummary {
    let mut summary = UserSummary { total: accounts.len(), ..Default::default() };
    for account in accounts {
        match account.role {
            Role::Admin => summary.admins += 1,
            Role::Supplier => summary.suppliers += 1,
            Role::Client => summary.clients += 1,
        }
        if account.approved {
            summary.approved += 1;
        } else {
            summary.pending += 1;
        }
    }
    summary
}
