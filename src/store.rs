//! Persistent SQLite store for accounts, sessions, stock, deals,
//! notifications and the activity log.

use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::info;

use crate::desk::accounts::{Account, Role};
use crate::desk::activity::{ActivityEntry, Notification};
use crate::desk::deals::{Deal, DealAction, DealStatus};
use crate::desk::sessions::Session;
use crate::desk::stock::Stone;

/// What happens to the traded stone when a deal is settled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoneEffect {
    Keep,
    Unlock,
    Remove,
}

/// Row counts per table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableCounts {
    pub accounts: usize,
    pub sessions: usize,
    pub stones: usize,
    pub deals: usize,
    pub notifications: usize,
    pub activity: usize,
}

pub struct Store {
    conn: Mutex<Connection>,
}

const STONE_COLUMNS: &str = "supplier, stock_id, shape, weight, color, clarity, price_per_carat, lab, \
     report_no, diamond_type, description, cut, polish, symmetry, locked, uploaded_at";

const DEAL_COLUMNS: &str = "deal_id, stone_id, supplier_username, client_username, actual_price, \
     offer_price, supplier_action, admin_action, final_status, created_at";

impl Store {
    /// Open (or create) the database file.
    pub fn open(path: &Path) -> rusqlite::Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;

        let counts = store.counts()?;
        info!(
            "Loaded database from {:?} ({} accounts, {} stones, {} deals)",
            path, counts.accounts, counts.stones, counts.deals
        );
        Ok(store)
    }

    /// Create a new in-memory database.
    pub fn in_memory() -> rusqlite::Result<Self> {
        let store = Self { conn: Mutex::new(Connection::open_in_memory()?) };
        store.init_schema()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                username TEXT PRIMARY KEY COLLATE NOCASE,
                password TEXT NOT NULL,
                role TEXT NOT NULL,
                approved INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sessions (
                telegram_id INTEGER PRIMARY KEY,
                chat_id INTEGER NOT NULL,
                username TEXT NOT NULL COLLATE NOCASE,
                role TEXT NOT NULL,
                last_active INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS stones (
                supplier TEXT NOT NULL,
                stock_id TEXT NOT NULL,
                shape TEXT NOT NULL,
                weight REAL NOT NULL,
                color TEXT NOT NULL,
                clarity TEXT NOT NULL,
                price_per_carat REAL NOT NULL,
                lab TEXT NOT NULL,
                report_no TEXT NOT NULL,
                diamond_type TEXT NOT NULL,
                description TEXT NOT NULL,
                cut TEXT NOT NULL DEFAULT '',
                polish TEXT NOT NULL DEFAULT '',
                symmetry TEXT NOT NULL DEFAULT '',
                locked INTEGER NOT NULL DEFAULT 0,
                uploaded_at TEXT NOT NULL,
                PRIMARY KEY (supplier, stock_id)
            );

            CREATE TABLE IF NOT EXISTS deals (
                deal_id TEXT PRIMARY KEY,
                stone_id TEXT NOT NULL,
                supplier_username TEXT NOT NULL COLLATE NOCASE,
                client_username TEXT NOT NULL COLLATE NOCASE,
                actual_price REAL NOT NULL,
                offer_price REAL NOT NULL,
                supplier_action TEXT NOT NULL,
                admin_action TEXT NOT NULL,
                final_status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT NOT NULL COLLATE NOCASE,
                role TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at TEXT NOT NULL,
                read INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS activity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                date TEXT NOT NULL,
                time TEXT NOT NULL,
                login_id TEXT NOT NULL,
                role TEXT NOT NULL,
                action TEXT NOT NULL,
                details TEXT NOT NULL,
                telegram_id INTEGER
            );

            CREATE INDEX IF NOT EXISTS idx_stones_stock_id ON stones(stock_id);
            CREATE INDEX IF NOT EXISTS idx_deals_supplier ON deals(supplier_username);
            CREATE INDEX IF NOT EXISTS idx_deals_client ON deals(client_username);
            CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(username, read);
        "#,
        )
    }

    pub fn counts(&self) -> rusqlite::Result<TableCounts> {
        let conn = self.conn();
        let count = |table: &str| -> rusqlite::Result<usize> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get::<_, i64>(0))
                .map(|n| n as usize)
        };
        Ok(TableCounts {
            accounts: count("accounts")?,
            sessions: count("sessions")?,
            stones: count("stones")?,
            deals: count("deals")?,
            notifications: count("notifications")?,
            activity: count("activity")?,
        })
    }

    // ---- accounts ----

    /// Insert a new account. Returns false when the username is taken.
    pub fn insert_account(&self, account: &Account) -> rusqlite::Result<bool> {
        let changed = self.conn().execute(
            "INSERT OR IGNORE INTO accounts (username, password, role, approved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                account.username,
                account.password,
                account.role.as_str(),
                account.approved,
                account.created_at
            ],
        )?;
        Ok(changed == 1)
    }

    /// Insert or overwrite an account.
    pub fn upsert_account(&self, account: &Account) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO accounts (username, password, role, approved, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(username) DO UPDATE SET
                password = excluded.password,
                role = excluded.role,
                approved = excluded.approved",
            params![
                account.username,
                account.password,
                account.role.as_str(),
                account.approved,
                account.created_at
            ],
        )?;
        Ok(())
    }

    /// Case-insensitive lookup.
    pub fn find_account(&self, username: &str) -> rusqlite::Result<Option<Account>> {
        self.conn()
            .query_row(
                "SELECT username, password, role, approved, created_at FROM accounts WHERE username = ?1",
                params![username],
                account_from_row,
            )
            .optional()
    }

    pub fn accounts(&self) -> rusqlite::Result<Vec<Account>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT username, password, role, approved, created_at FROM accounts ORDER BY created_at, username",
        )?;
        stmt.query_map([], account_from_row)?.collect()
    }

    pub fn pending_accounts(&self) -> rusqlite::Result<Vec<Account>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT username, password, role, approved, created_at FROM accounts
             WHERE approved = 0 ORDER BY created_at, username",
        )?;
        stmt.query_map([], account_from_row)?.collect()
    }

    pub fn usernames_with_role(&self, role: Role) -> rusqlite::Result<Vec<String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT username FROM accounts WHERE role = ?1 ORDER BY username")?;
        stmt.query_map(params![role.as_str()], |row| row.get(0))?.collect()
    }

    pub fn set_approved(&self, username: &str, approved: bool) -> rusqlite::Result<bool> {
        let changed = self.conn().execute(
            "UPDATE accounts SET approved = ?2 WHERE username = ?1",
            params![username, approved],
        )?;
        Ok(changed > 0)
    }

    pub fn delete_account(&self, username: &str) -> rusqlite::Result<bool> {
        let changed = self.conn().execute("DELETE FROM accounts WHERE username = ?1", params![username])?;
        Ok(changed > 0)
    }

    // ---- sessions ----

    pub fn save_session(&self, session: &Session) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO sessions (telegram_id, chat_id, username, role, last_active)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session.telegram_id,
                session.chat_id,
                session.username,
                session.role.as_str(),
                session.last_active
            ],
        )?;
        Ok(())
    }

    pub fn session(&self, telegram_id: i64) -> rusqlite::Result<Option<Session>> {
        self.conn()
            .query_row(
                "SELECT telegram_id, chat_id, username, role, last_active FROM sessions WHERE telegram_id = ?1",
                params![telegram_id],
                session_from_row,
            )
            .optional()
    }

    /// Most recently active session of a user.
    pub fn session_for_username(&self, username: &str) -> rusqlite::Result<Option<Session>> {
        self.conn()
            .query_row(
                "SELECT telegram_id, chat_id, username, role, last_active FROM sessions
                 WHERE username = ?1 ORDER BY last_active DESC LIMIT 1",
                params![username],
                session_from_row,
            )
            .optional()
    }

    pub fn sessions(&self) -> rusqlite::Result<Vec<Session>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT telegram_id, chat_id, username, role, last_active FROM sessions ORDER BY last_active DESC",
        )?;
        stmt.query_map([], session_from_row)?.collect()
    }

    pub fn touch_session(&self, telegram_id: i64, now: i64) -> rusqlite::Result<()> {
        self.conn().execute(
            "UPDATE sessions SET last_active = ?2 WHERE telegram_id = ?1",
            params![telegram_id, now],
        )?;
        Ok(())
    }

    pub fn delete_session(&self, telegram_id: i64) -> rusqlite::Result<bool> {
        let changed = self.conn().execute("DELETE FROM sessions WHERE telegram_id = ?1", params![telegram_id])?;
        Ok(changed > 0)
    }

    /// Remove and return every session idle since before `cutoff`.
    pub fn take_expired_sessions(&self, cutoff: i64) -> rusqlite::Result<Vec<Session>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let expired = {
            let mut stmt = tx.prepare(
                "SELECT telegram_id, chat_id, username, role, last_active FROM sessions WHERE last_active < ?1",
            )?;
            stmt.query_map(params![cutoff], session_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute("DELETE FROM sessions WHERE last_active < ?1", params![cutoff])?;
        tx.commit()?;
        Ok(expired)
    }

    // ---- stock ----

    /// Replace a supplier's inventory. Stones that are locked by an open deal
    /// and appear again in the new upload keep their lock.
    pub fn replace_supplier_stock(&self, supplier: &str, stones: &[Stone]) -> rusqlite::Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let locked: Vec<String> = {
            let mut stmt = tx.prepare("SELECT stock_id FROM stones WHERE supplier = ?1 AND locked = 1")?;
            stmt.query_map(params![supplier], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.execute("DELETE FROM stones WHERE supplier = ?1", params![supplier])?;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT INTO stones ({STONE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ))?;
            for stone in stones {
                let keep_lock = stone.locked || locked.contains(&stone.stock_id);
                stmt.execute(params![
                    supplier,
                    stone.stock_id,
                    stone.shape,
                    stone.weight,
                    stone.color,
                    stone.clarity,
                    stone.price_per_carat,
                    stone.lab,
                    stone.report_no,
                    stone.diamond_type,
                    stone.description,
                    stone.cut,
                    stone.polish,
                    stone.symmetry,
                    keep_lock,
                    stone.uploaded_at
                ])?;
            }
        }
        tx.commit()?;
        Ok(stones.len())
    }

    pub fn stones(&self) -> rusqlite::Result<Vec<Stone>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {STONE_COLUMNS} FROM stones ORDER BY rowid"))?;
        stmt.query_map([], stone_from_row)?.collect()
    }

    pub fn supplier_stones(&self, supplier: &str) -> rusqlite::Result<Vec<Stone>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {STONE_COLUMNS} FROM stones WHERE supplier = ?1 ORDER BY rowid"
        ))?;
        stmt.query_map(params![supplier], stone_from_row)?.collect()
    }

    /// Stone with this stock number across all suppliers, preferring one
    /// that is not locked in a deal.
    pub fn find_stone(&self, stock_id: &str) -> rusqlite::Result<Option<Stone>> {
        self.conn()
            .query_row(
                &format!("SELECT {STONE_COLUMNS} FROM stones WHERE stock_id = ?1 ORDER BY locked, rowid LIMIT 1"),
                params![stock_id],
                stone_from_row,
            )
            .optional()
    }

    pub fn unlocked_stones(&self, limit: usize) -> rusqlite::Result<Vec<Stone>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {STONE_COLUMNS} FROM stones WHERE locked = 0 ORDER BY rowid LIMIT ?1"
        ))?;
        stmt.query_map(params![limit as i64], stone_from_row)?.collect()
    }

    /// Lock a stone if it is currently unlocked. Returns false when it was
    /// already locked or does not exist.
    pub fn lock_stone(&self, supplier: &str, stock_id: &str) -> rusqlite::Result<bool> {
        let changed = self.conn().execute(
            "UPDATE stones SET locked = 1 WHERE supplier = ?1 AND stock_id = ?2 AND locked = 0",
            params![supplier, stock_id],
        )?;
        Ok(changed == 1)
    }

    pub fn unlock_stone(&self, supplier: &str, stock_id: &str) -> rusqlite::Result<bool> {
        let changed = self.conn().execute(
            "UPDATE stones SET locked = 0 WHERE supplier = ?1 AND stock_id = ?2",
            params![supplier, stock_id],
        )?;
        Ok(changed > 0)
    }

    /// Delete every stone. Returns (stones, suppliers) removed.
    pub fn delete_all_stones(&self) -> rusqlite::Result<(usize, usize)> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let suppliers: i64 = tx.query_row("SELECT COUNT(DISTINCT supplier) FROM stones", [], |row| row.get(0))?;
        let stones = tx.execute("DELETE FROM stones", [])?;
        tx.commit()?;
        Ok((stones, suppliers as usize))
    }

    // ---- deals ----

    /// Lock the stone and record the deal in one transaction. Returns false
    /// (and records nothing) when the stone was not available for locking.
    pub fn open_deal(&self, supplier_key: &str, deal: &Deal) -> rusqlite::Result<bool> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let locked = tx.execute(
            "UPDATE stones SET locked = 1 WHERE supplier = ?1 AND stock_id = ?2 AND locked = 0",
            params![supplier_key, deal.stone_id],
        )?;
        if locked != 1 {
            return Ok(false);
        }
        tx.execute(
            &format!("INSERT INTO deals ({DEAL_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                deal.deal_id,
                deal.stone_id,
                deal.supplier_username,
                deal.client_username,
                deal.actual_price,
                deal.offer_price,
                deal.supplier_action.as_str(),
                deal.admin_action.as_str(),
                deal.final_status.as_str(),
                deal.created_at
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    /// Persist a deal's new state and apply its effect on the stone.
    pub fn settle_deal(&self, deal: &Deal, supplier_key: &str, effect: StoneEffect) -> rusqlite::Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE deals SET supplier_action = ?2, admin_action = ?3, final_status = ?4 WHERE deal_id = ?1",
            params![
                deal.deal_id,
                deal.supplier_action.as_str(),
                deal.admin_action.as_str(),
                deal.final_status.as_str()
            ],
        )?;
        match effect {
            StoneEffect::Keep => {}
            StoneEffect::Unlock => {
                tx.execute(
                    "UPDATE stones SET locked = 0 WHERE supplier = ?1 AND stock_id = ?2",
                    params![supplier_key, deal.stone_id],
                )?;
            }
            StoneEffect::Remove => {
                tx.execute(
                    "DELETE FROM stones WHERE supplier = ?1 AND stock_id = ?2",
                    params![supplier_key, deal.stone_id],
                )?;
            }
        }
        tx.commit()
    }

    pub fn find_deal(&self, deal_id: &str) -> rusqlite::Result<Option<Deal>> {
        self.conn()
            .query_row(
                &format!("SELECT {DEAL_COLUMNS} FROM deals WHERE deal_id = ?1"),
                params![deal_id],
                deal_from_row,
            )
            .optional()
    }

    pub fn deals(&self) -> rusqlite::Result<Vec<Deal>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {DEAL_COLUMNS} FROM deals ORDER BY created_at DESC, rowid DESC"))?;
        stmt.query_map([], deal_from_row)?.collect()
    }

    pub fn deals_for_supplier(&self, username: &str) -> rusqlite::Result<Vec<Deal>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE supplier_username = ?1 ORDER BY created_at DESC, rowid DESC"
        ))?;
        stmt.query_map(params![username], deal_from_row)?.collect()
    }

    pub fn deals_for_client(&self, username: &str) -> rusqlite::Result<Vec<Deal>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {DEAL_COLUMNS} FROM deals WHERE client_username = ?1 ORDER BY created_at DESC, rowid DESC"
        ))?;
        stmt.query_map(params![username], deal_from_row)?.collect()
    }

    // ---- notifications ----

    pub fn add_notification(&self, username: &str, role: Role, message: &str, created_at: &str) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO notifications (username, role, message, created_at, read) VALUES (?1, ?2, ?3, ?4, 0)",
            params![username, role.as_str(), message, created_at],
        )?;
        Ok(())
    }

    /// Return unread notifications (oldest first) and mark them read.
    pub fn take_unread_notifications(&self, username: &str, role: Role) -> rusqlite::Result<Vec<Notification>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let unread = {
            let mut stmt = tx.prepare(
                "SELECT id, username, role, message, created_at, read FROM notifications
                 WHERE username = ?1 AND role = ?2 AND read = 0 ORDER BY id",
            )?;
            stmt.query_map(params![username, role.as_str()], notification_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        tx.execute(
            "UPDATE notifications SET read = 1 WHERE username = ?1 AND role = ?2 AND read = 0",
            params![username, role.as_str()],
        )?;
        tx.commit()?;
        Ok(unread)
    }

    // ---- activity ----

    pub fn log_activity(&self, entry: &ActivityEntry) -> rusqlite::Result<()> {
        self.conn().execute(
            "INSERT INTO activity (date, time, login_id, role, action, details, telegram_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.date,
                entry.time,
                entry.login_id,
                entry.role,
                entry.action,
                entry.details,
                entry.telegram_id
            ],
        )?;
        Ok(())
    }

    pub fn activity(&self) -> rusqlite::Result<Vec<ActivityEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT date, time, login_id, role, action, details, telegram_id FROM activity ORDER BY id",
        )?;
        stmt.query_map([], |row| {
            Ok(ActivityEntry {
                date: row.get(0)?,
                time: row.get(1)?,
                login_id: row.get(2)?,
                role: row.get(3)?,
                action: row.get(4)?,
                details: row.get(5)?,
                telegram_id: row.get(6)?,
            })
        })?
        .collect()
    }
}

fn role_from_db(value: String) -> Role {
    Role::parse(&value).unwrap_or(Role::Client)
}

fn account_from_row(row: &Row) -> rusqlite::Result<Account> {
    Ok(Account {
        username: row.get(0)?,
        password: row.get(1)?,
        role: role_from_db(row.get(2)?),
        approved: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn session_from_row(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        telegram_id: row.get(0)?,
        chat_id: row.get(1)?,
        username: row.get(2)?,
        role: role_from_db(row.get(3)?),
        last_active: row.get(4)?,
    })
}

fn stone_from_row(row: &Row) -> rusqlite::Result<Stone> {
    Ok(Stone {
        supplier: row.get(0)?,
        stock_id: row.get(1)?,
        shape: row.get(2)?,
        weight: row.get(3)?,
        color: row.get(4)?,
        clarity: row.get(5)?,
        price_per_carat: row.get(6)?,
        lab: row.get(7)?,
        report_no: row.get(8)?,
        diamond_type: row.get(9)?,
        description: row.get(10)?,
        cut: row.get(11)?,
        polish: row.get(12)?,
        symmetry: row.get(13)?,
        locked: row.get(14)?,
        uploaded_at: row.get(15)?,
    })
}

fn deal_from_row(row: &Row) -> rusqlite::Result<Deal> {
    let action = |value: String| DealAction::parse(&value).unwrap_or(DealAction::Pending);
    Ok(Deal {
        deal_id: row.get(0)?,
        stone_id: row.get(1)?,
        supplier_username: row.get(2)?,
        client_username: row.get(3)?,
        actual_price: row.get(4)?,
        offer_price: row.get(5)?,
        supplier_action: action(row.get(6)?),
        admin_action: action(row.get(7)?),
        final_status: DealStatus::parse(&row.get::<_, String>(8)?).unwrap_or(DealStatus::Open),
        created_at: row.get(9)?,
    })
}

fn notification_from_row(row: &Row) -> rusqlite::Result<Notification> {
    Ok(Notification {
        id: row.get(0)?,
        username: row.get(1)?,
        role: role_from_db(row.get(2)?),
        message: row.get(3)?,
        created_at: row.get(4)?,
        read: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desk::deals::DealStatus;

    fn stone(supplier: &str, stock_id: &str, locked: bool) -> Stone {
        Stone {
            supplier: supplier.to_string(),
            stock_id: stock_id.to_string(),
            shape: "Round".to_string(),
            weight: 1.0,
            color: "D".to_string(),
            clarity: "VS1".to_string(),
            price_per_carat: 5000.0,
            lab: "GIA".to_string(),
            report_no: "123".to_string(),
            diamond_type: "Natural".to_string(),
            description: String::new(),
            cut: String::new(),
            polish: String::new(),
            symmetry: String::new(),
            locked,
            uploaded_at: "2026-01-01 10:00:00".to_string(),
        }
    }

    fn deal(stone_id: &str) -> Deal {
        Deal {
            deal_id: "DEAL-ABCDEF0123".to_string(),
            stone_id: stone_id.to_string(),
            supplier_username: "gems".to_string(),
            client_username: "bob".to_string(),
            actual_price: 5000.0,
            offer_price: 4500.0,
            supplier_action: DealAction::Pending,
            admin_action: DealAction::Pending,
            final_status: DealStatus::Open,
            created_at: "2026-01-01 10:00:00".to_string(),
        }
    }

    fn account(username: &str, role: Role, approved: bool) -> Account {
        Account {
            username: username.to_string(),
            password: "1234".to_string(),
            role,
            approved,
            created_at: "2026-01-01 10:00:00".to_string(),
        }
    }

    #[test]
    fn test_account_lookup_is_case_insensitive() {
        let store = Store::in_memory().unwrap();
        assert!(store.insert_account(&account("Alice", Role::Client, false)).unwrap());
        assert!(!store.insert_account(&account("alice", Role::Client, false)).unwrap());

        let found = store.find_account("ALICE").unwrap().unwrap();
        assert_eq!(found.username, "Alice");
        assert_eq!(store.pending_accounts().unwrap().len(), 1);

        assert!(store.set_approved("alice", true).unwrap());
        assert!(store.pending_accounts().unwrap().is_empty());
        assert!(store.delete_account("aLiCe").unwrap());
        assert!(store.find_account("alice").unwrap().is_none());
    }

    #[test]
    fn test_upsert_account_overwrites() {
        let store = Store::in_memory().unwrap();
        store.upsert_account(&account("prince", Role::Client, false)).unwrap();
        store.upsert_account(&account("prince", Role::Admin, true)).unwrap();
        let found = store.find_account("prince").unwrap().unwrap();
        assert_eq!(found.role, Role::Admin);
        assert!(found.approved);
        assert_eq!(store.usernames_with_role(Role::Admin).unwrap(), vec!["prince"]);
    }

    #[test]
    fn test_replace_stock_preserves_locks() {
        let store = Store::in_memory().unwrap();
        let key = "supplier_gems";
        store
            .replace_supplier_stock(key, &[stone(key, "D1", false), stone(key, "D2", false)])
            .unwrap();
        assert!(store.lock_stone(key, "D1").unwrap());

        store
            .replace_supplier_stock(key, &[stone(key, "D1", false), stone(key, "D3", false)])
            .unwrap();
        let stones = store.supplier_stones(key).unwrap();
        assert_eq!(stones.len(), 2);
        assert!(stones.iter().find(|s| s.stock_id == "D1").unwrap().locked);
        assert!(!stones.iter().find(|s| s.stock_id == "D3").unwrap().locked);
    }

    #[test]
    fn test_lock_is_exclusive() {
        let store = Store::in_memory().unwrap();
        store.replace_supplier_stock("supplier_a", &[stone("supplier_a", "D1", false)]).unwrap();
        assert!(store.lock_stone("supplier_a", "D1").unwrap());
        assert!(!store.lock_stone("supplier_a", "D1").unwrap());
        assert!(!store.lock_stone("supplier_a", "missing").unwrap());
        assert!(store.unlocked_stones(10).unwrap().is_empty());
        assert!(store.unlock_stone("supplier_a", "D1").unwrap());
        assert_eq!(store.unlocked_stones(10).unwrap().len(), 1);
    }

    #[test]
    fn test_open_deal_requires_unlocked_stone() {
        let store = Store::in_memory().unwrap();
        store.replace_supplier_stock("supplier_gems", &[stone("supplier_gems", "D1", false)]).unwrap();

        assert!(store.open_deal("supplier_gems", &deal("D1")).unwrap());
        assert!(store.find_stone("D1").unwrap().unwrap().locked);

        let mut second = deal("D1");
        second.deal_id = "DEAL-0000000000".to_string();
        assert!(!store.open_deal("supplier_gems", &second).unwrap());
        assert_eq!(store.deals().unwrap().len(), 1);
    }

    #[test]
    fn test_settle_deal_effects() {
        let store = Store::in_memory().unwrap();
        store
            .replace_supplier_stock("supplier_gems", &[stone("supplier_gems", "D1", false), stone("supplier_gems", "D2", false)])
            .unwrap();
        let mut first = deal("D1");
        store.open_deal("supplier_gems", &first).unwrap();
        first.final_status = DealStatus::Closed;
        store.settle_deal(&first, "supplier_gems", StoneEffect::Unlock).unwrap();
        assert!(!store.find_stone("D1").unwrap().unwrap().locked);
        assert_eq!(store.find_deal(&first.deal_id).unwrap().unwrap().final_status, DealStatus::Closed);

        let mut second = deal("D2");
        second.deal_id = "DEAL-1111111111".to_string();
        store.open_deal("supplier_gems", &second).unwrap();
        second.final_status = DealStatus::Completed;
        store.settle_deal(&second, "supplier_gems", StoneEffect::Remove).unwrap();
        assert!(store.find_stone("D2").unwrap().is_none());

        assert_eq!(store.deals_for_supplier("GEMS").unwrap().len(), 2);
        assert_eq!(store.deals_for_client("bob").unwrap().len(), 2);
        assert!(store.deals_for_client("carol").unwrap().is_empty());
    }

    #[test]
    fn test_notifications_are_taken_once() {
        let store = Store::in_memory().unwrap();
        store.add_notification("gems", Role::Supplier, "first", "2026-01-01 10:00").unwrap();
        store.add_notification("gems", Role::Supplier, "second", "2026-01-01 10:01").unwrap();
        store.add_notification("gems", Role::Client, "other role", "2026-01-01 10:01").unwrap();

        let unread = store.take_unread_notifications("Gems", Role::Supplier).unwrap();
        assert_eq!(unread.iter().map(|n| n.message.as_str()).collect::<Vec<_>>(), vec!["first", "second"]);
        assert!(store.take_unread_notifications("gems", Role::Supplier).unwrap().is_empty());
        assert_eq!(store.counts().unwrap().notifications, 3);
    }

    #[test]
    fn test_expired_sessions_are_removed() {
        let store = Store::in_memory().unwrap();
        for (id, last_active) in [(1, 100), (2, 5000)] {
            store
                .save_session(&Session {
                    telegram_id: id,
                    chat_id: id,
                    username: format!("user{id}"),
                    role: Role::Client,
                    last_active,
                })
                .unwrap();
        }
        let expired = store.take_expired_sessions(1000).unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].telegram_id, 1);
        assert!(store.session(1).unwrap().is_none());
        assert!(store.session(2).unwrap().is_some());
    }

    #[test]
    fn test_delete_all_stones_counts_suppliers() {
        let store = Store::in_memory().unwrap();
        store.replace_supplier_stock("supplier_a", &[stone("supplier_a", "D1", false), stone("supplier_a", "D2", false)]).unwrap();
        store.replace_supplier_stock("supplier_b", &[stone("supplier_b", "D1", false)]).unwrap();
        assert_eq!(store.delete_all_stones().unwrap(), (3, 2));
        assert!(store.stones().unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desk.db");
        {
            let store = Store::open(&path).unwrap();
            store.insert_account(&account("alice", Role::Client, true)).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert!(store.find_account("alice").unwrap().is_some());
    }
}
