//! End-to-end desk conversations against an on-disk database.

use std::sync::Arc;
use std::time::Duration;

use diamond_bot::bot::commands::Command;
use diamond_bot::bot::conversation::{Conversation, Origin, Outgoing};
use diamond_bot::desk::accounts::{self, Role};
use diamond_bot::store::Store;

const SUPPLIER: Origin = Origin { user_id: 20, chat_id: 200 };
const CLIENT: Origin = Origin { user_id: 30, chat_id: 300 };

const HEADER: &str =
    "Stock #,Shape,Weight,Color,Clarity,Price Per Carat,Lab,Report #,Diamond Type,Description,CUT,Polish,Symmetry\n";

fn open(path: &std::path::Path) -> Conversation {
    let store = Arc::new(Store::open(path).unwrap());
    Conversation::new(store, Duration::from_secs(3600), 1000, Duration::from_secs(10))
}

fn texts(out: &[Outgoing]) -> Vec<String> {
    out.iter()
        .filter_map(|o| match o {
            Outgoing::Text { text, .. } => Some(text.clone()),
            Outgoing::Document { .. } => None,
        })
        .collect()
}

fn login(desk: &Conversation, from: Origin, username: &str, password: &str) -> Vec<String> {
    desk.command(from, Command::Login);
    desk.text(from, username);
    texts(&desk.text(from, password))
}

#[test]
fn test_supplier_upload_feeds_client_smart_deals() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("diamond.db");
    let desk = open(&db);
    accounts::provision(desk.store(), "gems", "5678", Role::Supplier).unwrap();
    accounts::provision(desk.store(), "alice", "abcd", Role::Client).unwrap();

    assert_eq!(login(&desk, SUPPLIER, "gems", "5678")[0], "💎 Welcome Supplier gems");
    desk.text(SUPPLIER, "📤 Upload Excel");
    let csv = format!(
        "{HEADER}\
         R1,Round,1.0,D,VS1,5000,GIA,1,Natural,Sharp,EX,EX,EX\n\
         R2,round,1.1,d,vs1,5000,GIA,2,Natural,Crisp,EX,EX,EX\n\
         R3,ROUND,0.9,D,VS1,3000,GIA,3,Natural,Bargain,VG,VG,VG\n"
    );
    let pending = desk.accept_document(SUPPLIER, "stock.csv", csv.len() as u32).unwrap();
    let out = texts(&desk.document(SUPPLIER, pending, csv.as_bytes()));
    assert!(out[0].starts_with("✅ Stock uploaded"), "{out:?}");

    login(&desk, CLIENT, "alice", "abcd");
    let out = texts(&desk.text(CLIENT, "🔥 Smart Deals"));
    assert_eq!(out[0], "🔥 1 smart deal(s), best first:");
    assert!(out[1].contains("R3"));
    assert!(out[1].contains("40% below market"));
}

#[test]
fn test_sessions_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("diamond.db");
    {
        let desk = open(&db);
        accounts::provision(desk.store(), "alice", "abcd", Role::Client).unwrap();
        login(&desk, CLIENT, "alice", "abcd");
    }

    let desk = open(&db);
    let out = texts(&desk.text(CLIENT, "💎 Search Diamonds"));
    assert!(out[0].starts_with("Enter Carat"), "{out:?}");

    desk.command(CLIENT, Command::Logout);
    let out = texts(&desk.text(CLIENT, "💎 Search Diamonds"));
    assert!(out[0].contains("Please login first"));
}
