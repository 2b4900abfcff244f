//! Spreadsheets the desk hands out: the stock template, exports and reports.
//!
//! Free-text cells go through `safe_cell` so that nothing a user typed is
//! evaluated as a formula when the export is opened.

use super::accounts::{Account, display_supplier};
use super::activity::ActivityEntry;
use super::deals::{BULK_OFFER_COLUMN, Deal};
use super::stock::{OPTIONAL_COLUMNS, PriceComparison, REQUIRED_COLUMNS, SmartDeal, Stone, SupplierStanding};
use crate::sheet::{Cell, Sheet};
use crate::text::safe_cell;

fn text(value: &str) -> Cell {
    Cell::Text(safe_cell(value))
}

fn yes_no(flag: bool) -> Cell {
    Cell::from(if flag { "YES" } else { "NO" })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn stock_headers() -> Vec<&'static str> {
    REQUIRED_COLUMNS.iter().chain(OPTIONAL_COLUMNS.iter()).copied().collect()
}

fn stone_cells(stone: &Stone) -> Vec<Cell> {
    vec![
        text(&stone.stock_id),
        text(&stone.shape),
        Cell::Number(stone.weight),
        text(&stone.color),
        text(&stone.clarity),
        Cell::Number(stone.price_per_carat),
        text(&stone.lab),
        text(&stone.report_no),
        text(&stone.diamond_type),
        text(&stone.description),
        text(&stone.cut),
        text(&stone.polish),
        text(&stone.symmetry),
    ]
}

/// Template suppliers fill in: a `Stock` sheet with example rows and an
/// `Instructions` sheet describing every column.
pub fn sample_stock() -> Vec<Sheet> {
    let mut stock = Sheet::new("Stock", &stock_headers());
    let examples: [[&str; 13]; 3] = [
        ["D001", "Round", "1.0", "D", "VVS1", "10000", "GIA", "1234567890", "Natural", "Excellent cut round", "EX", "EX", "EX"],
        ["D002", "Oval", "1.5", "E", "VS1", "8500", "IGI", "2345678901", "Natural", "Nice oval diamond", "VG", "", "VG"],
        ["D003", "Princess", "2.0", "F", "SI1", "7000", "HRD", "3456789012", "LGD", "Good princess cut", "", "VG", ""],
    ];
    for row in examples {
        stock.push_row(
            row.iter()
                .enumerate()
                .map(|(i, value)| match i {
                    2 | 5 => value.parse::<f64>().map(Cell::Number).unwrap_or(Cell::Empty),
                    _ if value.is_empty() => Cell::Empty,
                    _ => Cell::from(*value),
                })
                .collect(),
        );
    }

    let descriptions = [
        "Unique identifier for each diamond",
        "Shape of diamond (Round, Oval, Princess, etc.)",
        "Weight in carats (e.g., 1.0, 1.5)",
        "Color grade (D, E, F, etc.)",
        "Clarity grade (VVS1, VS1, SI1, etc.)",
        "Price per carat in USD",
        "Certification lab (GIA, IGI, HRD, etc.)",
        "Certificate number",
        "Type (Natural, LGD, HPHT)",
        "Brief description of the diamond",
        "Cut grade (EX, VG, G, F, P) - CAN BE BLANK",
        "Polish grade (EX, VG, G, F, P) - CAN BE BLANK",
        "Symmetry grade (EX, VG, G, F, P) - CAN BE BLANK",
    ];
    let mut instructions = Sheet::new("Instructions", &["Column", "Required", "Description", "Example"]);
    for (i, column) in stock_headers().into_iter().enumerate() {
        instructions.push_row(vec![
            Cell::from(column),
            Cell::from(if i < REQUIRED_COLUMNS.len() { "Yes" } else { "No" }),
            Cell::from(descriptions[i]),
            Cell::from(examples[0][i]),
        ]);
    }
    vec![stock, instructions]
}

/// Stones in upload layout plus owner, lock flag and upload time.
pub fn stones_sheet(name: &str, stones: &[Stone]) -> Sheet {
    let mut headers = stock_headers();
    headers.extend(["Supplier", "Locked", "Uploaded At"]);
    let mut sheet = Sheet::new(name, &headers);
    for stone in stones {
        let mut row = stone_cells(stone);
        row.push(text(&display_supplier(&stone.supplier)));
        row.push(yes_no(stone.locked));
        row.push(Cell::from(stone.uploaded_at.as_str()));
        sheet.push_row(row);
    }
    sheet
}

/// Accounts without passwords.
pub fn accounts_sheet(accounts: &[Account]) -> Sheet {
    let mut sheet = Sheet::new("Users", &["Username", "Role", "Approved", "Created At"]);
    for account in accounts {
        sheet.push_row(vec![
            text(&account.username),
            Cell::from(account.role.label()),
            yes_no(account.approved),
            Cell::from(account.created_at.as_str()),
        ]);
    }
    sheet
}

pub fn deals_sheet(deals: &[Deal]) -> Sheet {
    let mut sheet = Sheet::new(
        "Deals",
        &[
            "Deal ID",
            "Stock #",
            "Supplier",
            "Client",
            "Actual Price ($/ct)",
            "Offer Price ($/ct)",
            "Supplier Action",
            "Admin Action",
            "Status",
            "Created At",
        ],
    );
    for deal in deals {
        sheet.push_row(vec![
            Cell::from(deal.deal_id.as_str()),
            text(&deal.stone_id),
            text(&deal.supplier_username),
            text(&deal.client_username),
            Cell::Number(deal.actual_price),
            Cell::Number(deal.offer_price),
            Cell::from(deal.supplier_action.as_str()),
            Cell::from(deal.admin_action.as_str()),
            Cell::from(deal.final_status.as_str()),
            Cell::from(deal.created_at.as_str()),
        ]);
    }
    sheet
}

pub fn activity_sheet(entries: &[ActivityEntry]) -> Sheet {
    let mut sheet = Sheet::new(
        "Activity",
        &["Date", "Time", "Login ID", "Role", "Action", "Details", "Telegram ID"],
    );
    for entry in entries {
        sheet.push_row(vec![
            Cell::from(entry.date.as_str()),
            Cell::from(entry.time.as_str()),
            text(&entry.login_id),
            Cell::from(entry.role.as_str()),
            Cell::from(entry.action.as_str()),
            text(&entry.details),
            entry.telegram_id.map(|id| Cell::Text(id.to_string())).unwrap_or(Cell::Empty),
        ]);
    }
    sheet
}

pub fn leaderboard_sheet(standings: &[SupplierStanding]) -> Sheet {
    let mut sheet = Sheet::new(
        "Leaderboard",
        &["Rank", "Supplier", "Stones", "Total Carats", "Avg Price ($/ct)", "Total Value ($)"],
    );
    for (rank, standing) in standings.iter().enumerate() {
        sheet.push_row(vec![
            Cell::from(rank + 1),
            text(&standing.display_name()),
            Cell::from(standing.stones),
            Cell::Number(round2(standing.carats)),
            Cell::Number(round2(standing.avg_price)),
            Cell::Number(round2(standing.value)),
        ]);
    }
    sheet
}

pub fn analytics_sheet(comparisons: &[PriceComparison]) -> Sheet {
    let mut sheet = Sheet::new(
        "Analytics",
        &[
            "Stock #",
            "Shape",
            "Weight",
            "Color",
            "Clarity",
            "Your Price ($/ct)",
            "Market Avg ($/ct)",
            "Difference ($/ct)",
            "Difference %",
            "Comparable Stones",
            "Position",
        ],
    );
    for c in comparisons {
        sheet.push_row(vec![
            text(&c.stone.stock_id),
            text(&c.stone.shape),
            Cell::Number(c.stone.weight),
            text(&c.stone.color),
            text(&c.stone.clarity),
            Cell::Number(c.stone.price_per_carat),
            Cell::Number(round2(c.market_avg)),
            Cell::Number(round2(c.diff)),
            Cell::Number(round2(c.diff_pct)),
            Cell::from(c.comparables),
            Cell::from(c.position.label()),
        ]);
    }
    sheet
}

pub fn smart_deals_sheet(deals: &[SmartDeal]) -> Sheet {
    let mut headers = stock_headers();
    headers.extend(["Market Price ($/ct)", "Discount %"]);
    let mut sheet = Sheet::new("Smart Deals", &headers);
    for deal in deals {
        let mut row = stone_cells(&deal.stone);
        row.push(Cell::Number(round2(deal.market_price)));
        row.push(Cell::Number(deal.discount_pct));
        sheet.push_row(row);
    }
    sheet
}

/// Offer sheet for bulk deal requests. Clients fill the offer column and send
/// the file back.
pub fn bulk_deal_template(stones: &[Stone]) -> Sheet {
    let mut sheet = Sheet::new(
        "Bulk Deal",
        &["Stock #", "Shape", "Weight", "Color", "Clarity", "Price Per Carat", "Lab", BULK_OFFER_COLUMN],
    );
    for stone in stones {
        sheet.push_row(vec![
            text(&stone.stock_id),
            text(&stone.shape),
            Cell::Number(stone.weight),
            text(&stone.color),
            text(&stone.clarity),
            Cell::Number(stone.price_per_carat),
            text(&stone.lab),
            Cell::Empty,
        ]);
    }
    sheet
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desk::accounts::Role;
    use crate::desk::stock::validate_upload;
    use crate::sheet::{SheetFormat, read_sheet, write_xlsx};

    fn stone(id: &str, description: &str) -> Stone {
        Stone {
            supplier: "supplier_gem_house".to_string(),
            stock_id: id.to_string(),
            shape: "Round".to_string(),
            weight: 1.25,
            color: "D".to_string(),
            clarity: "VS1".to_string(),
            price_per_carat: 4200.0,
            lab: "GIA".to_string(),
            report_no: "99".to_string(),
            diamond_type: "Natural".to_string(),
            description: description.to_string(),
            cut: String::new(),
            polish: String::new(),
            symmetry: String::new(),
            locked: true,
            uploaded_at: "2026-01-02 10:00:00".to_string(),
        }
    }

    #[test]
    fn test_sample_stock_passes_validation() {
        let sheets = sample_stock();
        assert_eq!(sheets[0].name, "Stock");
        assert_eq!(sheets[1].name, "Instructions");
        assert_eq!(sheets[1].rows.len(), 13);

        let report = validate_upload(&sheets[0], "supplier_demo", "now");
        assert!(report.is_valid(), "{:?}", report.errors);
        assert_eq!(report.stones.len(), 3);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_sample_stock_reads_back_from_xlsx() {
        let bytes = write_xlsx(&sample_stock()).unwrap();
        let sheet = read_sheet(&bytes, SheetFormat::Xlsx).unwrap();
        assert_eq!(sheet.name, "Stock");
        assert_eq!(sheet.rows.len(), 3);
        assert_eq!(sheet.cell(1, 0).as_text(), "D002");
    }

    #[test]
    fn test_stones_sheet_escapes_formulas() {
        let sheet = stones_sheet("All Stock", &[stone("D1", "=HYPERLINK(\"x\")")]);
        let description = sheet.column("Description").unwrap();
        assert_eq!(sheet.cell(0, description).as_text(), "'=HYPERLINK(\"x\")");
        assert_eq!(sheet.cell(0, sheet.column("Supplier").unwrap()).as_text(), "Gem House");
        assert_eq!(sheet.cell(0, sheet.column("Locked").unwrap()).as_text(), "YES");
    }

    #[test]
    fn test_accounts_sheet_has_no_passwords() {
        let sheet = accounts_sheet(&[Account {
            username: "alice".to_string(),
            password: "hunter2".to_string(),
            role: Role::Client,
            approved: false,
            created_at: String::new(),
        }]);
        assert!(sheet.column("Password").is_none());
        assert!(sheet.rows[0].iter().all(|c| c.as_text() != "hunter2"));
        assert_eq!(sheet.cell(0, 2).as_text(), "NO");
    }

    #[test]
    fn test_bulk_template_has_empty_offer_column() {
        let sheet = bulk_deal_template(&[stone("D1", ""), stone("D2", "")]);
        let offer = sheet.column(BULK_OFFER_COLUMN).unwrap();
        assert_eq!(sheet.rows.len(), 2);
        assert!(sheet.cell(1, offer).is_blank());
    }
}
