//! Supplier stock: upload validation, search, market statistics.

use serde_json::json;
use std::collections::{BTreeMap, HashMap};

use super::accounts::{Account, Role, display_supplier, supplier_key};
use super::activity::{self, Actor};
use super::sessions::Session;
use super::{DeskError, desk_now, timestamp};
use crate::sheet::Sheet;
use crate::store::Store;
use crate::text::{clean_text, format_money, format_number, normalize};

pub const REQUIRED_COLUMNS: [&str; 10] = [
    "Stock #",
    "Shape",
    "Weight",
    "Color",
    "Clarity",
    "Price Per Carat",
    "Lab",
    "Report #",
    "Diamond Type",
    "Description",
];

pub const OPTIONAL_COLUMNS: [&str; 3] = ["CUT", "Polish", "Symmetry"];

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: u32 = 10 * 1024 * 1024;

/// Stones listed in chat before switching to a spreadsheet.
pub const SEARCH_INLINE_LIMIT: usize = 10;

/// Minimum discount (percent below group median) for a smart deal.
pub const SMART_DEAL_MIN_DISCOUNT: f64 = 10.0;

/// Carat distance within which two stones are comparable.
pub const COMPARABLE_WEIGHT_TOLERANCE: f64 = 0.2;

/// Percent band around the market average treated as "at market".
const MARKET_BAND_PCT: f64 = 5.0;

const DUPLICATES_SHOWN: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct Stone {
    /// Owner tag, `supplier_<username>`.
    pub supplier: String,
    pub stock_id: String,
    pub shape: String,
    pub weight: f64,
    pub color: String,
    pub clarity: String,
    pub price_per_carat: f64,
    pub lab: String,
    pub report_no: String,
    pub diamond_type: String,
    pub description: String,
    pub cut: String,
    pub polish: String,
    pub symmetry: String,
    pub locked: bool,
    pub uploaded_at: String,
}

impl Stone {
    /// Total price: weight × price per carat.
    pub fn value(&self) -> f64 {
        self.weight * self.price_per_carat
    }

    fn group_key(&self) -> (String, String, String, String) {
        (
            normalize(&self.shape),
            normalize(&self.color),
            normalize(&self.clarity),
            normalize(&self.diamond_type),
        )
    }

    /// Multi-line description for chat.
    pub fn card(&self) -> String {
        let mut card = format!(
            "💎 {} | {}\n⚖️ {} ct | {} | {}\n💰 {}/ct (total {})\n🏷️ {} {} | {}",
            self.stock_id,
            self.shape,
            format_number(self.weight, 2),
            self.color,
            self.clarity,
            format_money(self.price_per_carat),
            format_money(self.value()),
            self.lab,
            self.report_no,
            self.diamond_type,
        );
        if !self.description.is_empty() {
            card.push_str(&format!("\n📝 {}", self.description));
        }
        card.push_str(if self.locked { "\n🔒 Locked (deal in progress)" } else { "\n🔓 Available" });
        card
    }
}

/// Outcome of checking an uploaded sheet.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub stones: Vec<Stone>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Check a stock sheet and convert its rows into stones owned by `supplier`.
/// Stones are only produced when there are no errors.
pub fn validate_upload(sheet: &Sheet, supplier: &str, uploaded_at: &str) -> ValidationReport {
    let mut report = ValidationReport::default();

    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| sheet.column(c).is_none())
        .collect();
    if !missing.is_empty() {
        report.errors.push(format!("Missing required columns: {}", missing.join(", ")));
        return report;
    }

    let missing_optional: Vec<&str> = OPTIONAL_COLUMNS
        .iter()
        .copied()
        .filter(|c| sheet.column(c).is_none())
        .collect();
    if !missing_optional.is_empty() {
        report.warnings.push(format!("Optional columns not found: {}", missing_optional.join(", ")));
    }

    if sheet.rows.is_empty() {
        report.errors.push("The sheet has no stock rows.".to_string());
        return report;
    }

    let col = |name: &str| sheet.column(name).unwrap_or(usize::MAX);
    let text = |row: usize, name: &str| match sheet.column(name) {
        Some(c) => clean_text(&sheet.cell(row, c).as_text()),
        None => String::new(),
    };

    for name in REQUIRED_COLUMNS {
        let c = col(name);
        let empty = (0..sheet.rows.len()).filter(|&r| sheet.cell(r, c).is_blank()).count();
        if empty > 0 {
            report.errors.push(format!("Column '{name}' has {empty} empty rows"));
        }
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut duplicates: Vec<String> = Vec::new();
    for r in 0..sheet.rows.len() {
        let id = text(r, "Stock #");
        if id.is_empty() {
            continue;
        }
        let count = seen.entry(id.clone()).or_insert(0);
        *count += 1;
        if *count == 2 {
            duplicates.push(id);
        }
    }
    if !duplicates.is_empty() {
        let shown: Vec<&str> = duplicates.iter().take(DUPLICATES_SHOWN).map(String::as_str).collect();
        report.errors.push(format!(
            "Duplicate Stock # found ({}): {}",
            duplicates.len(),
            shown.join(", ")
        ));
    }

    for name in ["Weight", "Price Per Carat"] {
        let c = col(name);
        let invalid = (0..sheet.rows.len())
            .filter(|&r| !sheet.cell(r, c).is_blank())
            .filter(|&r| !sheet.cell(r, c).as_number().is_some_and(|v| v > 0.0))
            .count();
        if invalid > 0 {
            report.errors.push(format!(
                "Column '{name}' must be a number greater than 0 ({invalid} invalid rows)"
            ));
        }
    }

    if !report.is_valid() {
        return report;
    }

    let number = |row: usize, name: &str| sheet.cell(row, col(name)).as_number().unwrap_or_default();
    report.stones = (0..sheet.rows.len())
        .map(|r| Stone {
            supplier: supplier.to_string(),
            stock_id: text(r, "Stock #"),
            shape: text(r, "Shape"),
            weight: number(r, "Weight"),
            color: text(r, "Color"),
            clarity: text(r, "Clarity"),
            price_per_carat: number(r, "Price Per Carat"),
            lab: text(r, "Lab"),
            report_no: text(r, "Report #"),
            diamond_type: text(r, "Diamond Type"),
            description: text(r, "Description"),
            cut: text(r, "CUT"),
            polish: text(r, "Polish"),
            symmetry: text(r, "Symmetry"),
            locked: false,
            uploaded_at: uploaded_at.to_string(),
        })
        .collect();
    report
}

/// Validate a supplier's sheet and, if it is clean, replace their stock.
pub fn upload_stock(store: &Store, session: &Session, sheet: &Sheet) -> Result<ValidationReport, DeskError> {
    replace_stock(store, &Actor::from(session), &session.username, sheet, "UPLOAD_STOCK")
}

/// [`upload_stock`] for a supplier account posting over HTTP rather than chatting.
pub fn upload_stock_for(store: &Store, account: &Account, sheet: &Sheet) -> Result<ValidationReport, DeskError> {
    if account.role != Role::Supplier || !account.approved {
        return Err(DeskError::Forbidden("Only suppliers can upload stock".to_string()));
    }
    let actor = Actor::new(&account.username, account.role, None);
    replace_stock(store, &actor, &account.username, sheet, "API_UPLOAD_STOCK")
}

fn replace_stock(
    store: &Store,
    actor: &Actor,
    username: &str,
    sheet: &Sheet,
    action: &str,
) -> Result<ValidationReport, DeskError> {
    let key = supplier_key(username);
    let report = validate_upload(sheet, &key, &timestamp(&desk_now()));
    if !report.is_valid() {
        return Ok(report);
    }

    store.replace_supplier_stock(&key, &report.stones)?;
    activity::record(
        store,
        actor,
        action,
        json!({ "rows": report.stones.len(), "warnings": report.warnings }),
    )?;
    Ok(report)
}

/// Remove every supplier's stock. Returns (stones, suppliers) deleted.
pub fn delete_all_stock(store: &Store, admin: &Actor) -> Result<(usize, usize), DeskError> {
    let (stones, suppliers) = store.delete_all_stones()?;
    activity::record(
        store,
        admin,
        "DELETE_ALL_STOCK",
        json!({ "stones": stones, "suppliers": suppliers }),
    )?;
    Ok((stones, suppliers))
}

/// Totals over a set of stones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StockSummary {
    pub stones: usize,
    pub carats: f64,
    pub value: f64,
    pub avg_price: f64,
    pub suppliers: usize,
    pub locked: usize,
    pub top_shapes: Vec<(String, usize)>,
}

impl StockSummary {
    pub fn render(&self, title: &str) -> String {
        let mut text = format!(
            "{title}\n\n💎 Stones: {}\n⚖️ Total carats: {}\n💰 Total value: {}\n📈 Avg price/ct: {}\n🔒 Locked: {}",
            self.stones,
            format_number(self.carats, 2),
            format_money(self.value),
            format_money(self.avg_price),
            self.locked,
        );
        if self.suppliers > 1 {
            text.push_str(&format!("\n🏭 Suppliers: {}", self.suppliers));
        }
        if !self.top_shapes.is_empty() {
            text.push_str("\n\nTop shapes:");
            for (shape, count) in &self.top_shapes {
                text.push_str(&format!("\n• {shape}: {count}"));
            }
        }
        text
    }
}

pub fn summarize(stones: &[Stone]) -> StockSummary {
    if stones.is_empty() {
        return StockSummary::default();
    }

    let mut shapes: HashMap<String, (String, usize)> = HashMap::new();
    let mut suppliers: Vec<&str> = Vec::new();
    for stone in stones {
        let entry = shapes.entry(normalize(&stone.shape)).or_insert_with(|| (stone.shape.clone(), 0));
        entry.1 += 1;
        if !suppliers.contains(&stone.supplier.as_str()) {
            suppliers.push(&stone.supplier);
        }
    }
    let mut top_shapes: Vec<(String, usize)> = shapes.into_values().collect();
    top_shapes.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    top_shapes.truncate(5);

    StockSummary {
        stones: stones.len(),
        carats: stones.iter().map(|s| s.weight).sum(),
        value: stones.iter().map(Stone::value).sum(),
        avg_price: stones.iter().map(|s| s.price_per_carat).sum::<f64>() / stones.len() as f64,
        suppliers: suppliers.len(),
        locked: stones.iter().filter(|s| s.locked).count(),
        top_shapes,
    }
}

/// Carat criterion of a search.
#[derive(Debug, Clone, PartialEq)]
pub enum CaratFilter {
    Any,
    /// Within ±10% of the given weight.
    Around(f64),
    /// Inclusive range.
    Range(f64, f64),
}

impl CaratFilter {
    pub fn parse(input: &str) -> Result<Self, DeskError> {
        let input = normalize(input);
        let invalid = || DeskError::Invalid("Enter a carat like 1.5, a range like 1-2, or 'any'.".to_string());

        if input == "any" {
            return Ok(CaratFilter::Any);
        }
        if let Some((lo, hi)) = input.split_once('-') {
            let lo = lo.trim().parse::<f64>().map_err(|_| invalid())?;
            let hi = hi.trim().parse::<f64>().map_err(|_| invalid())?;
            if !(lo.is_finite() && hi.is_finite()) || lo < 0.0 || lo > hi {
                return Err(invalid());
            }
            return Ok(CaratFilter::Range(lo, hi));
        }
        match input.parse::<f64>() {
            Ok(x) if x.is_finite() && x > 0.0 => Ok(CaratFilter::Around(x)),
            _ => Err(invalid()),
        }
    }

    pub fn matches(&self, weight: f64) -> bool {
        match *self {
            CaratFilter::Any => true,
            CaratFilter::Around(x) => weight >= x * 0.9 && weight <= x * 1.1,
            CaratFilter::Range(lo, hi) => weight >= lo && weight <= hi,
        }
    }
}

/// Parse a comma-separated answer. `any` means no restriction.
pub fn parse_choices(input: &str) -> Option<Vec<String>> {
    let input = normalize(input);
    if input == "any" || input.is_empty() {
        return None;
    }
    let choices: Vec<String> = input
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if choices.is_empty() { None } else { Some(choices) }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchQuery {
    pub carat: CaratFilter,
    pub shapes: Option<Vec<String>>,
    pub colors: Option<Vec<String>>,
    pub clarities: Option<Vec<String>>,
}

impl SearchQuery {
    pub fn matches(&self, stone: &Stone) -> bool {
        fn allowed(choices: &Option<Vec<String>>, value: &str) -> bool {
            match choices {
                Some(list) => list.contains(&normalize(value)),
                None => true,
            }
        }
        self.carat.matches(stone.weight)
            && allowed(&self.shapes, &stone.shape)
            && allowed(&self.colors, &stone.color)
            && allowed(&self.clarities, &stone.clarity)
    }
}

pub fn search<'a>(stones: &'a [Stone], query: &SearchQuery) -> Vec<&'a Stone> {
    stones.iter().filter(|s| query.matches(s)).collect()
}

/// A stone priced well below comparable stones.
#[derive(Debug, Clone, PartialEq)]
pub struct SmartDeal {
    pub stone: Stone,
    /// Median price per carat of its (shape, color, clarity, type) group.
    pub market_price: f64,
    /// Percent below market, one decimal.
    pub discount_pct: f64,
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Unlocked stones at least `min_discount` percent below their group median,
/// best discount first.
pub fn smart_deals(stones: &[Stone], min_discount: f64) -> Vec<SmartDeal> {
    let mut groups: HashMap<_, Vec<f64>> = HashMap::new();
    for stone in stones {
        groups.entry(stone.group_key()).or_default().push(stone.price_per_carat);
    }
    let medians: HashMap<_, f64> = groups
        .into_iter()
        .map(|(key, mut prices)| (key, median(&mut prices)))
        .collect();

    let mut deals: Vec<SmartDeal> = stones
        .iter()
        .filter(|s| !s.locked)
        .filter_map(|stone| {
            let market = *medians.get(&stone.group_key())?;
            if market <= 0.0 {
                return None;
            }
            let discount = round1((market - stone.price_per_carat) / market * 100.0);
            (discount >= min_discount).then(|| SmartDeal {
                stone: stone.clone(),
                market_price: market,
                discount_pct: discount,
            })
        })
        .collect();
    deals.sort_by(|a, b| b.discount_pct.total_cmp(&a.discount_pct));
    deals
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PricePosition {
    Above,
    Below,
    Market,
}

impl PricePosition {
    pub fn label(&self) -> &'static str {
        match self {
            PricePosition::Above => "Above Market",
            PricePosition::Below => "Below Market",
            PricePosition::Market => "Market Average",
        }
    }
}

/// How one of a supplier's stones compares to similar stones on the desk.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceComparison {
    pub stone: Stone,
    /// Comparable stones, including this one.
    pub comparables: usize,
    pub market_avg: f64,
    pub diff: f64,
    pub diff_pct: f64,
    pub position: PricePosition,
}

pub fn price_analytics(all: &[Stone], supplier: &str) -> Vec<PriceComparison> {
    all.iter()
        .filter(|s| s.supplier == supplier)
        .filter_map(|own| {
            let key = own.group_key();
            let prices: Vec<f64> = all
                .iter()
                .filter(|s| s.group_key() == key)
                .filter(|s| (s.weight - own.weight).abs() <= COMPARABLE_WEIGHT_TOLERANCE + 1e-9)
                .map(|s| s.price_per_carat)
                .collect();
            if prices.len() <= 1 {
                return None;
            }
            let market_avg = prices.iter().sum::<f64>() / prices.len() as f64;
            let diff = own.price_per_carat - market_avg;
            let diff_pct = if market_avg > 0.0 { diff / market_avg * 100.0 } else { 0.0 };
            let position = if diff_pct > MARKET_BAND_PCT {
                PricePosition::Above
            } else if diff_pct < -MARKET_BAND_PCT {
                PricePosition::Below
            } else {
                PricePosition::Market
            };
            Some(PriceComparison {
                stone: own.clone(),
                comparables: prices.len(),
                market_avg,
                diff,
                diff_pct,
                position,
            })
        })
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyticsSummary {
    pub analysed: usize,
    pub above: usize,
    pub below: usize,
    pub at_market: usize,
}

impl AnalyticsSummary {
    pub fn from_comparisons(comparisons: &[PriceComparison]) -> Self {
        let count = |p: PricePosition| comparisons.iter().filter(|c| c.position == p).count();
        Self {
            analysed: comparisons.len(),
            above: count(PricePosition::Above),
            below: count(PricePosition::Below),
            at_market: count(PricePosition::Market),
        }
    }

    pub fn recommendation(&self) -> &'static str {
        if self.analysed == 0 {
            "Not enough comparable stones on the desk yet."
        } else if self.above > self.below {
            "Several stones are priced above market. Consider reviewing them to close deals faster."
        } else if self.below > self.above {
            "Several stones are priced below market. You may be able to raise prices."
        } else {
            "Your pricing is in line with the market."
        }
    }
}

/// One supplier's row on the leaderboard.
#[derive(Debug, Clone, PartialEq)]
pub struct SupplierStanding {
    pub supplier: String,
    pub stones: usize,
    pub carats: f64,
    pub avg_price: f64,
    pub value: f64,
}

impl SupplierStanding {
    pub fn display_name(&self) -> String {
        display_supplier(&self.supplier)
    }
}

/// Suppliers ranked by number of stones, then total value.
pub fn leaderboard(stones: &[Stone]) -> Vec<SupplierStanding> {
    let mut by_supplier: BTreeMap<&str, Vec<&Stone>> = BTreeMap::new();
    for stone in stones {
        by_supplier.entry(stone.supplier.as_str()).or_default().push(stone);
    }

    let mut standings: Vec<SupplierStanding> = by_supplier
        .into_iter()
        .map(|(supplier, stones)| SupplierStanding {
            supplier: supplier.to_string(),
            stones: stones.len(),
            carats: stones.iter().map(|s| s.weight).sum(),
            avg_price: stones.iter().map(|s| s.price_per_carat).sum::<f64>() / stones.len() as f64,
            value: stones.iter().map(|s| s.value()).sum(),
        })
        .collect();
    standings.sort_by(|a, b| b.stones.cmp(&a.stones).then_with(|| b.value.total_cmp(&a.value)));
    standings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet::Cell;

    fn stone(supplier: &str, id: &str, shape: &str, weight: f64, price: f64) -> Stone {
        Stone {
            supplier: supplier.to_string(),
            stock_id: id.to_string(),
            shape: shape.to_string(),
            weight,
            color: "D".to_string(),
            clarity: "VS1".to_string(),
            price_per_carat: price,
            lab: "GIA".to_string(),
            report_no: format!("R-{id}"),
            diamond_type: "Natural".to_string(),
            description: String::new(),
            cut: String::new(),
            polish: String::new(),
            symmetry: String::new(),
            locked: false,
            uploaded_at: "2026-01-01 10:00:00".to_string(),
        }
    }

    fn stock_sheet(rows: Vec<Vec<Cell>>) -> Sheet {
        let mut sheet = Sheet::new("Stock", &REQUIRED_COLUMNS);
        for row in rows {
            sheet.push_row(row);
        }
        sheet
    }

    fn row(id: &str, weight: Cell, price: Cell) -> Vec<Cell> {
        vec![
            id.into(),
            "Round".into(),
            weight,
            "D".into(),
            "VS1".into(),
            price,
            "GIA".into(),
            Cell::Number(1234567890.0),
            "Natural".into(),
            "Excellent\u{00A0} make".into(),
        ]
    }

    #[test]
    fn test_validate_accepts_clean_sheet() {
        let sheet = stock_sheet(vec![
            row("D001", 1.01.into(), 5000.0.into()),
            row("D002", "0.9".into(), "4200".into()),
        ]);
        let report = validate_upload(&sheet, "supplier_gems", "2026-01-01 10:00:00");
        assert!(report.is_valid(), "{:?}", report.errors);
        assert_eq!(report.stones.len(), 2);
        assert_eq!(report.warnings, vec!["Optional columns not found: CUT, Polish, Symmetry"]);

        let first = &report.stones[0];
        assert_eq!(first.supplier, "supplier_gems");
        assert_eq!(first.report_no, "1234567890");
        assert_eq!(first.description, "Excellent make");
        assert_eq!(report.stones[1].weight, 0.9);
        assert!(!first.locked);
    }

    #[test]
    fn test_validate_missing_columns_stops_early() {
        let sheet = Sheet::new("Stock", &["Stock #", "Shape"]);
        let report = validate_upload(&sheet, "supplier_gems", "");
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("Missing required columns: Weight, Color"));
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let sheet = stock_sheet(vec![
            row("D001", 1.0.into(), 5000.0.into()),
            row("D001", Cell::Empty, "abc".into()),
            row("D002", (-1.0).into(), 0.0.into()),
        ]);
        let report = validate_upload(&sheet, "supplier_gems", "");
        assert!(!report.is_valid());
        assert!(report.stones.is_empty());
        assert!(report.errors.contains(&"Column 'Weight' has 1 empty rows".to_string()));
        assert!(report.errors.iter().any(|e| e.contains("Duplicate Stock # found (1): D001")));
        assert!(report.errors.iter().any(|e| e.starts_with("Column 'Weight' must be a number") && e.contains("(1 invalid")));
        assert!(report.errors.iter().any(|e| e.starts_with("Column 'Price Per Carat' must be a number") && e.contains("(2 invalid")));
    }

    #[test]
    fn test_carat_filter() {
        assert_eq!(CaratFilter::parse("ANY").unwrap(), CaratFilter::Any);
        assert_eq!(CaratFilter::parse("1-2").unwrap(), CaratFilter::Range(1.0, 2.0));
        assert_eq!(CaratFilter::parse("1.5").unwrap(), CaratFilter::Around(1.5));
        assert!(CaratFilter::parse("2-1").is_err());
        assert!(CaratFilter::parse("big").is_err());
        assert!(CaratFilter::parse("0").is_err());

        let around = CaratFilter::Around(1.0);
        assert!(around.matches(0.9));
        assert!(around.matches(1.1));
        assert!(!around.matches(1.2));
        assert!(CaratFilter::Range(1.0, 2.0).matches(2.0));
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let mut princess = stone("supplier_a", "P1", "Princess", 1.0, 4000.0);
        princess.color = "E".to_string();
        let stones = vec![stone("supplier_a", "R1", "Round", 1.0, 5000.0), princess];

        let query = SearchQuery {
            carat: CaratFilter::Any,
            shapes: parse_choices("round, PRINCESS"),
            colors: parse_choices("d"),
            clarities: parse_choices("any"),
        };
        let found = search(&stones, &query);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].stock_id, "R1");
    }

    #[test]
    fn test_smart_deals_use_group_median() {
        let stones = vec![
            stone("supplier_a", "A1", "Round", 1.0, 5000.0),
            stone("supplier_a", "A2", "Round", 1.0, 6000.0),
            stone("supplier_b", "B1", "Round", 1.0, 4000.0),
            stone("supplier_b", "B2", "Round", 1.0, 7000.0),
            stone("supplier_b", "P1", "Pear", 1.0, 1000.0),
        ];
        // Round median = 5500: B1 is 27.3% below, A1 9.1% (excluded), lone pear 0%.
        let deals = smart_deals(&stones, SMART_DEAL_MIN_DISCOUNT);
        assert_eq!(deals.len(), 1);
        assert_eq!(deals[0].stone.stock_id, "B1");
        assert_eq!(deals[0].market_price, 5500.0);
        assert_eq!(deals[0].discount_pct, 27.3);
    }

    #[test]
    fn test_smart_deals_skip_locked_and_sort() {
        let mut locked = stone("supplier_a", "L1", "Round", 1.0, 1000.0);
        locked.locked = true;
        let stones = vec![
            stone("supplier_a", "A1", "Round", 1.0, 10000.0),
            stone("supplier_a", "A2", "Round", 1.0, 10000.0),
            stone("supplier_a", "A3", "Round", 1.0, 10000.0),
            stone("supplier_a", "A4", "Round", 1.0, 8000.0),
            stone("supplier_a", "A5", "Round", 1.0, 5000.0),
            locked,
        ];
        // Median 9000: A5 44.4%, A4 11.1%, the locked stone is never offered.
        let deals = smart_deals(&stones, 10.0);
        let ids: Vec<&str> = deals.iter().map(|d| d.stone.stock_id.as_str()).collect();
        assert_eq!(ids, vec!["A5", "A4"]);
    }

    #[test]
    fn test_price_analytics() {
        let stones = vec![
            stone("supplier_me", "M1", "Round", 1.0, 6000.0),
            stone("supplier_x", "X1", "Round", 1.1, 4000.0),
            stone("supplier_x", "X2", "Round", 2.0, 100.0),
            stone("supplier_me", "M2", "Oval", 1.0, 3000.0),
        ];
        let comparisons = price_analytics(&stones, "supplier_me");
        assert_eq!(comparisons.len(), 1);
        let c = &comparisons[0];
        assert_eq!(c.stone.stock_id, "M1");
        assert_eq!(c.comparables, 2);
        assert_eq!(c.market_avg, 5000.0);
        assert_eq!(c.diff, 1000.0);
        assert_eq!(c.diff_pct, 20.0);
        assert_eq!(c.position, PricePosition::Above);

        let summary = AnalyticsSummary::from_comparisons(&comparisons);
        assert_eq!(summary.above, 1);
        assert!(summary.recommendation().contains("above market"));
    }

    #[test]
    fn test_leaderboard_orders_by_count() {
        let stones = vec![
            stone("supplier_small", "S1", "Round", 1.0, 9000.0),
            stone("supplier_big", "B1", "Round", 1.0, 1000.0),
            stone("supplier_big", "B2", "Round", 2.0, 1000.0),
        ];
        let board = leaderboard(&stones);
        assert_eq!(board[0].supplier, "supplier_big");
        assert_eq!(board[0].display_name(), "Big");
        assert_eq!(board[0].stones, 2);
        assert_eq!(board[0].carats, 3.0);
        assert_eq!(board[0].value, 3000.0);
        assert_eq!(board[1].avg_price, 9000.0);
    }

    #[test]
    fn test_summarize() {
        let mut stones = vec![
            stone("supplier_a", "A1", "Round", 1.0, 5000.0),
            stone("supplier_a", "A2", "round", 2.0, 3000.0),
            stone("supplier_b", "B1", "Oval", 0.5, 4000.0),
        ];
        stones[2].locked = true;
        let summary = summarize(&stones);
        assert_eq!(summary.stones, 3);
        assert_eq!(summary.carats, 3.5);
        assert_eq!(summary.value, 13000.0);
        assert_eq!(summary.avg_price, 4000.0);
        assert_eq!(summary.suppliers, 2);
        assert_eq!(summary.locked, 1);
        assert_eq!(summary.top_shapes, vec![("Round".to_string(), 2), ("Oval".to_string(), 1)]);
        assert!(summary.render("📊 Stock").contains("Suppliers: 2"));
    }

    #[test]
    fn test_upload_stock_replaces_supplier_inventory() {
        let store = Store::in_memory().unwrap();
        let session = Session {
            telegram_id: 1,
            chat_id: 1,
            username: "Gems".to_string(),
            role: Role::Supplier,
            last_active: 0,
        };
        let report = upload_stock(&store, &session, &stock_sheet(vec![row("D001", 1.0.into(), 5000.0.into())])).unwrap();
        assert!(report.is_valid());
        assert_eq!(store.supplier_stones("supplier_gems").unwrap().len(), 1);

        let bad = upload_stock(&store, &session, &stock_sheet(vec![row("D009", Cell::Empty, 5000.0.into())])).unwrap();
        assert!(!bad.is_valid());
        assert_eq!(store.supplier_stones("supplier_gems").unwrap()[0].stock_id, "D001");
    }

    #[test]
    fn test_account_upload_requires_approved_supplier() {
        let store = Store::in_memory().unwrap();
        let mut account = Account {
            username: "Gems".to_string(),
            password: "1234".to_string(),
            role: Role::Supplier,
            approved: true,
            created_at: String::new(),
        };
        let sheet = stock_sheet(vec![row("D001", 1.0.into(), 5000.0.into())]);
        assert!(upload_stock_for(&store, &account, &sheet).unwrap().is_valid());
        assert_eq!(store.supplier_stones("supplier_gems").unwrap().len(), 1);

        account.approved = false;
        assert!(matches!(upload_stock_for(&store, &account, &sheet), Err(DeskError::Forbidden(_))));
        account.approved = true;
        account.role = Role::Client;
        assert!(matches!(upload_stock_for(&store, &account, &sheet), Err(DeskError::Forbidden(_))));
    }
}
