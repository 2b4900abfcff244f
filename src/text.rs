//! Text hygiene for spreadsheet cells and chat input.
//!
//! Uploaded sheets arrive with non-breaking spaces, zero-width characters,
//! full-width digits and numbers rendered as `1234.0`; everything that is
//! compared or stored goes through these helpers first.

use regex::Regex;
use std::sync::LazyLock;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Clean a free-text value: drop invisible characters, fold full-width
/// ASCII, turn line breaks into spaces and collapse runs of whitespace.
pub fn clean_text(value: &str) -> String {
    let mapped: String = value
        .chars()
        .filter_map(|c| match c {
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{2060}' | '\u{FEFF}' => None,
            '\u{00A0}' | '\u{2007}' | '\u{202F}' | '\u{3000}' => Some(' '),
            '\u{FF01}'..='\u{FF5E}' => char::from_u32(c as u32 - 0xFEE0),
            _ => Some(c),
        })
        .collect();
    WHITESPACE.replace_all(mapped.trim(), " ").into_owned()
}

/// Clean a password cell. Numeric passwords typed into a spreadsheet come
/// back as `1234.0`, so a trailing `.0` is dropped.
pub fn clean_password(value: &str) -> String {
    let cleaned = clean_text(value);
    match cleaned.strip_suffix(".0") {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => cleaned,
    }
}

/// Case-insensitive comparison key.
pub fn normalize(value: &str) -> String {
    clean_text(value).to_lowercase()
}

/// Guard against formula injection when a value is written back to a sheet.
pub fn safe_cell(value: &str) -> String {
    if value.starts_with(['=', '+', '-', '@']) {
        format!("'{value}")
    } else {
        value.to_string()
    }
}

/// Parse a user-entered number, accepting `$` and thousands separators.
pub fn parse_amount(value: &str) -> Option<f64> {
    let cleaned: String = clean_text(value)
        .chars()
        .filter(|c| *c != ',' && *c != '$')
        .collect();
    cleaned.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Format with thousands separators and a fixed number of decimals.
pub fn format_number(value: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    let sign = if value < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };
    match frac_part {
        Some(frac) => format!("{sign}{grouped}.{frac}"),
        None => format!("{sign}{grouped}"),
    }
}

/// `$1,234.56`
pub fn format_money(value: f64) -> String {
    if value < 0.0 {
        format!("-${}", format_number(-value, 2))
    } else {
        format!("${}", format_number(value, 2))
    }
}

/// Capitalize the first letter of every word.
pub fn title_case(value: &str) -> String {
    value
        .split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  Round \n\n  Brilliant\t "), "Round Brilliant");
    }

    #[test]
    fn test_clean_text_strips_invisible_characters() {
        assert_eq!(clean_text("VS\u{200B}1\u{00A0}cut"), "VS1 cut");
        assert_eq!(clean_text("\u{FEFF}D001"), "D001");
    }

    #[test]
    fn test_clean_text_folds_fullwidth() {
        assert_eq!(clean_text("ＶＳ１"), "VS1");
    }

    #[test]
    fn test_clean_password_drops_float_suffix() {
        assert_eq!(clean_password("1234.0"), "1234");
        assert_eq!(clean_password(" secret "), "secret");
        assert_eq!(clean_password(".0"), ".0");
        assert_eq!(clean_password("12.05"), "12.05");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Alice "), "alice");
    }

    #[test]
    fn test_safe_cell() {
        assert_eq!(safe_cell("=SUM(A1)"), "'=SUM(A1)");
        assert_eq!(safe_cell("@cmd"), "'@cmd");
        assert_eq!(safe_cell("Round"), "Round");
        assert_eq!(safe_cell(""), "");
    }

    #[test]
    fn test_parse_amount() {
        assert_eq!(parse_amount("4500"), Some(4500.0));
        assert_eq!(parse_amount("$4,500.50"), Some(4500.5));
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(parse_amount("inf"), None);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
        assert_eq!(format_number(999.0, 0), "999");
        assert_eq!(format_number(1000.0, 0), "1,000");
        assert_eq!(format_number(-1500.5, 1), "-1,500.5");
        assert_eq!(format_number(0.0, 2), "0.00");
    }

    #[test]
    fn test_format_money() {
        assert_eq!(format_money(5000.0), "$5,000.00");
        assert_eq!(format_money(-12.5), "-$12.50");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("alice"), "Alice");
        assert_eq!(title_case("gem HOUSE"), "Gem House");
    }
}
