//! Spreadsheet reading and writing.
//!
//! Suppliers upload stock as `.xlsx` (Office Open XML) or `.csv`; reports go
//! back out as `.xlsx`. XLSX files are ZIP archives of XML parts:
//! - xl/workbook.xml lists the sheets, xl/_rels/workbook.xml.rels maps them to parts
//! - xl/sharedStrings.xml holds the string table referenced by `t="s"` cells
//! - xl/worksheets/sheetN.xml holds `<row>`/`<c>` elements
//!
//! Only the first sheet is read, and its first row is taken as the header.

use regex::Regex;
use std::io::{Cursor, Read, Seek, Write};
use std::sync::LazyLock;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::text::clean_text;

/// Last column a workbook may address (`XFD`).
const MAX_COLUMN: usize = 16_383;

/// Ceiling on any single decompressed workbook part.
const MAX_PART_BYTES: u64 = 64 * 1024 * 1024;

static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([\w:.-]+)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap());

static EMPTY: Cell = Cell::Empty;

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    /// Display form. Whole numbers render without a fractional part so that
    /// numeric stock and report numbers read back as typed.
    pub fn as_text(&self) -> String {
        match self {
            Cell::Empty => String::new(),
            Cell::Text(s) => s.clone(),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            Cell::Number(n) => n.to_string(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Cell::Empty => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => clean_text(s).is_empty(),
            Cell::Number(_) => false,
        }
    }
}

impl From<&str> for Cell {
    fn from(value: &str) -> Self {
        Cell::Text(value.to_string())
    }
}

impl From<String> for Cell {
    fn from(value: String) -> Self {
        Cell::Text(value)
    }
}

impl From<f64> for Cell {
    fn from(value: f64) -> Self {
        Cell::Number(value)
    }
}

impl From<usize> for Cell {
    fn from(value: usize) -> Self {
        Cell::Number(value as f64)
    }
}

/// A named table: one header row plus data rows.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    pub name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: &str, headers: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn push_row(&mut self, row: Vec<Cell>) {
        self.rows.push(row);
    }

    /// Index of a header, matched after trimming.
    pub fn column(&self, header: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == header)
    }

    /// Cell at (row, col); missing trailing cells read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        self.rows.get(row).and_then(|r| r.get(col)).unwrap_or(&EMPTY)
    }
}

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SheetFormat {
    Xlsx,
    Csv,
}

impl SheetFormat {
    pub fn from_file_name(name: &str) -> Result<Self, String> {
        let lower = name.to_lowercase();
        if lower.ends_with(".xlsx") {
            Ok(SheetFormat::Xlsx)
        } else if lower.ends_with(".csv") {
            Ok(SheetFormat::Csv)
        } else if lower.ends_with(".xls") {
            Err("Legacy .xls files are not supported. Please save the file as .xlsx and upload again.".to_string())
        } else {
            Err("Please upload an Excel (.xlsx) or CSV file.".to_string())
        }
    }
}

/// Read the first sheet of an upload.
pub fn read_sheet(data: &[u8], format: SheetFormat) -> Result<Sheet, String> {
    match format {
        SheetFormat::Xlsx => read_xlsx(data),
        SheetFormat::Csv => read_csv(data),
    }
}

pub fn read_csv(data: &[u8]) -> Result<Sheet, String> {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF][..]).unwrap_or(data);
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(data);

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| format!("Invalid CSV header: {e}"))?
        .iter()
        .map(clean_text)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| format!("Invalid CSV row: {e}"))?;
        let row: Vec<Cell> = record
            .iter()
            .map(|v| if v.trim().is_empty() { Cell::Empty } else { Cell::Text(v.to_string()) })
            .collect();
        if row.iter().any(|c| !c.is_blank()) {
            rows.push(row);
        }
    }

    Ok(Sheet { name: "Sheet1".to_string(), headers, rows })
}

pub fn read_xlsx(data: &[u8]) -> Result<Sheet, String> {
    let mut archive = ZipArchive::new(Cursor::new(data))
        .map_err(|e| format!("Invalid XLSX (not a valid ZIP): {e}"))?;

    let (name, sheet_path) = first_sheet(&mut archive)?;
    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml")? {
        Some(xml) => parse_shared_strings(&xml),
        None => Vec::new(),
    };
    let sheet_xml = read_entry(&mut archive, &sheet_path)?
        .ok_or_else(|| format!("Invalid XLSX: missing {sheet_path}"))?;

    let mut rows = parse_worksheet(&sheet_xml, &shared)?.into_iter();
    let headers: Vec<String> = rows
        .next()
        .ok_or("The spreadsheet is empty")?
        .iter()
        .map(|c| clean_text(&c.as_text()))
        .collect();
    let rows = rows.filter(|row| row.iter().any(|c| !c.is_blank())).collect();

    Ok(Sheet { name, headers, rows })
}

fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<String>, String> {
    read_entry_capped(archive, name, MAX_PART_BYTES)
}

fn read_entry_capped<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
    limit: u64,
) -> Result<Option<String>, String> {
    let file = match archive.by_name(name) {
        Ok(file) => file,
        Err(_) => return Ok(None),
    };
    if file.size() > limit {
        return Err(format!("Invalid XLSX: {name} is too large"));
    }
    let mut content = String::new();
    file.take(limit + 1)
        .read_to_string(&mut content)
        .map_err(|e| format!("Failed to read {name}: {e}"))?;
    if content.len() as u64 > limit {
        return Err(format!("Invalid XLSX: {name} is too large"));
    }
    Ok(Some(content))
}

/// Resolve the first sheet's name and part path through the workbook relationships.
fn first_sheet<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<(String, String), String> {
    const FALLBACK: &str = "xl/worksheets/sheet1.xml";

    let Some(workbook) = read_entry(archive, "xl/workbook.xml")? else {
        return Ok(("Sheet1".to_string(), FALLBACK.to_string()));
    };
    let sheet = tokenize(&workbook).into_iter().find_map(|event| match event {
        XmlEvent::Open { name, attrs, .. } if name == "sheet" => Some(attrs),
        _ => None,
    });
    let Some(attrs) = sheet else {
        return Err("Invalid XLSX: workbook has no sheets".to_string());
    };
    let sheet_name = attr(&attrs, "name").unwrap_or("Sheet1").to_string();
    let Some(rel_id) = attr(&attrs, "id") else {
        return Ok((sheet_name, FALLBACK.to_string()));
    };

    let target = read_entry(archive, "xl/_rels/workbook.xml.rels")?.and_then(|rels| {
        tokenize(&rels).into_iter().find_map(|event| match event {
            XmlEvent::Open { name, attrs, .. }
                if name == "Relationship" && attr(&attrs, "Id") == Some(rel_id) =>
            {
                attr(&attrs, "Target").map(str::to_string)
            }
            _ => None,
        })
    });

    let path = match target {
        Some(t) if t.starts_with('/') => t.trim_start_matches('/').to_string(),
        Some(t) => format!("xl/{t}"),
        None => FALLBACK.to_string(),
    };
    Ok((sheet_name, path))
}

fn parse_shared_strings(xml: &str) -> Vec<String> {
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_text = false;
    let mut in_phonetic = false;

    for event in tokenize(xml) {
        match event {
            XmlEvent::Open { name, self_closing, .. } => match name.as_str() {
                "si" if self_closing => strings.push(String::new()),
                "si" => current = Some(String::new()),
                "rPh" => in_phonetic = !self_closing,
                "t" => in_text = !self_closing,
                _ => {}
            },
            XmlEvent::Close(name) => match name.as_str() {
                "si" => {
                    if let Some(s) = current.take() {
                        strings.push(s);
                    }
                }
                "rPh" => in_phonetic = false,
                "t" => in_text = false,
                _ => {}
            },
            XmlEvent::Text(text) => {
                if in_text
                    && !in_phonetic
                    && let Some(ref mut s) = current
                {
                    s.push_str(&text);
                }
            }
        }
    }

    strings
}

fn parse_worksheet(xml: &str, shared: &[String]) -> Result<Vec<Vec<Cell>>, String> {
    let mut rows = Vec::new();
    let mut row: Option<Vec<Cell>> = None;
    let mut col = 0usize;
    let mut kind = String::new();
    let mut value = String::new();
    let mut in_cell = false;
    let mut in_value = false;

    for event in tokenize(xml) {
        match event {
            XmlEvent::Open { name, attrs, self_closing } => match name.as_str() {
                "row" if self_closing => rows.push(Vec::new()),
                "row" => row = Some(Vec::new()),
                "c" => {
                    let current_len = row.as_ref().map_or(0, Vec::len);
                    col = match attr(&attrs, "r") {
                        Some(reference) => column_index(reference)?.unwrap_or(current_len),
                        None => current_len,
                    };
                    if col > MAX_COLUMN {
                        return Err("Invalid XLSX: too many columns".to_string());
                    }
                    kind = attr(&attrs, "t").unwrap_or("n").to_string();
                    value.clear();
                    in_cell = !self_closing;
                }
                "v" | "t" if in_cell => in_value = !self_closing,
                _ => {}
            },
            XmlEvent::Close(name) => match name.as_str() {
                "row" => {
                    if let Some(r) = row.take() {
                        rows.push(r);
                    }
                }
                "c" if in_cell => {
                    in_cell = false;
                    let cell = decode_cell(&kind, &value, shared);
                    if let Some(ref mut r) = row {
                        if r.len() <= col {
                            r.resize(col + 1, Cell::Empty);
                        }
                        r[col] = cell;
                    }
                }
                "v" | "t" => in_value = false,
                _ => {}
            },
            XmlEvent::Text(text) => {
                if in_cell && in_value {
                    value.push_str(&text);
                }
            }
        }
    }

    Ok(rows)
}

fn decode_cell(kind: &str, value: &str, shared: &[String]) -> Cell {
    match kind {
        "s" => value
            .trim()
            .parse::<usize>()
            .ok()
            .and_then(|i| shared.get(i))
            .map(|s| Cell::Text(s.clone()))
            .unwrap_or(Cell::Empty),
        "inlineStr" | "str" => {
            if value.is_empty() {
                Cell::Empty
            } else {
                Cell::Text(value.to_string())
            }
        }
        "b" => Cell::Text(if value.trim() == "1" { "TRUE" } else { "FALSE" }.to_string()),
        "e" => Cell::Empty,
        _ => match value.trim() {
            "" => Cell::Empty,
            v => v.parse::<f64>().map(Cell::Number).unwrap_or_else(|_| Cell::Text(v.to_string())),
        },
    }
}

/// `"AB12"` -> 27. References without letters yield `None`.
fn column_index(reference: &str) -> Result<Option<usize>, String> {
    let out_of_range = || format!("Invalid XLSX: cell reference {reference} is out of range");
    let mut n = 0usize;
    for c in reference.chars().take_while(|c| c.is_ascii_alphabetic()) {
        let digit = c.to_ascii_uppercase() as usize - 'A' as usize + 1;
        n = n
            .checked_mul(26)
            .and_then(|n| n.checked_add(digit))
            .filter(|&n| n <= MAX_COLUMN + 1)
            .ok_or_else(out_of_range)?;
    }
    Ok(n.checked_sub(1))
}

/// 27 -> `"AB"`
fn column_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push((b'A' + (index % 26) as u8) as char);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.iter().rev().collect()
}

#[derive(Debug, PartialEq)]
enum XmlEvent {
    Open { name: String, attrs: Vec<(String, String)>, self_closing: bool },
    Close(String),
    Text(String),
}

/// Flat tag/text tokenizer. Namespace prefixes are stripped from tag and
/// attribute names; declarations and comments are skipped.
fn tokenize(xml: &str) -> Vec<XmlEvent> {
    let mut events = Vec::new();
    let mut rest = xml;

    while !rest.is_empty() {
        match rest.find('<') {
            Some(0) => {
                let Some(end) = rest.find('>') else {
                    break;
                };
                let tag = &rest[1..end];
                rest = &rest[end + 1..];

                if tag.starts_with('?') || tag.starts_with('!') {
                    continue;
                }
                if let Some(name) = tag.strip_prefix('/') {
                    events.push(XmlEvent::Close(local_name(name.trim()).to_string()));
                    continue;
                }
                let self_closing = tag.ends_with('/');
                let body = tag.trim_end_matches('/');
                let (name, attr_src) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
                let attrs = ATTRIBUTE
                    .captures_iter(attr_src)
                    .map(|cap| {
                        let key = local_name(&cap[1]).to_string();
                        let raw = cap.get(2).or_else(|| cap.get(3)).map_or("", |m| m.as_str());
                        (key, decode_entities(raw))
                    })
                    .collect();
                events.push(XmlEvent::Open {
                    name: local_name(name).to_string(),
                    attrs,
                    self_closing,
                });
            }
            Some(i) => {
                events.push(XmlEvent::Text(decode_entities(&rest[..i])));
                rest = &rest[i..];
            }
            None => {
                events.push(XmlEvent::Text(decode_entities(rest)));
                break;
            }
        }
    }

    events
}

fn local_name(name: &str) -> &str {
    name.rsplit_once(':').map_or(name, |(_, local)| local)
}

fn attr<'a>(attrs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '&' {
            result.push(c);
            continue;
        }
        let mut entity = String::new();
        let mut terminated = false;
        while let Some(&next) = chars.peek() {
            chars.next();
            if next == ';' {
                terminated = true;
                break;
            }
            entity.push(next);
            if entity.len() > 10 {
                break;
            }
        }
        let decoded = match entity.as_str() {
            "lt" => Some('<'),
            "gt" => Some('>'),
            "amp" => Some('&'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            e if e.starts_with("#x") || e.starts_with("#X") => {
                u32::from_str_radix(&e[2..], 16).ok().and_then(char::from_u32)
            }
            e if e.starts_with('#') => e[1..].parse::<u32>().ok().and_then(char::from_u32),
            _ => None,
        };
        match decoded {
            Some(ch) if terminated => result.push(ch),
            _ => {
                // Unknown entity, include as-is
                result.push('&');
                result.push_str(&entity);
                if terminated {
                    result.push(';');
                }
            }
        }
    }
    result
}

fn escape_xml(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c if (c as u32) < 0x20 && c != '\t' && c != '\n' && c != '\r' => {}
            c => escaped.push(c),
        }
    }
    escaped
}

/// Write sheets into a new workbook. Text cells are stored inline.
pub fn write_xlsx(sheets: &[Sheet]) -> Result<Vec<u8>, String> {
    if sheets.is_empty() {
        return Err("A workbook needs at least one sheet".to_string());
    }

    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut content_types = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    );
    let mut workbook = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    let mut workbook_rels = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );

    for (i, sheet) in sheets.iter().enumerate() {
        let n = i + 1;
        let name: String = sheet.name.chars().take(31).collect();
        content_types.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{n}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
        workbook.push_str(&format!(
            r#"<sheet name="{}" sheetId="{n}" r:id="rId{n}"/>"#,
            escape_xml(&name)
        ));
        workbook_rels.push_str(&format!(
            r#"<Relationship Id="rId{n}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{n}.xml"/>"#
        ));
    }
    content_types.push_str("</Types>");
    workbook.push_str("</sheets></workbook>");
    workbook_rels.push_str("</Relationships>");

    add_part(&mut zip, options, "[Content_Types].xml", &content_types)?;
    add_part(
        &mut zip,
        options,
        "_rels/.rels",
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#,
    )?;
    add_part(&mut zip, options, "xl/workbook.xml", &workbook)?;
    add_part(&mut zip, options, "xl/_rels/workbook.xml.rels", &workbook_rels)?;
    for (i, sheet) in sheets.iter().enumerate() {
        add_part(&mut zip, options, &format!("xl/worksheets/sheet{}.xml", i + 1), &worksheet_xml(sheet))?;
    }

    let cursor = zip.finish().map_err(|e| format!("Failed to finish workbook: {e}"))?;
    Ok(cursor.into_inner())
}

fn add_part<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    options: SimpleFileOptions,
    name: &str,
    content: &str,
) -> Result<(), String> {
    zip.start_file(name, options)
        .map_err(|e| format!("Failed to add {name}: {e}"))?;
    zip.write_all(content.as_bytes())
        .map_err(|e| format!("Failed to write {name}: {e}"))
}

fn worksheet_xml(sheet: &Sheet) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?><worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );

    let header: Vec<Cell> = sheet.headers.iter().map(|h| Cell::Text(h.clone())).collect();
    for (r, row) in std::iter::once(&header).chain(sheet.rows.iter()).enumerate() {
        let row_number = r + 1;
        xml.push_str(&format!(r#"<row r="{row_number}">"#));
        for (c, cell) in row.iter().enumerate() {
            let reference = format!("{}{row_number}", column_letter(c));
            match cell {
                Cell::Text(s) if !s.is_empty() => xml.push_str(&format!(
                    r#"<c r="{reference}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                    escape_xml(s)
                )),
                Cell::Number(n) if n.is_finite() => {
                    xml.push_str(&format!(r#"<c r="{reference}"><v>{n}</v></c>"#))
                }
                _ => {}
            }
        }
        xml.push_str("</row>");
    }

    xml.push_str("</sheetData></worksheet>");
    xml
}
