//! Spreadsheet parsing for CSV and Excel (.xlsx/.xls) uploads.
//!
//! Produces a positional grid first (used as-is by the farm-coordinate parser),
//! then keyed [`RawRow`]s for the beneficiary cleansing pipeline.

use anyhow::{Context, Result};
use calamine::{open_workbook_from_rs, Data, Reader, Xls, Xlsx};
use std::io::{Cursor, Read, Seek};

/// Accepted upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpreadsheetKind {
    Xlsx,
    Xls,
    Csv,
}

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const XLS_MIME: &str = "application/vnd.ms-excel";

impl SpreadsheetKind {
    /// Decide the format from the declared MIME type, falling back to the extension.
    pub fn detect(filename: &str, content_type: Option<&str>) -> Option<Self> {
        let by_mime = match content_type.map(|c| c.trim().to_lowercase()) {
            Some(ref c) if c == XLSX_MIME => Some(Self::Xlsx),
            Some(ref c) if c == XLS_MIME => Some(Self::Xls),
            Some(ref c) if c == "text/csv" || c == "application/csv" => Some(Self::Csv),
            _ => None,
        };

        by_mime.or_else(|| {
            let (stem, ext) = filename.rsplit_once('.')?;
            if stem.is_empty() {
                return None;
            }
            match ext.to_lowercase().as_str() {
                "xlsx" => Some(Self::Xlsx),
                "xls" => Some(Self::Xls),
                "csv" => Some(Self::Csv),
                _ => None,
            }
        })
    }
}

/// A single spreadsheet cell, reduced to what the cleansers care about.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    /// Trimmed textual form; `None` for empty or whitespace-only cells.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Text(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    None
                } else {
                    Some(trimmed.to_string())
                }
            }
            Cell::Number(n) => Some(format_number(*n)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_text().is_none()
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<f64> for Cell {
    fn from(n: f64) -> Self {
        Cell::Number(n)
    }
}

/// Positional sheet contents. `rows[i]` is file row `i + 1`.
#[derive(Debug, Clone)]
pub struct RawSheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl RawSheet {
    /// Every cell as a string (empty cells become `""`).
    pub fn to_string_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|c| c.as_text().unwrap_or_default()).collect())
            .collect()
    }
}

/// One data row keyed by header. Keys keep sheet column order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: Vec<(String, Cell)>,
}

static EMPTY_CELL: Cell = Cell::Empty;

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, cell: impl Into<Cell>) -> Self {
        self.push(key, cell.into());
        self
    }

    pub fn push(&mut self, key: &str, cell: Cell) {
        self.cells.push((key.to_string(), cell));
    }

    /// Case- and whitespace-insensitive lookup. Missing keys read as empty.
    pub fn get(&self, key: &str) -> &Cell {
        let wanted = normalize_key(key);
        self.cells
            .iter()
            .find(|(k, _)| normalize_key(k) == wanted)
            .map(|(_, c)| c)
            .unwrap_or(&EMPTY_CELL)
    }

    /// First non-empty cell among the candidate column names, in candidate order.
    pub fn first_of<S: AsRef<str>>(&self, keys: &[S]) -> Option<&Cell> {
        keys.iter().map(|k| self.get(k.as_ref())).find(|c| !c.is_empty())
    }

    /// True when any of the candidate columns exists in this row (even if empty).
    pub fn has_any_column<S: AsRef<str>>(&self, keys: &[S]) -> bool {
        keys.iter().any(|k| {
            let wanted = normalize_key(k.as_ref());
            self.cells.iter().any(|(existing, _)| normalize_key(existing) == wanted)
        })
    }

    pub fn is_blank(&self) -> bool {
        self.cells.iter().all(|(_, c)| c.is_empty())
    }
}

fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Read the first sheet that has any content.
pub fn read_sheet(kind: SpreadsheetKind, data: &[u8]) -> Result<RawSheet> {
    let sheet = match kind {
        SpreadsheetKind::Csv => parse_csv(data)?,
        SpreadsheetKind::Xlsx => {
            let workbook: Xlsx<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open Excel workbook")?;
            first_sheet_with_data(workbook)?
        }
        SpreadsheetKind::Xls => {
            let workbook: Xls<_> = open_workbook_from_rs(Cursor::new(data))
                .context("Failed to open legacy Excel workbook")?;
            first_sheet_with_data(workbook)?
        }
    };

    tracing::debug!("Read sheet '{}' with {} rows", sheet.name, sheet.rows.len());
    Ok(sheet)
}

/// Key the grid by its header row.
///
/// `header_offset` is the 1-based file row of the first data row; the header
/// sits directly above it. Blank rows inside the data are kept so that data
/// index `N` always maps to file row `N + header_offset`.
pub fn keyed_rows(sheet: &RawSheet, header_offset: usize) -> Result<Vec<RawRow>> {
    let header_offset = header_offset.max(2);
    let header_idx = header_offset - 2;

    let header_row = sheet
        .rows
        .get(header_idx)
        .context("Sheet has no header row at the expected position")?;
    let headers = header_keys(header_row);

    if headers.iter().all(|h| h.starts_with("__EMPTY")) {
        anyhow::bail!("Sheet header row is blank");
    }

    let mut rows: Vec<RawRow> = sheet.rows[header_idx + 1..]
        .iter()
        .map(|cells| {
            let mut row = RawRow::new();
            for (i, key) in headers.iter().enumerate() {
                row.push(key, cells.get(i).cloned().unwrap_or_default());
            }
            row
        })
        .collect();

    while rows.last().map(|r| r.is_blank()).unwrap_or(false) {
        rows.pop();
    }

    if rows.is_empty() {
        anyhow::bail!("Sheet has no data rows");
    }

    Ok(rows)
}

/// Header cells become keys; blank headers get `__EMPTY_<col>` and repeats get a suffix.
fn header_keys(header_row: &[Cell]) -> Vec<String> {
    let mut keys: Vec<String> = Vec::with_capacity(header_row.len());
    for (i, cell) in header_row.iter().enumerate() {
        let base = match cell.as_text() {
            Some(text) => text.split_whitespace().collect::<Vec<_>>().join(" "),
            None => format!("__EMPTY_{}", i),
        };
        let mut key = base.clone();
        let mut n = 1;
        while keys.iter().any(|k| normalize_key(k) == normalize_key(&key)) {
            key = format!("{}_{}", base, n);
            n += 1;
        }
        keys.push(key);
    }
    keys
}

fn parse_csv(data: &[u8]) -> Result<RawSheet> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .has_headers(false)
        .from_reader(data);

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read CSV record")?;
        let row: Vec<Cell> = record
            .iter()
            .map(|f| {
                let f = f.trim_start_matches('\u{feff}');
                if f.trim().is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(f.to_string())
                }
            })
            .collect();
        rows.push(row);
    }

    if rows.iter().all(|r| r.iter().all(|c| c.is_empty())) {
        anyhow::bail!("CSV file has no data");
    }

    Ok(RawSheet {
        name: "csv".to_string(),
        rows,
    })
}

fn first_sheet_with_data<RS, R>(mut workbook: R) -> Result<RawSheet>
where
    RS: Read + Seek,
    R: Reader<RS>,
    R::Error: std::fmt::Debug,
{
    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();

    for name in &sheet_names {
        let range = match workbook.worksheet_range(name) {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("Skipping sheet '{}': {:?}", name, e);
                continue;
            }
        };

        if let Some(sheet) = range_to_raw_sheet(name, &range) {
            return Ok(sheet);
        }
    }

    anyhow::bail!("No sheets with data found in workbook")
}

/// Convert a calamine range into an absolute grid (leading rows/columns padded).
fn range_to_raw_sheet(name: &str, range: &calamine::Range<Data>) -> Option<RawSheet> {
    let (start_row, start_col) = range.start()?;

    let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); start_row as usize];
    for row in range.rows() {
        let mut cells = vec![Cell::Empty; start_col as usize];
        cells.extend(row.iter().map(data_to_cell));
        rows.push(cells);
    }

    if rows.iter().all(|r| r.iter().all(|c| c.is_empty())) {
        return None;
    }

    Some(RawSheet {
        name: name.to_string(),
        rows,
    })
}

fn data_to_cell(cell: &Data) -> Cell {
    match cell {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Float(f) => Cell::Number(*f),
        Data::Bool(b) => Cell::Text(b.to_string()),
        // Keep the serial so date cleansing can decode it.
        Data::DateTime(dt) => Cell::Number(dt.as_f64()),
        Data::DateTimeIso(s) => Cell::Text(s.clone()),
        Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(e) => {
            tracing::debug!("Treating error cell as empty: {:?}", e);
            Cell::Empty
        }
    }
}

/// Avoid trailing ".0" for whole numbers.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_mime_and_extension() {
        assert_eq!(
            SpreadsheetKind::detect("upload.bin", Some(XLSX_MIME)),
            Some(SpreadsheetKind::Xlsx)
        );
        assert_eq!(
            SpreadsheetKind::detect("list.XLS", Some("application/octet-stream")),
            Some(SpreadsheetKind::Xls)
        );
        assert_eq!(SpreadsheetKind::detect("list.csv", None), Some(SpreadsheetKind::Csv));
        assert_eq!(SpreadsheetKind::detect("list.pdf", Some("application/pdf")), None);
        assert_eq!(SpreadsheetKind::detect(".csv", None), None);
    }

    #[test]
    fn test_csv_keyed_rows_with_header_offset() {
        let csv_data = b"MASTERLIST\n,\nName,Purok,Received\nJuan Dela Cruz,1,100\n,,\nMaria Santos,,50\n,,\n";
        let sheet = read_sheet(SpreadsheetKind::Csv, csv_data).unwrap();
        let rows = keyed_rows(&sheet, 4).unwrap();

        // Trailing blank row dropped, interior blank row kept.
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].get("name").as_text().as_deref(), Some("Juan Dela Cruz"));
        assert_eq!(rows[0].get("PUROK").as_text().as_deref(), Some("1"));
        assert!(rows[1].is_blank());
        assert_eq!(rows[2].get("Received").as_text().as_deref(), Some("50"));
    }

    #[test]
    fn test_blank_and_duplicate_headers_get_synthetic_keys() {
        let keys = header_keys(&[
            Cell::from("Name"),
            Cell::Empty,
            Cell::from("Name"),
            Cell::from("  Date   Received "),
        ]);
        assert_eq!(keys, vec!["Name", "__EMPTY_1", "Name_1", "Date Received"]);
    }

    #[test]
    fn test_first_of_uses_candidate_order() {
        let row = RawRow::new()
            .with("Sitio", "Mabuhay")
            .with("Purok", Cell::Empty)
            .with("Zone", "3");
        let keys = vec!["Purok".to_string(), "Zone".to_string(), "Sitio".to_string()];
        assert_eq!(row.first_of(&keys).and_then(|c| c.as_text()).as_deref(), Some("3"));
        assert!(row.has_any_column(&["purok"]));
        assert!(!row.has_any_column(&["gender"]));
    }

    #[test]
    fn test_number_cells_render_without_trailing_zero() {
        assert_eq!(Cell::Number(100.0).as_text().as_deref(), Some("100"));
        assert_eq!(Cell::Number(1.25).as_text().as_deref(), Some("1.25"));
        assert_eq!(Cell::Text("   ".into()).as_text(), None);
    }

    #[test]
    fn test_empty_csv_is_error() {
        assert!(read_sheet(SpreadsheetKind::Csv, b",,\n,,\n").is_err());
    }

    #[test]
    fn test_header_only_sheet_is_error() {
        let sheet = read_sheet(SpreadsheetKind::Csv, b"Name,Purok\n").unwrap();
        assert!(keyed_rows(&sheet, 2).is_err());
    }
}
