//! Beneficiary row cleansing: raw sheet rows in, valid rows and row errors out.
//!
//! The scan is a fold over [`ScanState`]; the carried purok lives in that
//! accumulator, so each call starts from a clean slate.

use serde::Serialize;
use tracing::{debug, info};

use crate::cleansers::{
    clean_cellphone, clean_date, clean_gender, clean_number, clean_purok, clean_quantity,
    clean_string, parse_date_range, title_case, DateRange, NameParser,
};
use crate::config::ImportTemplate;
use crate::import_schema::{CleansedBeneficiaryRow, RowError};
use crate::merged_cells::MergedCell;
use crate::sheet_parser::{Cell, RawRow};

const GENDER_COLUMNS: &[&str] = &["Gender", "Sex", "gender"];
const MARITAL_STATUS_COLUMNS: &[&str] = &["Civil Status", "Marital Status", "maritalStatus"];
const BIRTH_DATE_COLUMNS: &[&str] = &["Birthdate", "Birth Date", "Date of Birth", "birthDate"];
const AGE_COLUMNS: &[&str] = &["Age", "age"];
const CELLPHONE_COLUMNS: &[&str] = &[
    "Cellphone",
    "Cellphone No.",
    "Cellphone Number",
    "Contact No.",
    "Contact Number",
    "Mobile No.",
];
const BARANGAY_COLUMNS: &[&str] = &["Barangay", "Brgy", "Brgy."];
const MUNICIPALITY_COLUMNS: &[&str] = &["Municipality", "Municipality/City", "City"];
const PROVINCE_COLUMNS: &[&str] = &["Province"];
const RECEIVED_COLUMNS: &[&str] = &[
    "No. of Seedlings Received",
    "Seedlings Received",
    "Qty Received",
    "Received",
];
const PLANTED_COLUMNS: &[&str] = &[
    "No. of Seedlings Planted",
    "Seedlings Planted",
    "Qty Planted",
    "Planted",
];
const HECTARES_COLUMNS: &[&str] = &["Area (ha)", "Area (Has.)", "Hectares", "Hectarage", "Area"];
const PLANTING_DATE_COLUMNS: &[&str] = &["Date of Planting", "Planting Date", "Date Planted"];
const PLANTING_START_COLUMNS: &[&str] = &["plantingStartDate", "Planting Start Date"];
const PLANTING_END_COLUMNS: &[&str] = &["plantingEndDate", "Planting End Date"];
const DATE_RECEIVED_COLUMNS: &[&str] = &["Date Received", "Date of Distribution", "dateReceived"];

/// Result of one cleansing pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanseOutcome {
    pub cleaned_data: Vec<CleansedBeneficiaryRow>,
    pub errors: Vec<RowError>,
    /// Footer, blank, and previously-flagged rows that were passed over.
    pub skipped_rows: usize,
}

impl CleanseOutcome {
    pub fn total_rows(&self) -> usize {
        self.cleaned_data.len() + self.errors.len()
    }
}

/// Accumulator threaded through the fold.
#[derive(Debug, Default)]
struct ScanState {
    purok: MergedCell,
    outcome: CleanseOutcome,
}

/// Cleanse parsed rows in file order.
pub fn cleanse_data(
    rows: &[RawRow],
    template: &ImportTemplate,
    names: &dyn NameParser,
) -> CleanseOutcome {
    let state = rows
        .iter()
        .enumerate()
        .fold(ScanState::default(), |state, (idx, row)| {
            step(state, idx + template.header_offset, row, template, names)
        });

    let outcome = state.outcome;
    info!(
        "Cleansed {} rows: {} valid, {} invalid, {} skipped",
        rows.len(),
        outcome.cleaned_data.len(),
        outcome.errors.len(),
        outcome.skipped_rows
    );
    outcome
}

fn step(
    mut state: ScanState,
    row_number: usize,
    row: &RawRow,
    template: &ImportTemplate,
    names: &dyn NameParser,
) -> ScanState {
    let pre_split = row.has_any_column(&template.first_name_columns)
        && row.has_any_column(&template.last_name_columns);

    let raw_name = if pre_split {
        [
            &template.first_name_columns,
            &template.middle_name_columns,
            &template.last_name_columns,
        ]
        .into_iter()
        .filter_map(|cols| row.first_of(cols).and_then(Cell::as_text))
        .collect::<Vec<_>>()
        .join(" ")
    } else {
        row.first_of(&template.name_columns)
            .and_then(Cell::as_text)
            .unwrap_or_default()
    };

    if raw_name.trim().is_empty() || is_summary_row(&raw_name, &template.summary_keywords) {
        state.outcome.skipped_rows += 1;
        return state;
    }

    let own_purok = row
        .first_of(&template.purok_columns)
        .and_then(Cell::as_text)
        .and_then(|p| clean_purok(&p));
    let purok = state.purok.carry(own_purok);

    let status = row.first_of(&template.status_columns).and_then(Cell::as_text);
    if status.map(|s| s.to_uppercase().starts_with("ERROR")).unwrap_or(false) {
        debug!("Row {}: skipping row flagged by an earlier pass", row_number);
        state.outcome.skipped_rows += 1;
        return state;
    }

    let (first_name, middle_name, last_name) = if pre_split {
        (
            text(row, &template.first_name_columns),
            text(row, &template.middle_name_columns),
            text(row, &template.last_name_columns),
        )
    } else {
        let parsed = names.parse(&raw_name);
        (parsed.first_name, parsed.middle_name, parsed.last_name)
    };

    let planting = planting_window(row);

    let age = row
        .first_of(AGE_COLUMNS)
        .and_then(clean_number)
        .filter(|a| (0.0..=130.0).contains(a))
        .map(|a| a.round() as u32);

    let cleansed = CleansedBeneficiaryRow {
        row: row_number,
        first_name: first_name.unwrap_or_default(),
        middle_name,
        last_name: last_name.unwrap_or_default(),
        purok: purok.unwrap_or_default(),
        gender: row.first_of(GENDER_COLUMNS).and_then(clean_gender),
        marital_status: text(row, MARITAL_STATUS_COLUMNS).map(|s| title_case(&s)),
        birth_date: row.first_of(BIRTH_DATE_COLUMNS).and_then(clean_date),
        age,
        cellphone: row.first_of(CELLPHONE_COLUMNS).and_then(clean_cellphone),
        barangay: text(row, BARANGAY_COLUMNS).map(|s| title_case(&s)),
        municipality: text(row, MUNICIPALITY_COLUMNS).map(|s| title_case(&s)),
        province: text(row, PROVINCE_COLUMNS).map(|s| title_case(&s)),
        received: row.first_of(RECEIVED_COLUMNS).and_then(clean_quantity),
        planted: row.first_of(PLANTED_COLUMNS).and_then(clean_quantity),
        hectares: row.first_of(HECTARES_COLUMNS).and_then(clean_number),
        planting_start_date: planting.start_date,
        planting_end_date: planting.end_date,
        date_received: row.first_of(DATE_RECEIVED_COLUMNS).and_then(clean_date),
    };

    let errors = cleansed.validation_errors();
    if errors.is_empty() {
        state.outcome.cleaned_data.push(cleansed);
    } else {
        let display = cleansed.display_name();
        debug!("Row {}: {} validation error(s)", row_number, errors.len());
        state.outcome.errors.push(RowError {
            row: row_number,
            name: if display.is_empty() { raw_name } else { display },
            errors,
        });
    }

    state
}

fn text<S: AsRef<str>>(row: &RawRow, columns: &[S]) -> Option<String> {
    row.first_of(columns).and_then(clean_string)
}

/// Already-split start/end columns win over a free-text planting date.
fn planting_window(row: &RawRow) -> DateRange {
    let start = row.first_of(PLANTING_START_COLUMNS).and_then(clean_date);
    let end = row.first_of(PLANTING_END_COLUMNS).and_then(clean_date);
    if start.is_some() || end.is_some() {
        return DateRange {
            start_date: start.clone().or_else(|| end.clone()),
            end_date: end.or(start),
        };
    }

    match row.first_of(PLANTING_DATE_COLUMNS) {
        // A real date cell holds a serial, not "Jan 19-25".
        Some(cell) if matches!(cell, Cell::Number(_)) => {
            let day = clean_date(cell);
            DateRange {
                start_date: day.clone(),
                end_date: day,
            }
        }
        Some(cell) => cell
            .as_text()
            .map(|raw| parse_date_range(&raw))
            .unwrap_or_default(),
        None => DateRange::default(),
    }
}

/// Given names that happen to contain a summary keyword.
const SUMMARY_KEYWORD_EXCEPTIONS: &[&str] = &["bless", "blessie", "blessy", "blessa", "blessed"];

/// Footer/subtotal rows ("TOTAL", "SUBTOTAL", "Seedlings distributed", "Less: …").
///
/// Any word containing a keyword marks the row, except known given names.
fn is_summary_row(name: &str, keywords: &[String]) -> bool {
    let lower = name.to_lowercase();
    lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty() && !SUMMARY_KEYWORD_EXCEPTIONS.contains(word))
        .any(|word| keywords.iter().any(|kw| word.contains(kw.to_lowercase().as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleansers::TokenCountNameParser;
    use crate::config::{draft_template, masterlist_template};
    use crate::import_schema::{ERR_LAST_NAME, ERR_PLANTED_EXCEEDS, ERR_PUROK};

    fn farmer(name: &str, purok: &str) -> RawRow {
        RawRow::new()
            .with("Purok", if purok.is_empty() { Cell::Empty } else { Cell::from(purok) })
            .with("Name of Beneficiary", name)
    }

    fn run(rows: &[RawRow]) -> CleanseOutcome {
        cleanse_data(rows, &masterlist_template(), &TokenCountNameParser)
    }

    #[test]
    fn test_ten_rows_one_missing_last_name() {
        let names = [
            "Juan Cruz",
            "Pedro Santos",
            "Ana Reyes",
            "Jose Rizal",
            "Imelda",
            "Maria Clara",
            "Andres Bonifacio",
            "Emilio Aguinaldo",
            "Gabriela Silang",
            "Apolinario Mabini",
        ];
        let rows: Vec<RawRow> = names
            .iter()
            .enumerate()
            .map(|(i, n)| farmer(n, if i == 0 { "1" } else { "" }))
            .collect();

        let outcome = run(&rows);
        assert_eq!(outcome.cleaned_data.len(), 9);
        assert_eq!(outcome.errors.len(), 1);

        let error = &outcome.errors[0];
        // Fifth data row (index 4) with header_offset 4.
        assert_eq!(error.row, 8);
        assert_eq!(error.name, "Imelda");
        assert_eq!(error.errors, vec![ERR_LAST_NAME.to_string()]);
    }

    #[test]
    fn test_merged_purok_carries_forward() {
        let rows = vec![
            farmer("Juan Cruz", "1"),
            farmer("Pedro Santos", ""),
            farmer("Ana Reyes", "sitio mabuhay"),
            farmer("Jose Rizal", ""),
        ];
        let outcome = run(&rows);
        let puroks: Vec<&str> = outcome.cleaned_data.iter().map(|r| r.purok.as_str()).collect();
        assert_eq!(puroks, vec!["Purok 1", "Purok 1", "Sitio Mabuhay", "Sitio Mabuhay"]);
    }

    #[test]
    fn test_planted_exceeds_received() {
        let rows = vec![farmer("Juan Cruz", "2")
            .with("Received", 100.0)
            .with("Planted", 150.0)];
        let outcome = run(&rows);
        assert!(outcome.cleaned_data.is_empty());
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].errors[0].contains(ERR_PLANTED_EXCEEDS));
    }

    #[test]
    fn test_missing_purok_and_last_name_single_entry() {
        let rows = vec![farmer("Imelda", "")];
        let outcome = run(&rows);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(
            outcome.errors[0].errors,
            vec![ERR_LAST_NAME.to_string(), ERR_PUROK.to_string()]
        );
    }

    #[test]
    fn test_summary_and_blank_rows_skipped() {
        let rows = vec![
            farmer("Juan Cruz", "1"),
            farmer("TOTAL", ""),
            farmer("Less: replanted seedlings", ""),
            farmer("", ""),
            farmer("Bless Dalisay", ""),
            farmer("SUBTOTAL", ""),
        ];
        let outcome = run(&rows);
        assert_eq!(outcome.skipped_rows, 4);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.cleaned_data.len(), 2);
        assert_eq!(outcome.cleaned_data[1].first_name, "Bless");
        assert_eq!(outcome.cleaned_data[1].row, 8);
    }

    #[test]
    fn test_error_flagged_rows_skipped_but_update_purok() {
        let rows = vec![
            farmer("Juan Cruz", "4").with("Status", "ERROR: Last name is required"),
            farmer("Ana Reyes", ""),
        ];
        let outcome = run(&rows);
        assert_eq!(outcome.skipped_rows, 1);
        assert_eq!(outcome.cleaned_data.len(), 1);
        assert_eq!(outcome.cleaned_data[0].purok, "Purok 4");
    }

    #[test]
    fn test_field_normalization() {
        let rows = vec![farmer("Maria Luisa Reyes Dela Cruz", "purok 7")
            .with("Gender", "F")
            .with("Birthdate", 45676.0)
            .with("Cellphone No.", 9171234567.0)
            .with("No. of Seedlings Received", "500 + 500")
            .with("Planted", "800 pcs")
            .with("Area (ha)", "1.5 ha")
            .with("Date of Planting", "Jan 19-25, 2025")
            .with("Barangay", "SAN ISIDRO")];
        let outcome = run(&rows);
        assert!(outcome.errors.is_empty());

        let row = &outcome.cleaned_data[0];
        assert_eq!(row.first_name, "Maria Luisa");
        assert_eq!(row.middle_name.as_deref(), Some("Reyes Dela"));
        assert_eq!(row.last_name, "Cruz");
        assert_eq!(row.purok, "Purok 7");
        assert_eq!(row.gender.as_deref(), Some("Female"));
        assert_eq!(row.birth_date.as_deref(), Some("2025-01-19"));
        assert_eq!(row.cellphone.as_deref(), Some("09171234567"));
        assert_eq!(row.received, Some(1000.0));
        assert_eq!(row.planted, Some(800.0));
        assert_eq!(row.hectares, Some(1.5));
        assert_eq!(row.planting_start_date.as_deref(), Some("2025-01-19"));
        assert_eq!(row.planting_end_date.as_deref(), Some("2025-01-25"));
        assert_eq!(row.barangay.as_deref(), Some("San Isidro"));
    }

    #[test]
    fn test_pre_split_draft_reimport() {
        let rows = vec![RawRow::new()
            .with("First Name", "Maria Luisa")
            .with("Middle Name", "Reyes")
            .with("Last Name", "Dela Cruz")
            .with("Purok", "Purok 3")
            .with("plantingStartDate", "2025-01-19")
            .with("plantingEndDate", "2025-01-25")];
        let outcome = cleanse_data(&rows, &draft_template(), &TokenCountNameParser);

        let row = &outcome.cleaned_data[0];
        assert_eq!(row.row, 2);
        assert_eq!(row.first_name, "Maria Luisa");
        assert_eq!(row.last_name, "Dela Cruz");
        assert_eq!(row.planting_end_date.as_deref(), Some("2025-01-25"));
    }

    #[test]
    fn test_is_summary_row_contains_keyword() {
        let keywords = vec!["total".to_string(), "seedling".to_string(), "less".to_string()];
        assert!(is_summary_row("GRAND TOTAL", &keywords));
        assert!(is_summary_row("SUBTOTAL", &keywords));
        assert!(is_summary_row("Grandtotal", &keywords));
        assert!(is_summary_row("Seedlings distributed", &keywords));
        assert!(is_summary_row("less mortality", &keywords));
        assert!(!is_summary_row("Bless Dalisay", &keywords));
        assert!(!is_summary_row("Juan Cruz", &keywords));
    }
}
