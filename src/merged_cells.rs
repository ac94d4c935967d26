//! Carry-forward for merged spreadsheet cells.
//!
//! A merged "Purok" cell spanning several rows only holds data in its first
//! row; every following row of the span reads as empty.

use crate::sheet_parser::RawRow;

/// Last non-empty value seen in one column during a single pass.
#[derive(Debug, Clone, Default)]
pub struct MergedCell {
    last_seen: Option<String>,
}

impl MergedCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-empty input replaces the carried value; empty input reuses it.
    pub fn carry(&mut self, value: Option<String>) -> Option<String> {
        match value.filter(|v| !v.trim().is_empty()) {
            Some(v) => {
                self.last_seen = Some(v.clone());
                Some(v)
            }
            None => self.last_seen.clone(),
        }
    }
}

/// Fill a column downward in file order.
#[allow(dead_code)]
pub fn propagate_column_down(rows: &[RawRow], column: &str) -> Vec<Option<String>> {
    let mut merged = MergedCell::new();
    rows.iter()
        .map(|row| merged.carry(row.get(column).as_text()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sheet_parser::Cell;

    #[test]
    fn test_propagate_column_down() {
        let rows = vec![
            RawRow::new().with("purok", "Purok 1"),
            RawRow::new().with("purok", Cell::Empty),
            RawRow::new().with("purok", Cell::Empty),
            RawRow::new().with("purok", "Purok 2"),
        ];
        let filled = propagate_column_down(&rows, "purok");
        assert_eq!(
            filled,
            vec![
                Some("Purok 1".to_string()),
                Some("Purok 1".to_string()),
                Some("Purok 1".to_string()),
                Some("Purok 2".to_string()),
            ]
        );
    }

    #[test]
    fn test_missing_column_and_leading_gap() {
        let rows = vec![
            RawRow::new().with("name", "A"),
            RawRow::new().with("purok", "3"),
            RawRow::new(),
        ];
        let filled = propagate_column_down(&rows, "purok");
        assert_eq!(filled, vec![None, Some("3".to_string()), Some("3".to_string())]);
    }

    #[test]
    fn test_each_pass_starts_fresh() {
        let first = vec![RawRow::new().with("purok", "Purok 9")];
        let second = vec![RawRow::new().with("purok", Cell::Empty)];
        assert_eq!(propagate_column_down(&first, "purok"), vec![Some("Purok 9".to_string())]);
        assert_eq!(propagate_column_down(&second, "purok"), vec![None]);
    }

    #[test]
    fn test_whitespace_counts_as_empty() {
        let mut merged = MergedCell::new();
        merged.carry(Some("Sitio Uno".to_string()));
        assert_eq!(merged.carry(Some("   ".to_string())).as_deref(), Some("Sitio Uno"));
        assert_eq!(merged.carry(None).as_deref(), Some("Sitio Uno"));
    }
}
