//! Wire types for the beneficiary import flow.
//!
//! Everything here serializes camelCase, matching what the admin panel sends
//! and expects.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::cleansers::{
    clean_cellphone, clean_date, clean_gender, clean_purok, clean_quantity, NameParser,
};
use crate::sheet_parser::Cell;

pub const ERR_FIRST_NAME: &str = "First name is required";
pub const ERR_LAST_NAME: &str = "Last name is required";
pub const ERR_PUROK: &str = "Purok is required";
pub const ERR_PLANTED_EXCEEDS: &str = "Planted cannot exceed Received";

/// A normalized beneficiary row ready for preview or insert.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleansedBeneficiaryRow {
    /// Source file row (1-based).
    pub row: usize,
    pub first_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub middle_name: Option<String>,
    pub last_name: String,
    pub purok: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marital_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub birth_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cellphone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub barangay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub municipality: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub province: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planted: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hectares: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planting_start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planting_end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_received: Option<String>,
}

impl CleansedBeneficiaryRow {
    /// Every rule this row violates, in a stable order.
    pub fn validation_errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.first_name.trim().is_empty() {
            errors.push(ERR_FIRST_NAME.to_string());
        }
        if self.last_name.trim().is_empty() {
            errors.push(ERR_LAST_NAME.to_string());
        }
        if self.purok.trim().is_empty() {
            errors.push(ERR_PUROK.to_string());
        }
        if let (Some(received), Some(planted)) = (self.received, self.planted) {
            if planted > received {
                errors.push(format!(
                    "{} ({} planted, {} received)",
                    ERR_PLANTED_EXCEEDS, planted, received
                ));
            }
        }
        errors
    }

    pub fn display_name(&self) -> String {
        [
            Some(self.first_name.as_str()),
            self.middle_name.as_deref(),
            Some(self.last_name.as_str()),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
    }

    /// A seedling record is written when any distribution field is filled in.
    pub fn has_seedling_data(&self) -> bool {
        self.received.is_some()
            || self.planted.is_some()
            || self.date_received.is_some()
            || self.planting_start_date.is_some()
            || self.planting_end_date.is_some()
    }
}

/// A row that failed validation, with every reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowError {
    pub row: usize,
    pub name: String,
    pub errors: Vec<String>,
}

/// One GPS vertex of a farm plot boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlotCoordinatePoint {
    pub plot_id: String,
    pub farmer_name: String,
    /// 1-based position within the plot polygon.
    pub point_order: u32,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSuccess {
    pub row: usize,
    pub name: String,
    pub beneficiary_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportFailure {
    pub row: usize,
    pub name: String,
    pub error: String,
}

/// Outcome of one confirm-import batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatchResult {
    pub success: Vec<ImportSuccess>,
    pub failed: Vec<ImportFailure>,
    pub total_processed: usize,
}

/// A flattened, possibly hand-edited row posted back by the review grid.
///
/// Every field is optional and numbers may arrive as strings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRow {
    #[serde(default, deserialize_with = "lenient_usize")]
    pub row: Option<usize>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub full_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub first_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub middle_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub last_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub purok: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub marital_status: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub birth_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub age: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cellphone: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub barangay: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub municipality: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub province: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub received: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub planted: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub hectares: Option<f64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub planting_start_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub planting_end_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date_received: Option<String>,
    #[serde(default, rename = "_deleted", alias = "isDeleted", deserialize_with = "lenient_bool")]
    pub deleted: bool,
    #[serde(default, rename = "_invalid", alias = "isInvalid", deserialize_with = "lenient_bool")]
    pub invalid: bool,
}

impl ImportRow {
    /// Rows the editor marked as removed or still broken are not imported.
    pub fn is_skipped(&self) -> bool {
        self.deleted || self.invalid
    }

    /// Rebuild a cleansed row, splitting `fullName` when first/last are missing.
    ///
    /// Edited cells go through the same cleansers as the upload, so dates
    /// reach the store as `YYYY-MM-DD` or not at all.
    pub fn to_cleansed(&self, fallback_row: usize, names: &dyn NameParser) -> CleansedBeneficiaryRow {
        let mut first_name = self.first_name.clone();
        let mut middle_name = self.middle_name.clone();
        let mut last_name = self.last_name.clone();

        if first_name.is_none() && last_name.is_none() {
            if let Some(full) = &self.full_name {
                let parsed = names.parse(full);
                first_name = parsed.first_name;
                middle_name = middle_name.or(parsed.middle_name);
                last_name = parsed.last_name;
            }
        }

        CleansedBeneficiaryRow {
            row: self.row.unwrap_or(fallback_row),
            first_name: first_name.unwrap_or_default(),
            middle_name,
            last_name: last_name.unwrap_or_default(),
            purok: self
                .purok
                .as_deref()
                .and_then(clean_purok)
                .unwrap_or_default(),
            gender: recleanse(&self.gender, clean_gender),
            marital_status: self.marital_status.clone(),
            birth_date: recleanse(&self.birth_date, clean_date),
            age: self.age.filter(|a| *a >= 0.0).map(|a| a.round() as u32),
            cellphone: recleanse(&self.cellphone, clean_cellphone),
            barangay: self.barangay.clone(),
            municipality: self.municipality.clone(),
            province: self.province.clone(),
            received: self.received,
            planted: self.planted,
            hectares: self.hectares,
            planting_start_date: recleanse(&self.planting_start_date, clean_date),
            planting_end_date: recleanse(&self.planting_end_date, clean_date),
            date_received: recleanse(&self.date_received, clean_date),
        }
    }

    /// Best-effort name for result reporting, before validation.
    pub fn display_name(&self) -> String {
        if let Some(full) = &self.full_name {
            return full.clone();
        }
        [&self.first_name, &self.middle_name, &self.last_name]
            .into_iter()
            .flatten()
            .cloned()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ============================================================================
// Lenient field decoding
// ============================================================================

fn recleanse(value: &Option<String>, cleanser: fn(&Cell) -> Option<String>) -> Option<String> {
    value.as_deref().and_then(|v| cleanser(&Cell::from(v)))
}

fn lenient_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => clean_quantity(&Cell::Text(s)),
        _ => None,
    })
}

fn lenient_usize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<usize>, D::Error> {
    Ok(lenient_number(d)?.filter(|n| *n >= 1.0).map(|n| n as usize))
}

fn lenient_bool<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::Bool(b)) => b,
        Some(Value::String(s)) => matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"),
        Some(Value::Number(n)) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleansers::TokenCountNameParser;

    fn valid_row() -> CleansedBeneficiaryRow {
        CleansedBeneficiaryRow {
            row: 5,
            first_name: "Juan".into(),
            last_name: "Cruz".into(),
            purok: "Purok 1".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validation_collects_every_error() {
        let row = CleansedBeneficiaryRow {
            first_name: "Juan".into(),
            received: Some(100.0),
            planted: Some(150.0),
            ..Default::default()
        };
        let errors = row.validation_errors();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0], ERR_LAST_NAME);
        assert_eq!(errors[1], ERR_PUROK);
        assert!(errors[2].contains(ERR_PLANTED_EXCEEDS));
    }

    #[test]
    fn test_planted_equal_received_is_valid() {
        let row = CleansedBeneficiaryRow {
            received: Some(100.0),
            planted: Some(100.0),
            ..valid_row()
        };
        assert!(row.validation_errors().is_empty());
    }

    #[test]
    fn test_has_seedling_data() {
        assert!(!valid_row().has_seedling_data());
        let row = CleansedBeneficiaryRow {
            date_received: Some("2025-01-02".into()),
            ..valid_row()
        };
        assert!(row.has_seedling_data());
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(CleansedBeneficiaryRow {
            planting_start_date: Some("2025-01-19".into()),
            ..valid_row()
        })
        .unwrap();
        assert_eq!(json["firstName"], "Juan");
        assert_eq!(json["plantingStartDate"], "2025-01-19");
        assert!(json.get("middleName").is_none());
    }

    #[test]
    fn test_import_row_lenient_fields() {
        let json = r#"{
            "row": "7",
            "fullName": "Maria Santos Reyes",
            "purok": "Purok 2",
            "received": "500 + 500",
            "planted": 800,
            "age": "41",
            "cellphone": 9171234567,
            "isDeleted": null
        }"#;
        let row: ImportRow = serde_json::from_str(json).unwrap();
        assert!(!row.is_skipped());

        let cleansed = row.to_cleansed(1, &TokenCountNameParser);
        assert_eq!(cleansed.row, 7);
        assert_eq!(cleansed.first_name, "Maria");
        assert_eq!(cleansed.middle_name.as_deref(), Some("Santos"));
        assert_eq!(cleansed.last_name, "Reyes");
        assert_eq!(cleansed.received, Some(1000.0));
        assert_eq!(cleansed.planted, Some(800.0));
        assert_eq!(cleansed.age, Some(41));
        assert_eq!(cleansed.cellphone.as_deref(), Some("09171234567"));
        assert!(cleansed.validation_errors().is_empty());
    }

    #[test]
    fn test_import_row_skip_flags() {
        let deleted: ImportRow = serde_json::from_str(r#"{"_deleted": true}"#).unwrap();
        assert!(deleted.is_skipped());
        let invalid: ImportRow = serde_json::from_str(r#"{"isInvalid": "true"}"#).unwrap();
        assert!(invalid.is_skipped());
    }

    #[test]
    fn test_edited_fields_recleansed() {
        let json = r#"{
            "firstName": "Juan",
            "lastName": "Cruz",
            "purok": "3",
            "gender": "m",
            "birthDate": "1/19/1980",
            "dateReceived": "Jan 5, 2025",
            "plantingStartDate": "2025-01-19",
            "plantingEndDate": "someday"
        }"#;
        let row: ImportRow = serde_json::from_str(json).unwrap();
        let cleansed = row.to_cleansed(1, &TokenCountNameParser);

        assert_eq!(cleansed.purok, "Purok 3");
        assert_eq!(cleansed.gender.as_deref(), Some("Male"));
        assert_eq!(cleansed.birth_date.as_deref(), Some("1980-01-19"));
        assert_eq!(cleansed.date_received.as_deref(), Some("2025-01-05"));
        assert_eq!(cleansed.planting_start_date.as_deref(), Some("2025-01-19"));
        assert_eq!(cleansed.planting_end_date, None);
    }
}
