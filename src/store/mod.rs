//! Persistence port for imports.
//!
//! [`BeneficiaryStore`] hands out one [`ImportTransaction`] per confirm batch.
//! Backends: MySQL ([`mysql::MySqlStore`]) and an in-process store
//! ([`memory::MemoryStore`]) used when no database is configured.

pub mod memory;
pub mod mysql;

use std::collections::BTreeSet;

use crate::farm_coordinates::PlotPolygon;
use crate::import_schema::CleansedBeneficiaryRow;

pub const BENEFICIARY_ID_PREFIX: &str = "BEN-";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Duplicate entry: {0}")]
    Duplicate(String),
    #[error("Invalid record: {0}")]
    Invalid(String),
    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Duplicate(db.message().to_string())
            }
            _ => StoreError::Database(e),
        }
    }
}

/// Connection-level entry point shared across requests.
#[async_trait::async_trait]
pub trait BeneficiaryStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    /// Start the single transaction that spans one import batch.
    async fn begin(&self) -> Result<Box<dyn ImportTransaction>, StoreError>;

    /// Replace a plot's boundary with the given ordered points.
    async fn save_plot(&self, plot: &PlotPolygon) -> Result<(), StoreError>;
}

/// One open transaction. Must end in `commit` or `rollback`.
#[async_trait::async_trait]
pub trait ImportTransaction: Send {
    /// Lowest free `BEN-###` id as seen by this transaction.
    async fn next_beneficiary_id(&mut self) -> Result<String, StoreError>;

    async fn insert_beneficiary(
        &mut self,
        beneficiary_id: &str,
        row: &CleansedBeneficiaryRow,
    ) -> Result<(), StoreError>;

    async fn insert_seedling(
        &mut self,
        beneficiary_id: &str,
        row: &CleansedBeneficiaryRow,
    ) -> Result<(), StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}

/// Fill the lowest gap in the `BEN-###` sequence, else extend it.
pub fn next_beneficiary_id<'a>(existing: impl IntoIterator<Item = &'a str>) -> String {
    let taken: BTreeSet<u32> = existing
        .into_iter()
        .filter_map(|id| id.strip_prefix(BENEFICIARY_ID_PREFIX))
        .filter_map(|n| n.parse().ok())
        .collect();

    let next = (1..).find(|n| !taken.contains(n)).unwrap_or(1);
    format!("{}{:03}", BENEFICIARY_ID_PREFIX, next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_id_empty() {
        assert_eq!(next_beneficiary_id(Vec::<&str>::new()), "BEN-001");
    }

    #[test]
    fn test_next_id_fills_lowest_gap() {
        let ids = ["BEN-001", "BEN-002", "BEN-004", "BEN-005"];
        assert_eq!(next_beneficiary_id(ids), "BEN-003");
    }

    #[test]
    fn test_next_id_extends_sequence() {
        let ids = ["BEN-003", "BEN-001", "BEN-002"];
        assert_eq!(next_beneficiary_id(ids), "BEN-004");
    }

    #[test]
    fn test_next_id_ignores_foreign_ids_and_grows_past_three_digits() {
        let mut ids: Vec<String> = (1..=999).map(|n| format!("BEN-{:03}", n)).collect();
        ids.push("LEGACY-17".to_string());
        ids.push("BEN-abc".to_string());
        assert_eq!(next_beneficiary_id(ids.iter().map(String::as_str)), "BEN-1000");
    }
}
