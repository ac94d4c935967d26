//! In-process backend for running without MySQL.
//!
//! Transactions hold the store lock for their whole lifetime and work on a
//! staged copy, so batches are serialized and uncommitted work is discarded
//! on rollback or drop. Constraints mirror the MySQL schema.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{next_beneficiary_id, BeneficiaryStore, ImportTransaction, StoreError};
use crate::farm_coordinates::PlotPolygon;
use crate::import_schema::CleansedBeneficiaryRow;

#[derive(Debug, Clone, PartialEq)]
pub struct SeedlingRecord {
    pub beneficiary_id: String,
    pub received: Option<f64>,
    pub planted: Option<f64>,
    pub date_received: Option<String>,
    pub planting_start_date: Option<String>,
    pub planting_end_date: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    beneficiaries: BTreeMap<String, CleansedBeneficiaryRow>,
    seedlings: Vec<SeedlingRecord>,
    plots: BTreeMap<String, PlotPolygon>,
}

impl MemoryState {
    /// UNIQUE (first_name, last_name, purok, birth_date); NULL birth dates never collide.
    fn identity_taken(&self, row: &CleansedBeneficiaryRow) -> bool {
        row.birth_date.is_some()
            && self.beneficiaries.values().any(|b| {
                b.first_name == row.first_name
                    && b.last_name == row.last_name
                    && b.purok == row.purok
                    && b.birth_date == row.birth_date
            })
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BeneficiaryStore for MemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn begin(&self) -> Result<Box<dyn ImportTransaction>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, staged }))
    }

    async fn save_plot(&self, plot: &PlotPolygon) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.plots.insert(plot.plot_id.clone(), plot.clone());
        Ok(())
    }
}

struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
}

#[async_trait::async_trait]
impl ImportTransaction for MemoryTransaction {
    async fn next_beneficiary_id(&mut self) -> Result<String, StoreError> {
        Ok(next_beneficiary_id(
            self.staged.beneficiaries.keys().map(String::as_str),
        ))
    }

    async fn insert_beneficiary(
        &mut self,
        beneficiary_id: &str,
        row: &CleansedBeneficiaryRow,
    ) -> Result<(), StoreError> {
        if self.staged.beneficiaries.contains_key(beneficiary_id) {
            return Err(StoreError::Duplicate(format!(
                "'{}' for key 'PRIMARY'",
                beneficiary_id
            )));
        }
        if self.staged.identity_taken(row) {
            return Err(StoreError::Duplicate(format!(
                "'{}-{}-{}' for key 'uq_beneficiary_identity'",
                row.first_name, row.last_name, row.purok
            )));
        }
        self.staged
            .beneficiaries
            .insert(beneficiary_id.to_string(), row.clone());
        Ok(())
    }

    async fn insert_seedling(
        &mut self,
        beneficiary_id: &str,
        row: &CleansedBeneficiaryRow,
    ) -> Result<(), StoreError> {
        if !self.staged.beneficiaries.contains_key(beneficiary_id) {
            return Err(StoreError::Invalid(format!(
                "seedling references unknown beneficiary {}",
                beneficiary_id
            )));
        }
        self.staged.seedlings.push(SeedlingRecord {
            beneficiary_id: beneficiary_id.to_string(),
            received: row.received,
            planted: row.planted,
            date_received: row.date_received.clone(),
            planting_start_date: row.planting_start_date.clone(),
            planting_end_date: row.planting_end_date.clone(),
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTransaction { mut guard, staged } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
impl MemoryStore {
    pub async fn beneficiary_ids(&self) -> Vec<String> {
        self.state.lock().await.beneficiaries.keys().cloned().collect()
    }

    pub async fn seedlings(&self) -> Vec<SeedlingRecord> {
        self.state.lock().await.seedlings.clone()
    }

    pub async fn plot(&self, plot_id: &str) -> Option<PlotPolygon> {
        self.state.lock().await.plots.get(plot_id).cloned()
    }

    pub async fn seed_beneficiary(&self, beneficiary_id: &str, row: CleansedBeneficiaryRow) {
        self.state
            .lock()
            .await
            .beneficiaries
            .insert(beneficiary_id.to_string(), row);
    }
}
