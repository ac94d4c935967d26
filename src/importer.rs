//! Confirm step: write a reviewed batch of rows inside one transaction.
//!
//! Rows are processed strictly in order so `BEN-###` allocation sees every
//! earlier insert of the same batch. A row that fails validation or hits a
//! constraint is reported and the batch carries on; the surviving rows are
//! committed together at the end.

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cleansers::NameParser;
use crate::import_schema::{ImportBatchResult, ImportFailure, ImportRow, ImportSuccess};
use crate::store::{BeneficiaryStore, ImportTransaction, StoreError};

/// Import `rows` and report per-row outcomes.
///
/// Only failures to open, run or commit the transaction itself are returned
/// as `Err`; in that case nothing is persisted.
pub async fn confirm_import(
    store: &dyn BeneficiaryStore,
    rows: Vec<ImportRow>,
    names: &dyn NameParser,
) -> Result<ImportBatchResult, StoreError> {
    let batch_id = Uuid::new_v4();
    info!(
        "Import batch {} started: {} rows on {} store",
        batch_id,
        rows.len(),
        store.backend_name()
    );

    let mut tx = store.begin().await?;
    let mut result = ImportBatchResult::default();

    for (idx, row) in rows.iter().enumerate() {
        if row.is_skipped() {
            debug!("Batch {}: row {} marked deleted/invalid, skipped", batch_id, idx + 1);
            continue;
        }
        result.total_processed += 1;

        match import_row(tx.as_mut(), row, idx + 1, names).await {
            Ok(success) => result.success.push(success),
            Err(RowFailure::Rejected(failure)) => {
                warn!(
                    "Batch {}: row {} ({}) failed: {}",
                    batch_id, failure.row, failure.name, failure.error
                );
                result.failed.push(failure);
            }
            Err(RowFailure::Fatal(e)) => {
                error!("Batch {} aborted at row {}: {}", batch_id, idx + 1, e);
                if let Err(rollback_err) = tx.rollback().await {
                    error!("Batch {} rollback failed: {}", batch_id, rollback_err);
                }
                return Err(e);
            }
        }
    }

    tx.commit().await?;
    info!(
        "Import batch {} committed: {} processed, {} imported, {} failed",
        batch_id,
        result.total_processed,
        result.success.len(),
        result.failed.len()
    );
    Ok(result)
}

enum RowFailure {
    /// The row is bad; report it and keep going.
    Rejected(ImportFailure),
    /// The transaction itself is unusable.
    Fatal(StoreError),
}

async fn import_row(
    tx: &mut dyn ImportTransaction,
    row: &ImportRow,
    position: usize,
    names: &dyn NameParser,
) -> Result<ImportSuccess, RowFailure> {
    let cleansed = row.to_cleansed(position, names);
    let name = if cleansed.first_name.is_empty() && cleansed.last_name.is_empty() {
        row.display_name()
    } else {
        cleansed.display_name()
    };
    let reject = |error: String| {
        RowFailure::Rejected(ImportFailure {
            row: cleansed.row,
            name: name.clone(),
            error,
        })
    };

    let problems = cleansed.validation_errors();
    if !problems.is_empty() {
        return Err(reject(problems.join("; ")));
    }

    let beneficiary_id = tx.next_beneficiary_id().await.map_err(RowFailure::Fatal)?;

    tx.insert_beneficiary(&beneficiary_id, &cleansed)
        .await
        .map_err(|e| classify(e, &reject))?;

    if cleansed.has_seedling_data() {
        tx.insert_seedling(&beneficiary_id, &cleansed)
            .await
            .map_err(|e| classify(e, &reject))?;
    }

    Ok(ImportSuccess {
        row: cleansed.row,
        name: name.clone(),
        beneficiary_id,
    })
}

/// Constraint violations belong to the row; anything else is a connection problem.
fn classify(e: StoreError, reject: &dyn Fn(String) -> RowFailure) -> RowFailure {
    match e {
        StoreError::Duplicate(_) | StoreError::Invalid(_) => reject(e.to_string()),
        StoreError::Database(sqlx::Error::Database(_)) => reject(e.to_string()),
        other => RowFailure::Fatal(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleansers::TokenCountNameParser;
    use crate::farm_coordinates::PlotPolygon;
    use crate::import_schema::CleansedBeneficiaryRow;
    use crate::store::memory::MemoryStore;

    fn row(first: &str, last: &str, birth: &str) -> ImportRow {
        ImportRow {
            first_name: Some(first.into()),
            last_name: Some(last.into()),
            purok: Some("Purok 1".into()),
            birth_date: Some(birth.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_duplicate_row_fails_rest_committed() {
        let store = MemoryStore::new();
        let rows = vec![
            row("Juan", "Cruz", "1980-01-01"),
            row("Maria", "Santos", "1981-02-02"),
            row("Pedro", "Reyes", "1982-03-03"),
            row("Juan", "Cruz", "1980-01-01"),
            row("Ana", "Lopez", "1983-04-04"),
            row("Jose", "Rizal", "1984-05-05"),
        ];

        let result = confirm_import(&store, rows, &TokenCountNameParser)
            .await
            .unwrap();

        assert_eq!(result.total_processed, 6);
        assert_eq!(result.success.len(), 5);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].row, 4);
        assert!(result.failed[0].error.contains("Duplicate"));
        assert_eq!(store.beneficiary_ids().await.len(), 5);

        let ids: Vec<&str> = result.success.iter().map(|s| s.beneficiary_id.as_str()).collect();
        assert_eq!(ids, vec!["BEN-001", "BEN-002", "BEN-003", "BEN-004", "BEN-005"]);
    }

    #[tokio::test]
    async fn test_ids_fill_existing_gaps() {
        let store = MemoryStore::new();
        for id in ["BEN-001", "BEN-002", "BEN-004"] {
            store
                .seed_beneficiary(
                    id,
                    CleansedBeneficiaryRow {
                        first_name: id.into(),
                        last_name: "Seed".into(),
                        purok: "Purok 9".into(),
                        ..Default::default()
                    },
                )
                .await;
        }

        let rows = vec![row("Juan", "Cruz", "1980-01-01"), row("Ana", "Lopez", "1983-04-04")];
        let result = confirm_import(&store, rows, &TokenCountNameParser)
            .await
            .unwrap();

        assert_eq!(result.success[0].beneficiary_id, "BEN-003");
        assert_eq!(result.success[1].beneficiary_id, "BEN-005");
    }

    #[tokio::test]
    async fn test_skipped_and_invalid_rows() {
        let store = MemoryStore::new();
        let mut deleted = row("Juan", "Cruz", "1980-01-01");
        deleted.deleted = true;
        let mut no_purok = row("Maria", "Santos", "1981-02-02");
        no_purok.purok = None;

        let rows = vec![deleted, no_purok, row("Pedro", "Reyes", "1982-03-03")];
        let result = confirm_import(&store, rows, &TokenCountNameParser)
            .await
            .unwrap();

        assert_eq!(result.total_processed, 2);
        assert_eq!(result.success.len(), 1);
        assert_eq!(result.failed[0].row, 2);
        assert_eq!(result.failed[0].error, "Purok is required");
        assert_eq!(result.success[0].beneficiary_id, "BEN-001");
    }

    #[tokio::test]
    async fn test_seedling_written_only_with_data() {
        let store = MemoryStore::new();
        let mut with_seedlings = row("Juan", "Cruz", "1980-01-01");
        with_seedlings.received = Some(500.0);
        with_seedlings.planted = Some(450.0);

        let rows = vec![with_seedlings, row("Ana", "Lopez", "1983-04-04")];
        confirm_import(&store, rows, &TokenCountNameParser)
            .await
            .unwrap();

        let seedlings = store.seedlings().await;
        assert_eq!(seedlings.len(), 1);
        assert_eq!(seedlings[0].beneficiary_id, "BEN-001");
        assert_eq!(seedlings[0].planted, Some(450.0));
    }

    #[tokio::test]
    async fn test_full_name_split_when_parts_missing() {
        let store = MemoryStore::new();
        let rows = vec![ImportRow {
            full_name: Some("Juan Dela Cruz".into()),
            purok: Some("Purok 2".into()),
            ..Default::default()
        }];
        let result = confirm_import(&store, rows, &TokenCountNameParser)
            .await
            .unwrap();

        assert_eq!(result.success.len(), 1);
        assert_eq!(result.success[0].row, 1);
    }

    #[tokio::test]
    async fn test_hand_edited_values_normalized_before_insert() {
        let store = MemoryStore::new();
        let mut edited = row("Juan", "Cruz", "1/19/1980");
        edited.purok = Some("3".into());
        edited.date_received = Some("Jan 5, 2025".into());
        let already_clean = ImportRow {
            purok: Some("Purok 3".into()),
            ..row("Juan", "Cruz", "1980-01-19")
        };

        let result = confirm_import(&store, vec![edited, already_clean], &TokenCountNameParser)
            .await
            .unwrap();

        assert_eq!(result.success.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].error.contains("Duplicate"));

        let seedlings = store.seedlings().await;
        assert_eq!(seedlings[0].date_received.as_deref(), Some("2025-01-05"));
    }

    struct Unavailable;

    #[async_trait::async_trait]
    impl BeneficiaryStore for Unavailable {
        fn backend_name(&self) -> &'static str {
            "unavailable"
        }

        async fn begin(&self) -> Result<Box<dyn ImportTransaction>, StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }

        async fn save_plot(&self, _plot: &PlotPolygon) -> Result<(), StoreError> {
            Err(StoreError::Database(sqlx::Error::PoolTimedOut))
        }
    }

    #[tokio::test]
    async fn test_begin_failure_is_fatal() {
        let result = confirm_import(&Unavailable, vec![row("Juan", "Cruz", "1980-01-01")], &TokenCountNameParser).await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }
}
