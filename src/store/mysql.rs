//! MySQL backend.

use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::{MySql, Transaction};
use tracing::{debug, info};

use super::{next_beneficiary_id, BeneficiaryStore, ImportTransaction, StoreError};
use crate::farm_coordinates::PlotPolygon;
use crate::import_schema::CleansedBeneficiaryRow;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS beneficiaries (
        beneficiary_id VARCHAR(20) NOT NULL PRIMARY KEY,
        first_name VARCHAR(100) NOT NULL,
        middle_name VARCHAR(100) NULL,
        last_name VARCHAR(100) NOT NULL,
        purok VARCHAR(100) NOT NULL,
        gender VARCHAR(20) NULL,
        marital_status VARCHAR(30) NULL,
        birth_date DATE NULL,
        age INT UNSIGNED NULL,
        cellphone VARCHAR(20) NULL,
        barangay VARCHAR(100) NULL,
        municipality VARCHAR(100) NULL,
        province VARCHAR(100) NULL,
        farm_area_ha DECIMAL(10,4) NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        UNIQUE KEY uq_beneficiary_identity (first_name, last_name, purok, birth_date)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS seedlings (
        id INT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        beneficiary_id VARCHAR(20) NOT NULL,
        received DECIMAL(12,2) NULL,
        planted DECIMAL(12,2) NULL,
        date_received DATE NULL,
        planting_start_date DATE NULL,
        planting_end_date DATE NULL,
        created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
        CONSTRAINT fk_seedlings_beneficiary FOREIGN KEY (beneficiary_id)
            REFERENCES beneficiaries (beneficiary_id) ON DELETE CASCADE
    )"#,
    r#"CREATE TABLE IF NOT EXISTS farm_plots (
        plot_id VARCHAR(20) NOT NULL PRIMARY KEY,
        farmer_name VARCHAR(200) NOT NULL,
        updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
    )"#,
    r#"CREATE TABLE IF NOT EXISTS plot_coordinates (
        id INT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        plot_id VARCHAR(20) NOT NULL,
        point_order INT UNSIGNED NOT NULL,
        lat DECIMAL(11,8) NOT NULL,
        lng DECIMAL(11,8) NOT NULL,
        elevation DECIMAL(8,2) NULL,
        UNIQUE KEY uq_plot_point (plot_id, point_order),
        CONSTRAINT fk_coordinates_plot FOREIGN KEY (plot_id)
            REFERENCES farm_plots (plot_id) ON DELETE CASCADE
    )"#,
];

#[derive(Clone)]
pub struct MySqlStore {
    pool: MySqlPool,
}

impl MySqlStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Idempotent table creation.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        info!("MySQL schema ready ({} tables)", SCHEMA.len());
        Ok(())
    }
}

#[async_trait::async_trait]
impl BeneficiaryStore for MySqlStore {
    fn backend_name(&self) -> &'static str {
        "mysql"
    }

    async fn begin(&self) -> Result<Box<dyn ImportTransaction>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlImportTransaction { tx }))
    }

    async fn save_plot(&self, plot: &PlotPolygon) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO farm_plots (plot_id, farmer_name) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE farmer_name = VALUES(farmer_name)",
        )
        .bind(&plot.plot_id)
        .bind(&plot.farmer_name)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM plot_coordinates WHERE plot_id = ?")
            .bind(&plot.plot_id)
            .execute(&mut *tx)
            .await?;

        for point in &plot.points {
            sqlx::query(
                "INSERT INTO plot_coordinates (plot_id, point_order, lat, lng, elevation) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&plot.plot_id)
            .bind(point.point_order)
            .bind(point.latitude)
            .bind(point.longitude)
            .bind(point.elevation)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Saved plot {} ({} points)", plot.plot_id, plot.points.len());
        Ok(())
    }
}

/// Dropping this without `commit` rolls the transaction back.
struct MySqlImportTransaction {
    tx: Transaction<'static, MySql>,
}

#[async_trait::async_trait]
impl ImportTransaction for MySqlImportTransaction {
    async fn next_beneficiary_id(&mut self) -> Result<String, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT beneficiary_id FROM beneficiaries WHERE beneficiary_id LIKE 'BEN-%' FOR UPDATE",
        )
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(next_beneficiary_id(ids.iter().map(String::as_str)))
    }

    async fn insert_beneficiary(
        &mut self,
        beneficiary_id: &str,
        row: &CleansedBeneficiaryRow,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO beneficiaries (beneficiary_id, first_name, middle_name, last_name, purok, \
             gender, marital_status, birth_date, age, cellphone, barangay, municipality, province, \
             farm_area_ha) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(beneficiary_id)
        .bind(&row.first_name)
        .bind(&row.middle_name)
        .bind(&row.last_name)
        .bind(&row.purok)
        .bind(&row.gender)
        .bind(&row.marital_status)
        .bind(&row.birth_date)
        .bind(row.age)
        .bind(&row.cellphone)
        .bind(&row.barangay)
        .bind(&row.municipality)
        .bind(&row.province)
        .bind(row.hectares)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn insert_seedling(
        &mut self,
        beneficiary_id: &str,
        row: &CleansedBeneficiaryRow,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO seedlings (beneficiary_id, received, planted, date_received, \
             planting_start_date, planting_end_date) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(beneficiary_id)
        .bind(row.received)
        .bind(row.planted)
        .bind(&row.date_received)
        .bind(&row.planting_start_date)
        .bind(&row.planting_end_date)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
