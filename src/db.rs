use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{FromRow, PgPool};
use tokio::runtime::Handle;

use crate::error::SourceError;
use crate::observation::{ObservationRecord, ObservationSource};

/// Row of the `census_records` table.
#[derive(Debug, Clone, FromRow)]
struct CensusRow {
    date: NaiveDate,
    occupancy_rate: f64,
    admissions: i32,
    discharges: i32,
    available_beds: i32,
    patient_days: Option<i32>,
}

fn non_negative(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

impl From<CensusRow> for ObservationRecord {
    fn from(row: CensusRow) -> Self {
        Self {
            date: row.date,
            occupancy_rate: row.occupancy_rate,
            admissions: non_negative(row.admissions),
            discharges: non_negative(row.discharges),
            available_beds: non_negative(row.available_beds),
            patient_days: row.patient_days.map(non_negative),
        }
    }
}

fn to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[derive(Clone, Debug)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to PostgreSQL database")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("Failed to run database migrations")?;

        Ok(Self { pool })
    }

    /// Insert a day, replacing any existing record for the same date.
    pub async fn upsert_record(&self, record: &ObservationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO census_records \
             (date, occupancy_rate, admissions, discharges, available_beds, patient_days) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (date) DO UPDATE SET \
             occupancy_rate = EXCLUDED.occupancy_rate, \
             admissions = EXCLUDED.admissions, \
             discharges = EXCLUDED.discharges, \
             available_beds = EXCLUDED.available_beds, \
             patient_days = EXCLUDED.patient_days",
        )
        .bind(record.date)
        .bind(record.occupancy_rate)
        .bind(to_db(record.admissions))
        .bind(to_db(record.discharges))
        .bind(to_db(record.available_beds))
        .bind(record.patient_days.map(to_db))
        .execute(&self.pool)
        .await
        .context("Failed to upsert census record")?;

        Ok(())
    }

    /// Records with `start <= date <= end`, oldest first.
    pub async fn get_range(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<ObservationRecord>> {
        let rows: Vec<CensusRow> = sqlx::query_as(
            "SELECT date, occupancy_rate, admissions, discharges, available_beds, patient_days \
             FROM census_records WHERE date >= $1 AND date <= $2 ORDER BY date ASC",
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch census records")?;

        Ok(rows.into_iter().map(ObservationRecord::from).collect())
    }

    pub async fn delete_range(&self, start: NaiveDate, end: NaiveDate) -> Result<u64> {
        let result = sqlx::query("DELETE FROM census_records WHERE date >= $1 AND date <= $2")
            .bind(start)
            .bind(end)
            .execute(&self.pool)
            .await
            .context("Failed to delete census records")?;
        Ok(result.rows_affected())
    }

    /// Write a date range to `census_<start>_<end>.csv` under `output_dir`.
    ///
    /// The file uses the same columns the CSV source reads.
    pub async fn export_to_csv(
        &self,
        output_dir: &Path,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<PathBuf> {
        let records = self
            .get_range(start, end)
            .await
            .context("Failed to fetch records for export")?;

        let output_path = output_dir.join(format!(
            "census_{}_{}.csv",
            start.format("%Y%m%d"),
            end.format("%Y%m%d")
        ));
        let path = output_path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut wtr = csv::Writer::from_path(&path).context("Failed to create CSV writer")?;
            for record in records {
                wtr.serialize(record)
                    .context("Failed to serialize census record")?;
            }
            wtr.flush().context("Failed to flush CSV writer")?;
            Ok(())
        })
        .await
        .context("CSV export task failed")??;

        Ok(output_path)
    }
}

/// Census source backed by PostgreSQL.
///
/// `fetch` blocks on the runtime handle it was built with, so it must be
/// called from a blocking context such as `spawn_blocking`.
#[derive(Clone, Debug)]
pub struct PgObservationSource {
    db: Database,
    handle: Handle,
}

impl PgObservationSource {
    pub fn new(db: Database, handle: Handle) -> Self {
        Self { db, handle }
    }
}

impl ObservationSource for PgObservationSource {
    fn fetch(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> std::result::Result<Vec<ObservationRecord>, SourceError> {
        self.handle
            .block_on(self.db.get_range(start, end))
            .map_err(|e| SourceError::Database(format!("{e:#}")))
    }
}
