//! Daily census records and the sources that supply them.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SourceError;

/// One day of hospital census data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub date: NaiveDate,
    /// Bed occupancy rate in percent.
    pub occupancy_rate: f64,
    pub admissions: u32,
    pub discharges: u32,
    pub available_beds: u32,
    #[serde(default)]
    pub patient_days: Option<u32>,
}

impl ObservationRecord {
    /// Record with only a date and occupancy set.
    pub fn occupancy(date: NaiveDate, occupancy_rate: f64) -> Self {
        Self {
            date,
            occupancy_rate,
            admissions: 0,
            discharges: 0,
            available_beds: 0,
            patient_days: None,
        }
    }

    /// Average length of stay for the day, if it can be derived.
    pub fn length_of_stay(&self) -> Option<f64> {
        match (self.patient_days, self.discharges) {
            (Some(days), discharges) if discharges > 0 => Some(days as f64 / discharges as f64),
            _ => None,
        }
    }
}

/// Which column of the census is forecast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetField {
    #[default]
    OccupancyRate,
    Admissions,
    Discharges,
    AvailableBeds,
    PatientDays,
    LengthOfStay,
}

impl TargetField {
    pub fn value(&self, record: &ObservationRecord) -> Option<f64> {
        match self {
            TargetField::OccupancyRate => Some(record.occupancy_rate),
            TargetField::Admissions => Some(record.admissions as f64),
            TargetField::Discharges => Some(record.discharges as f64),
            TargetField::AvailableBeds => Some(record.available_beds as f64),
            TargetField::PatientDays => record.patient_days.map(f64::from),
            TargetField::LengthOfStay => record.length_of_stay(),
        }
    }

    /// Whether values are percentages bounded to `[0, 100]`.
    pub fn is_percentage(&self) -> bool {
        matches!(self, TargetField::OccupancyRate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetField::OccupancyRate => "occupancy_rate",
            TargetField::Admissions => "admissions",
            TargetField::Discharges => "discharges",
            TargetField::AvailableBeds => "available_beds",
            TargetField::PatientDays => "patient_days",
            TargetField::LengthOfStay => "length_of_stay",
        }
    }
}

// ==================== Observation Sources ====================

/// Supplier of census records for an inclusive date range.
pub trait ObservationSource: Send + Sync {
    fn fetch(&self, start: NaiveDate, end: NaiveDate)
    -> Result<Vec<ObservationRecord>, SourceError>;
}

/// Reads records from a CSV file with a header row.
///
/// Columns: `date,occupancy_rate,admissions,discharges,available_beds,patient_days`,
/// where `patient_days` may be empty.
#[derive(Debug, Clone)]
pub struct CsvObservationSource {
    path: PathBuf,
}

impl CsvObservationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ObservationSource for CsvObservationSource {
    fn fetch(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ObservationRecord>, SourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&self.path)?;

        let mut records = Vec::new();
        for row in reader.deserialize::<ObservationRecord>() {
            let record = row?;
            if record.date >= start && record.date <= end {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.date);

        debug!(
            "Read {} records from {} ({} to {})",
            records.len(),
            self.path.display(),
            start,
            end
        );
        Ok(records)
    }
}

/// Fixed in-memory records, for embedding callers and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryObservationSource {
    records: Vec<ObservationRecord>,
}

impl MemoryObservationSource {
    pub fn new(records: Vec<ObservationRecord>) -> Self {
        Self { records }
    }
}

impl ObservationSource for MemoryObservationSource {
    fn fetch(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ObservationRecord>, SourceError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.date >= start && r.date <= end)
            .cloned()
            .collect())
    }
}
