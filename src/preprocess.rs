//! Turns raw census records into a clean, gap-free daily series.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::PreprocessConfig;
use crate::error::{ForecastError, Result};
use crate::observation::{ObservationRecord, TargetField};
use crate::stats;

/// Daily series starting at `start` with one value per consecutive day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub start: NaiveDate,
    pub values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(start: NaiveDate, values: Vec<f64>) -> Self {
        Self { start, values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn date_at(&self, index: usize) -> NaiveDate {
        self.start + Duration::days(index as i64)
    }

    /// Date of the last value. Equals `start` for an empty series.
    pub fn end(&self) -> NaiveDate {
        self.date_at(self.values.len().saturating_sub(1))
    }

    pub fn points(&self) -> Vec<(NaiveDate, f64)> {
        self.values
            .iter()
            .enumerate()
            .map(|(i, &v)| (self.date_at(i), v))
            .collect()
    }

    /// Chronological split: the first `floor(len * ratio)` days train, the rest test.
    pub fn split(&self, ratio: f64) -> (TimeSeries, TimeSeries) {
        let cut = ((self.len() as f64) * ratio).floor() as usize;
        let cut = cut.min(self.len());
        let train = TimeSeries::new(self.start, self.values[..cut].to_vec());
        let test = TimeSeries::new(self.date_at(cut), self.values[cut..].to_vec());
        (train, test)
    }
}

/// Outcome of a censoring pass, reported in training logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PreprocessSummary {
    pub observed_days: usize,
    pub filled_days: usize,
    pub censored_points: usize,
    pub clamped_points: usize,
    pub duplicate_dates: usize,
}

#[derive(Debug, Clone)]
pub struct SeriesPreprocessor {
    config: PreprocessConfig,
}

impl SeriesPreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    /// Extract `target` from each record and clean the result.
    pub fn prepare(
        &self,
        records: &[ObservationRecord],
        target: TargetField,
    ) -> Result<(TimeSeries, PreprocessSummary)> {
        let points: Vec<(NaiveDate, Option<f64>)> = records
            .iter()
            .map(|r| (r.date, target.value(r)))
            .collect();
        self.clean(&points, target.is_percentage())
    }

    /// Clean dated points into a daily series.
    ///
    /// `None` values mark days known to exist but lacking the target value;
    /// they are filled like calendar gaps. Percentages are bounded to
    /// `[0, 100]`, every other target to `[0, inf)`.
    pub fn clean(
        &self,
        points: &[(NaiveDate, Option<f64>)],
        percentage: bool,
    ) -> Result<(TimeSeries, PreprocessSummary)> {
        let mut summary = PreprocessSummary::default();
        let upper = if percentage { 100.0 } else { f64::INFINITY };

        let mut by_day: BTreeMap<NaiveDate, Option<f64>> = BTreeMap::new();
        for &(date, value) in points {
            let value = match value {
                Some(v) if !v.is_finite() => {
                    return Err(ForecastError::Validation(format!(
                        "non-finite value {v} on {date}"
                    )));
                }
                Some(v) if v < 0.0 || v > upper => {
                    if self.config.strict_range {
                        return Err(ForecastError::Validation(format!(
                            "value {v} on {date} outside [0, {upper}]"
                        )));
                    }
                    summary.clamped_points += 1;
                    warn!("Clamping out-of-range value {} on {}", v, date);
                    Some(v.clamp(0.0, upper))
                }
                other => other,
            };

            if let Some(previous) = by_day.insert(date, value) {
                summary.duplicate_dates += 1;
                warn!(
                    "Duplicate record for {}, replacing {:?} with {:?}",
                    date, previous, value
                );
            }
        }

        let observed: Vec<f64> = by_day.values().filter_map(|v| *v).collect();
        summary.observed_days = observed.len();
        if observed.len() < self.config.min_days {
            return Err(ForecastError::InsufficientData {
                needed: self.config.min_days,
                got: observed.len(),
            });
        }

        // Fences come from observed values only; filled days copy censored
        // neighbours and so always fall inside them
        let mut observed = observed;
        summary.censored_points += censor_outliers(&mut observed, self.config.iqr_multiplier);
        let mut censored = observed.into_iter();
        for value in by_day.values_mut() {
            if value.is_some() {
                *value = censored.next();
            }
        }

        let (Some(&first), Some(&last)) = (by_day.keys().next(), by_day.keys().next_back())
        else {
            return Err(ForecastError::InsufficientData {
                needed: self.config.min_days,
                got: 0,
            });
        };

        let span = (last - first).num_days() as usize + 1;
        let mut values: Vec<Option<f64>> = vec![None; span];
        for (date, value) in &by_day {
            values[(*date - first).num_days() as usize] = *value;
        }
        summary.filled_days = values.iter().filter(|v| v.is_none()).count();

        let values = fill_gaps(&values);

        debug!(
            "Prepared {} days from {} ({} observed, {} filled, {} censored)",
            values.len(),
            first,
            summary.observed_days,
            summary.filled_days,
            summary.censored_points
        );

        Ok((TimeSeries::new(first, values), summary))
    }
}

/// Replace values outside the `k`×IQR fences with the median, in one pass.
///
/// Fences and median are taken from the values as given. Returns the number
/// of replacements made.
pub fn censor_outliers(values: &mut [f64], k: f64) -> usize {
    if values.is_empty() {
        return 0;
    }
    let q1 = stats::quantile(values, 0.25);
    let q3 = stats::quantile(values, 0.75);
    let median = stats::median(values);
    let iqr = q3 - q1;
    let (lower, upper) = (q1 - k * iqr, q3 + k * iqr);

    let mut replaced = 0;
    for v in values.iter_mut() {
        if *v < lower || *v > upper {
            *v = median;
            replaced += 1;
        }
    }
    replaced
}

/// Forward-fill, then backward-fill any leading gap.
pub fn fill_gaps(values: &[Option<f64>]) -> Vec<f64> {
    let mut filled: Vec<Option<f64>> = Vec::with_capacity(values.len());
    let mut last = None;
    for v in values {
        if v.is_some() {
            last = *v;
        }
        filled.push(last);
    }

    let first_known = filled.iter().find_map(|v| *v).unwrap_or(0.0);
    filled.into_iter().map(|v| v.unwrap_or(first_known)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn day(offset: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset)
    }

    fn preprocessor() -> SeriesPreprocessor {
        SeriesPreprocessor::new(PreprocessConfig::default())
    }

    fn points(values: &[f64]) -> Vec<(NaiveDate, Option<f64>)> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| (day(i as i64), Some(v)))
            .collect()
    }

    #[test]
    fn test_insufficient_data() {
        let err = preprocessor().clean(&points(&[70.0; 5]), true).unwrap_err();
        assert!(matches!(
            err,
            ForecastError::InsufficientData { needed: 30, got: 5 }
        ));
    }

    #[test]
    fn test_outlier_replaced_by_median() {
        let mut values: Vec<f64> = (0..40).map(|i| 70.0 + (i % 5) as f64).collect();
        values[10] = 100.0;
        let (series, summary) = preprocessor().clean(&points(&values), true).unwrap();

        assert_eq!(series.len(), 40);
        assert_eq!(series.values[10], 72.0);
        assert_eq!(summary.censored_points, 1);
    }

    #[test]
    fn test_surge_series_keeps_its_shape() {
        // Whole-number census with a surge every tenth day
        let records: Vec<ObservationRecord> = (0..84)
            .map(|i| {
                let rate = if i % 10 == 9 { 96.0 } else { 70.0 + ((i * 3) % 8) as f64 };
                ObservationRecord::occupancy(day(i), rate)
            })
            .collect();
        let pre = preprocessor();
        let (once, summary) = pre.prepare(&records, TargetField::OccupancyRate).unwrap();

        assert_eq!(summary.censored_points, 8);
        assert!(once.values.iter().all(|&v| v != 96.0));
        let mut distinct = once.values.clone();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        assert_eq!(distinct.len(), 8);

        let again: Vec<ObservationRecord> = once
            .points()
            .into_iter()
            .map(|(date, v)| ObservationRecord::occupancy(date, v))
            .collect();
        let (twice, summary) = pre.prepare(&again, TargetField::OccupancyRate).unwrap();
        assert_eq!(once, twice);
        assert_eq!(summary.censored_points, 0);
    }

    #[test]
    fn test_censor_uses_raw_fences_once() {
        // Sixty quiet days and a long upper tail
        let mut values = vec![72.0; 60];
        values.extend((0..24).map(|i| 73.0 + (i % 8) as f64));

        let replaced = censor_outliers(&mut values, 1.5);
        assert_eq!(replaced, 15);
        let mut distinct = values.clone();
        distinct.sort_by(f64::total_cmp);
        distinct.dedup();
        assert_eq!(distinct, vec![72.0, 73.0, 74.0, 75.0]);
    }

    #[test]
    fn test_gaps_forward_then_backward_filled() {
        let mut pts = points(&[60.0; 35]);
        // Remove days 3 and 4, and mark day 0 missing
        pts.retain(|(d, _)| *d != day(3) && *d != day(4));
        pts[0].1 = None;

        let (series, summary) = preprocessor().clean(&pts, true).unwrap();
        assert_eq!(series.start, day(0));
        assert_eq!(series.len(), 35);
        assert!(series.values.iter().all(|&v| v == 60.0));
        assert_eq!(summary.filled_days, 3);
    }

    #[test]
    fn test_duplicate_dates_last_wins() {
        let values: Vec<f64> = (0..31).map(|i| 60.0 + (i % 5) as f64).collect();
        let mut pts = points(&values);
        pts.push((day(0), Some(61.0)));
        let (series, summary) = preprocessor().clean(&pts, true).unwrap();
        assert_eq!(series.values[0], 61.0);
        assert_eq!(summary.duplicate_dates, 1);
        assert_eq!(series.len(), 31);
    }

    #[test]
    fn test_out_of_range_clamped_or_rejected() {
        let mut pts = points(&[80.0; 31]);
        pts[5].1 = Some(104.0);
        pts[6].1 = Some(-3.0);

        let (series, summary) = preprocessor().clean(&pts, true).unwrap();
        assert_eq!(summary.clamped_points, 2);
        assert!(series.values.iter().all(|v| (0.0..=100.0).contains(v)));

        let strict = SeriesPreprocessor::new(PreprocessConfig {
            strict_range: true,
            ..PreprocessConfig::default()
        });
        assert!(matches!(
            strict.clean(&pts, true),
            Err(ForecastError::Validation(_))
        ));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut pts = points(&[80.0; 31]);
        pts[2].1 = Some(f64::NAN);
        assert!(matches!(
            preprocessor().clean(&pts, true),
            Err(ForecastError::Validation(_))
        ));
    }

    #[test]
    fn test_split_is_chronological() {
        let series = TimeSeries::new(day(0), (0..10).map(f64::from).collect());
        let (train, test) = series.split(0.8);
        assert_eq!(train.values, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(test.values, vec![8.0, 9.0]);
        assert_eq!(test.start, day(8));
    }

    #[test]
    fn test_fill_gaps_all_missing_leading() {
        let filled = fill_gaps(&[None, None, Some(3.0), None]);
        assert_eq!(filled, vec![3.0, 3.0, 3.0, 3.0]);
    }

    proptest! {
        #[test]
        fn prop_preprocessing_is_idempotent(
            values in prop::collection::vec(prop::option::weighted(0.9, 0.0f64..100.0), 30..90)
        ) {
            let pts: Vec<(NaiveDate, Option<f64>)> = values
                .iter()
                .enumerate()
                .map(|(i, v)| (day(i as i64), *v))
                .collect();
            let pre = SeriesPreprocessor::new(PreprocessConfig { min_days: 10, ..PreprocessConfig::default() });

            if let Ok((once, _)) = pre.clean(&pts, true) {
                let again_input: Vec<(NaiveDate, Option<f64>)> =
                    once.points().into_iter().map(|(d, v)| (d, Some(v))).collect();
                let (twice, summary) = pre.clean(&again_input, true).unwrap();
                prop_assert_eq!(&once, &twice);
                prop_assert_eq!(summary.censored_points, 0);
            }
        }
    }
}
