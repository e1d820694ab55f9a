//! Simple reference forecasters scored against the selected seasonal model.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;
use crate::ml::evaluation::PerformanceMetrics;
use crate::ml::sarima::FittedSarima;
use crate::stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineKind {
    /// Last training value carried forward.
    Naive,
    /// Mean of the trailing window.
    MovingAverage,
    /// Lowest-AIC non-seasonal candidate from the search.
    Arima,
    /// The selected seasonal model.
    Sarima,
}

impl BaselineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineKind::Naive => "naive",
            BaselineKind::MovingAverage => "moving_average",
            BaselineKind::Arima => "arima",
            BaselineKind::Sarima => "sarima",
        }
    }
}

/// Flat forecast of the last observation.
pub fn naive_forecast(train: &[f64], horizon: usize) -> Vec<f64> {
    match train.last() {
        Some(&last) => vec![last; horizon],
        None => Vec::new(),
    }
}

/// Flat forecast of the mean of the last `window` observations.
///
/// Falls back to the whole history when it is shorter than `window`.
/// Returns the forecast and the window actually used.
pub fn moving_average_forecast(train: &[f64], window: usize, horizon: usize) -> (Vec<f64>, usize) {
    if train.is_empty() {
        return (Vec::new(), 0);
    }
    let used = window.clamp(1, train.len());
    let mean = stats::mean(&train[train.len() - used..]);
    (vec![mean; horizon], used)
}

/// Held-out score of one model, with its rank per metric (1 is best).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineScore {
    pub kind: BaselineKind,
    pub description: String,
    pub metrics: PerformanceMetrics,
    pub rmse_rank: usize,
    pub mae_rank: usize,
    pub mape_rank: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineComparison {
    /// Ordered by MAPE rank.
    pub scores: Vec<BaselineScore>,
    pub best_by_mape: BaselineKind,
    /// The seasonal model has strictly lower MAE than every baseline.
    pub sarima_beats_baselines: bool,
}

impl BaselineComparison {
    pub fn score(&self, kind: BaselineKind) -> Option<&BaselineScore> {
        self.scores.iter().find(|s| s.kind == kind)
    }
}

/// Score the baselines and the selected model on the same test split.
///
/// `arima` is skipped when the search space held no non-seasonal candidate.
pub fn compare(
    train: &[f64],
    test: &[f64],
    window: usize,
    arima: Option<&FittedSarima>,
    sarima: &FittedSarima,
    sarima_metrics: PerformanceMetrics,
) -> Result<BaselineComparison> {
    let horizon = test.len();
    let mut scored: Vec<(BaselineKind, String, PerformanceMetrics)> = Vec::new();

    let naive = naive_forecast(train, horizon);
    scored.push((
        BaselineKind::Naive,
        "Naive (last value)".to_string(),
        PerformanceMetrics::compute(test, &naive)?,
    ));

    let (moving, used) = moving_average_forecast(train, window, horizon);
    if used < window {
        warn!("Moving average window {} exceeds {} training days", window, train.len());
    }
    scored.push((
        BaselineKind::MovingAverage,
        format!("Moving Average ({used} days)"),
        PerformanceMetrics::compute(test, &moving)?,
    ));

    if let Some(model) = arima {
        let forecast = model.forecast(horizon, 0.95);
        scored.push((
            BaselineKind::Arima,
            model.spec.to_string(),
            PerformanceMetrics::compute(test, &forecast.mean)?,
        ));
    }

    scored.push((BaselineKind::Sarima, sarima.spec.to_string(), sarima_metrics));

    let rank = |key: fn(&PerformanceMetrics) -> f64| -> Vec<usize> {
        let mut order: Vec<usize> = (0..scored.len()).collect();
        order.sort_by(|&a, &b| key(&scored[a].2).total_cmp(&key(&scored[b].2)).then(a.cmp(&b)));
        let mut ranks = vec![0; scored.len()];
        for (position, index) in order.into_iter().enumerate() {
            ranks[index] = position + 1;
        }
        ranks
    };
    let rmse_ranks = rank(|m| m.rmse);
    let mae_ranks = rank(|m| m.mae);
    let mape_ranks = rank(|m| m.mape);

    let sarima_mae = sarima_metrics.mae;
    let sarima_beats_baselines = scored
        .iter()
        .filter(|(kind, _, _)| *kind != BaselineKind::Sarima)
        .all(|(_, _, m)| sarima_mae < m.mae);

    let mut scores: Vec<BaselineScore> = scored
        .into_iter()
        .enumerate()
        .map(|(i, (kind, description, metrics))| BaselineScore {
            kind,
            description,
            metrics,
            rmse_rank: rmse_ranks[i],
            mae_rank: mae_ranks[i],
            mape_rank: mape_ranks[i],
        })
        .collect();
    scores.sort_by_key(|s| s.mape_rank);
    let best_by_mape = scores[0].kind;

    info!(
        "Baselines by MAPE: {}",
        scores
            .iter()
            .map(|s| format!("{}={:.2}%", s.kind.as_str(), s.metrics.mape))
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(BaselineComparison {
        scores,
        best_by_mape,
        sarima_beats_baselines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitterConfig;
    use crate::ml::sarima::{self, SarimaSpec};

    fn weekly(n: usize) -> Vec<f64> {
        let profile = [70.0, 74.0, 78.0, 76.0, 72.0, 64.0, 62.0];
        (0..n)
            .map(|i| profile[i % 7] + ((i * 37) % 11) as f64 * 0.1)
            .collect()
    }

    #[test]
    fn test_naive_repeats_last_value() {
        assert_eq!(naive_forecast(&[1.0, 2.0, 9.0], 3), vec![9.0; 3]);
        assert!(naive_forecast(&[], 3).is_empty());
    }

    #[test]
    fn test_moving_average_window_and_fallback() {
        let train = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let (forecast, used) = moving_average_forecast(&train, 7, 2);
        assert_eq!(used, 7);
        assert_eq!(forecast, vec![6.0, 6.0]);

        let (forecast, used) = moving_average_forecast(&[2.0, 4.0], 7, 1);
        assert_eq!(used, 2);
        assert_eq!(forecast, vec![3.0]);
    }

    #[test]
    fn test_seasonal_model_outranks_flat_baselines() {
        let series = weekly(140);
        let (train, test) = series.split_at(112);
        let config = FitterConfig::default();
        let seasonal = sarima::fit(train, SarimaSpec::new((0, 0, 0), (0, 1, 0, 7)), &config)
            .into_result()
            .unwrap();
        let arima = sarima::fit(train, SarimaSpec::new((1, 0, 0), (0, 0, 0, 7)), &config)
            .into_result()
            .unwrap();
        let forecast = seasonal.forecast(test.len(), 0.95);
        let metrics = PerformanceMetrics::compute(test, &forecast.mean).unwrap();

        let comparison = compare(train, test, 7, Some(&arima), &seasonal, metrics).unwrap();
        assert_eq!(comparison.scores.len(), 4);
        assert_eq!(comparison.best_by_mape, BaselineKind::Sarima);
        assert!(comparison.sarima_beats_baselines);

        let sarima = comparison.score(BaselineKind::Sarima).unwrap();
        assert_eq!((sarima.rmse_rank, sarima.mae_rank, sarima.mape_rank), (1, 1, 1));
        let mut ranks: Vec<usize> = comparison.scores.iter().map(|s| s.mape_rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3, 4]);
        assert_eq!(
            comparison.score(BaselineKind::MovingAverage).unwrap().description,
            "Moving Average (7 days)"
        );
    }

    #[test]
    fn test_arima_skipped_when_absent() {
        let series = weekly(70);
        let (train, test) = series.split_at(56);
        let seasonal = sarima::fit(
            train,
            SarimaSpec::new((0, 0, 0), (0, 1, 0, 7)),
            &FitterConfig::default(),
        )
        .into_result()
        .unwrap();
        let metrics = PerformanceMetrics::compute(test, &seasonal.forecast(14, 0.95).mean).unwrap();

        let comparison = compare(train, test, 7, None, &seasonal, metrics).unwrap();
        assert_eq!(comparison.scores.len(), 3);
        assert!(comparison.score(BaselineKind::Arima).is_none());
    }
}
