//! Grid search over seasonal ARIMA orders, scored by AIC.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{FitterConfig, OrderRange, SearchConfig};
use crate::error::{ForecastError, Result};
use crate::ml::evaluation::PerformanceMetrics;
use crate::ml::sarima::{self, FitOutcome, FittedSarima, SarimaSpec};

/// Fits one candidate spec; the seam tests use to inject synthetic scores.
pub trait CandidateFitter: Send + Sync {
    fn fit(&self, train: &[f64], spec: SarimaSpec) -> FitOutcome;
}

/// Conditional-sum-of-squares fitter.
#[derive(Debug, Clone, Copy, Default)]
pub struct SarimaFitter {
    pub config: FitterConfig,
}

impl SarimaFitter {
    pub fn new(config: FitterConfig) -> Self {
        Self { config }
    }
}

impl CandidateFitter for SarimaFitter {
    fn fit(&self, train: &[f64], spec: SarimaSpec) -> FitOutcome {
        sarima::fit(train, spec, &self.config)
    }
}

/// Inclusive parameter ranges plus the seasonal periods to compare.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    pub p: OrderRange,
    pub d: OrderRange,
    pub q: OrderRange,
    pub seasonal_p: OrderRange,
    pub seasonal_d: OrderRange,
    pub seasonal_q: OrderRange,
    pub periods: Vec<usize>,
}

impl From<&SearchConfig> for SearchSpace {
    fn from(config: &SearchConfig) -> Self {
        Self {
            p: config.p,
            d: config.d,
            q: config.q,
            seasonal_p: config.seasonal_p,
            seasonal_d: config.seasonal_d,
            seasonal_q: config.seasonal_q,
            periods: config.seasonal_periods.clone(),
        }
    }
}

impl SearchSpace {
    /// Every spec in enumeration order.
    ///
    /// Specs without a seasonal part are only emitted for the first period,
    /// since the period has no effect on them.
    pub fn candidates(&self) -> Vec<SarimaSpec> {
        let mut specs = Vec::new();
        for (i, &s) in self.periods.iter().enumerate() {
            for p in self.p.values() {
                for d in self.d.values() {
                    for q in self.q.values() {
                        for sp in self.seasonal_p.values() {
                            for sd in self.seasonal_d.values() {
                                for sq in self.seasonal_q.values() {
                                    let spec = SarimaSpec::new((p, d, q), (sp, sd, sq, s));
                                    if i > 0 && spec.is_non_seasonal() {
                                        continue;
                                    }
                                    specs.push(spec);
                                }
                            }
                        }
                    }
                }
            }
        }
        specs
    }
}

/// Scored candidate as reported to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelCandidate {
    pub spec: SarimaSpec,
    pub aic: f64,
    pub bic: f64,
    pub log_likelihood: f64,
    pub held_out_mae: Option<f64>,
    pub converged: bool,
}

impl ModelCandidate {
    fn from_model(model: &FittedSarima, held_out_mae: Option<f64>) -> Self {
        Self {
            spec: model.spec,
            aic: model.aic,
            bic: model.bic,
            log_likelihood: model.log_likelihood,
            held_out_mae,
            converged: model.converged,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub best: FittedSarima,
    pub best_candidate: ModelCandidate,
    /// Converged candidates by ascending AIC, truncated to the configured size.
    pub ranked: Vec<ModelCandidate>,
    /// Lowest-AIC converged candidate without a seasonal part.
    pub best_non_seasonal: Option<FittedSarima>,
    pub tried: usize,
    pub converged: usize,
}

pub struct CandidateSearchEngine<F> {
    fitter: F,
    space: SearchSpace,
    workers: usize,
    top_n: usize,
}

impl<F: CandidateFitter> CandidateSearchEngine<F> {
    pub fn new(fitter: F, space: SearchSpace) -> Self {
        Self {
            fitter,
            space,
            workers: 0,
            top_n: 20,
        }
    }

    /// Worker threads for candidate fits. Zero shares the global pool.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_top_n(mut self, top_n: usize) -> Self {
        self.top_n = top_n;
        self
    }

    pub fn search(&self, train: &[f64], test: Option<&[f64]>) -> Result<SearchOutcome> {
        let specs = self.space.candidates();
        let tried = specs.len();
        info!(
            "Searching {} candidates over periods {:?} on {} observations",
            tried,
            self.space.periods,
            train.len()
        );

        let fit_one = |spec: &SarimaSpec| -> Option<(FittedSarima, ModelCandidate)> {
            match self.fitter.fit(train, *spec) {
                FitOutcome::Converged(model) if model.converged && model.aic.is_finite() => {
                    let held_out_mae = test.filter(|t| !t.is_empty()).and_then(|t| {
                        let forecast = model.forecast(t.len(), 0.95);
                        PerformanceMetrics::compute(t, &forecast.mean)
                            .ok()
                            .map(|m| m.mae)
                    });
                    let candidate = ModelCandidate::from_model(&model, held_out_mae);
                    Some((*model, candidate))
                }
                FitOutcome::Converged(_) => {
                    debug!("{} discarded: not converged", spec);
                    None
                }
                FitOutcome::Failed(reason) => {
                    debug!("{} discarded: {}", spec, reason);
                    None
                }
            }
        };

        // Collect keeps enumeration order regardless of completion order
        let results: Vec<Option<(FittedSarima, ModelCandidate)>> = if self.workers == 0 {
            specs.par_iter().map(fit_one).collect()
        } else {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
                .map_err(|e| ForecastError::Validation(format!("cannot build worker pool: {e}")))?;
            pool.install(|| specs.par_iter().map(fit_one).collect())
        };

        let mut converged: Vec<(usize, FittedSarima, ModelCandidate)> = results
            .into_iter()
            .enumerate()
            .filter_map(|(i, r)| r.map(|(m, c)| (i, m, c)))
            .collect();
        let converged_count = converged.len();
        if converged.is_empty() {
            return Err(ForecastError::NoConvergentModel { tried });
        }

        converged.sort_by(|a, b| a.2.aic.total_cmp(&b.2.aic).then(a.0.cmp(&b.0)));
        let ranked: Vec<ModelCandidate> = converged
            .iter()
            .take(self.top_n.max(1))
            .map(|(_, _, c)| c.clone())
            .collect();
        let best_non_seasonal = converged
            .iter()
            .find(|(_, m, _)| m.spec.is_non_seasonal())
            .map(|(_, m, _)| m.clone());
        let (_, best, best_candidate) = converged.swap_remove(0);

        info!(
            "Selected {} (aic={:.3}, held-out mae={}) from {}/{} converged",
            best.spec,
            best.aic,
            best_candidate
                .held_out_mae
                .map(|m| format!("{m:.3}"))
                .unwrap_or_else(|| "n/a".to_string()),
            converged_count,
            tried
        );

        Ok(SearchOutcome {
            best,
            best_candidate,
            ranked,
            best_non_seasonal,
            tried,
            converged: converged_count,
        })
    }
}
