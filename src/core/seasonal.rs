use tracing::debug;

use super::engine::{EstimationEngine, EstimationInput};
use super::types::{EngineKind, Period};

const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalConfig {
    /// History window handed to the fit; bounds cost deterministically
    /// instead of a wall-clock timebox.
    pub max_history_months: usize,
    /// Below this many observations the engine abstains.
    pub min_observations: usize,
}

impl Default for SeasonalConfig {
    fn default() -> Self {
        Self {
            max_history_months: 48,
            min_observations: 12,
        }
    }
}

/// Seasonal autoregressive engine, period 12. Fits AR(1) on the seasonally
/// differenced series; one relaxed re-attempt without seasonal differencing
/// when that fit degenerates; abstains when both fail. A zero-variance
/// history degenerates explicitly to repeating the constant.
pub struct SeasonalEngine {
    config: SeasonalConfig,
}

enum Fit {
    /// AR(1) on `x[t] - x[t-12]`.
    Seasonal { phi: f64 },
    /// AR(1) on mean-centered levels; the relaxed re-attempt.
    Level { phi: f64, mean: f64 },
}

impl SeasonalEngine {
    pub fn new(config: SeasonalConfig) -> Self {
        Self { config }
    }

    fn forecast_month(fit: &Fit, values: &[f64], horizon: u32) -> f64 {
        let n = values.len();
        let projected = match fit {
            Fit::Seasonal { phi } => {
                let last_diff = values[n - 1] - values[n - 13];
                let base = values[n - 1 + horizon as usize - 12];
                base + phi.powi(horizon as i32) * last_diff
            }
            Fit::Level { phi, mean } => mean + phi.powi(horizon as i32) * (values[n - 1] - mean),
        };
        projected.max(0.0)
    }
}

impl EstimationEngine for SeasonalEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Seasonal
    }

    fn estimate(&self, input: &EstimationInput<'_>) -> Option<f64> {
        if input.series.observation_count() < self.config.min_observations {
            return None;
        }
        let mut values = input.series.values_through(input.as_of);
        if values.len() > self.config.max_history_months {
            values.drain(..values.len() - self.config.max_history_months);
        }
        if values.len() < 12 {
            return None;
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance =
            values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        if variance <= EPSILON {
            // Flat history: the fit is undefined, the answer is not.
            return Some(12.0 * mean);
        }

        let fit = match fit_seasonal(&values) {
            Some(fit) => fit,
            None => {
                debug!(as_of = ?input.as_of, "seasonal fit degenerate, re-attempting on levels");
                fit_level(&values, mean)?
            }
        };

        let realized = input
            .series
            .window_sum(Period::new(input.as_of.year, 1), input.as_of);
        let forecast: f64 = (1..=(12 - input.as_of.month))
            .map(|h| Self::forecast_month(&fit, &values, h))
            .sum();
        Some(realized + forecast)
    }
}

/// Least-squares AR(1) coefficient for `series[t] = phi * series[t-1]`.
/// `None` when the regression is degenerate or non-stationary.
fn ar1_coefficient(series: &[f64]) -> Option<f64> {
    if series.len() < 2 {
        return None;
    }
    if series.iter().all(|d| d.abs() <= EPSILON) {
        // An exactly repeating pattern: nothing left to model.
        return Some(0.0);
    }
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for window in series.windows(2) {
        numerator += window[1] * window[0];
        denominator += window[0] * window[0];
    }
    if denominator <= EPSILON {
        return None;
    }
    let phi = numerator / denominator;
    (phi.is_finite() && phi.abs() < 1.0).then_some(phi)
}

fn fit_seasonal(values: &[f64]) -> Option<Fit> {
    if values.len() < 14 {
        return None;
    }
    let diffs: Vec<f64> = (12..values.len())
        .map(|i| values[i] - values[i - 12])
        .collect();
    ar1_coefficient(&diffs).map(|phi| Fit::Seasonal { phi })
}

fn fit_level(values: &[f64], mean: f64) -> Option<Fit> {
    let centered: Vec<f64> = values.iter().map(|v| v - mean).collect();
    ar1_coefficient(&centered).map(|phi| Fit::Level { phi, mean })
}
