use super::seasonal::{SeasonalConfig, SeasonalEngine};
use super::types::{EngineKind, IncomeSeries, Period};

/// Everything an engine may look at for one (person, kind, as-of) estimate.
/// The series is the causal view: no observation after `as_of`.
pub struct EstimationInput<'a> {
    pub series: &'a IncomeSeries,
    pub as_of: Period,
    /// The person's advance self-assessment for this kind and year, when filed.
    pub self_assessment: Option<f64>,
}

/// A forecasting strategy. `None` means insufficient data, never an error.
pub trait EstimationEngine: Send + Sync {
    fn kind(&self) -> EngineKind;
    fn estimate(&self, input: &EstimationInput<'_>) -> Option<f64>;
}

/// Explicit engine registry built once at startup. Iteration follows
/// `EngineKind::PRIORITY`.
pub struct EngineRegistry {
    engines: Vec<Box<dyn EstimationEngine>>,
}

impl EngineRegistry {
    pub fn standard(seasonal: SeasonalConfig) -> Self {
        let mut engines: Vec<Box<dyn EstimationEngine>> = vec![
            Box::new(InYearExtrapolation),
            Box::new(TwelveMonthsSummation),
            Box::new(TwoYearsSummation),
            Box::new(SelfReported),
            Box::new(SeasonalEngine::new(seasonal)),
            Box::new(MonthlyContinuation),
        ];
        engines.sort_by_key(|e| e.kind().priority_rank());
        Self { engines }
    }

    pub fn engines(&self) -> impl Iterator<Item = &dyn EstimationEngine> {
        self.engines.iter().map(|e| e.as_ref())
    }

    pub fn by_kind(&self, kind: EngineKind) -> Option<&dyn EstimationEngine> {
        self.engines
            .iter()
            .find(|e| e.kind() == kind)
            .map(|e| e.as_ref())
    }
}

/// Annualizes the observed months of the as-of year. A leading run of
/// zero-valued months is earning that has not started, not zero income:
/// those months are omitted from both the average and the projection span.
pub struct InYearExtrapolation;

impl EstimationEngine for InYearExtrapolation {
    fn kind(&self) -> EngineKind {
        EngineKind::InYearExtrapolation
    }

    fn estimate(&self, input: &EstimationInput<'_>) -> Option<f64> {
        let year = input.as_of.year;
        let months: Vec<f64> = (1..=input.as_of.month)
            .map(|m| input.series.amount_at(Period::new(year, m)).unwrap_or(0.0))
            .collect();
        let omitted = months.iter().take_while(|a| **a == 0.0).count();
        let remaining = &months[omitted..];
        if remaining.is_empty() {
            return None;
        }
        let sum: f64 = remaining.iter().sum();
        let mean = sum / remaining.len() as f64;
        Some((12 - omitted) as f64 * mean)
    }
}

/// Sum of the trailing 12 calendar months ending at the as-of month. Spans
/// the year boundary; abstains unless the same month of the prior year was
/// observed, so the window is backed by a full year of history.
pub struct TwelveMonthsSummation;

impl EstimationEngine for TwelveMonthsSummation {
    fn kind(&self) -> EngineKind {
        EngineKind::TwelveMonthsSummation
    }

    fn estimate(&self, input: &EstimationInput<'_>) -> Option<f64> {
        if !input.series.has_observation(input.as_of.minus_months(12)) {
            return None;
        }
        let start = input.as_of.minus_months(11);
        Some(input.series.window_sum(start, input.as_of))
    }
}

/// Trailing 24 months, annualized: slower to react than the 12-month sum,
/// but damps one-off outliers.
pub struct TwoYearsSummation;

impl EstimationEngine for TwoYearsSummation {
    fn kind(&self) -> EngineKind {
        EngineKind::TwoYearsSummation
    }

    fn estimate(&self, input: &EstimationInput<'_>) -> Option<f64> {
        if !input.series.has_observation(input.as_of.minus_months(24)) {
            return None;
        }
        let start = input.as_of.minus_months(23);
        Some(input.series.window_sum(start, input.as_of) / 2.0)
    }
}

/// Last observed month times twelve. Fast and high-variance; kept as a
/// comparison baseline and the end of the fallback chain.
pub struct MonthlyContinuation;

impl EstimationEngine for MonthlyContinuation {
    fn kind(&self) -> EngineKind {
        EngineKind::MonthlyContinuation
    }

    fn estimate(&self, input: &EstimationInput<'_>) -> Option<f64> {
        input.series.last_observed().map(|(_, amount)| amount * 12.0)
    }
}

/// The person's own advance assessment, verbatim. No computation.
pub struct SelfReported;

impl EstimationEngine for SelfReported {
    fn kind(&self) -> EngineKind {
        EngineKind::SelfReported
    }

    fn estimate(&self, input: &EstimationInput<'_>) -> Option<f64> {
        input.self_assessment
    }
}
