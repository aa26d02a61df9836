use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::{BenefitParameters, EngineKind};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("settlement weights must sum to 12, got {sum}")]
    SettlementWeightSum { sum: f64 },
    #[error("settlement weights must be non-negative with at least one positive entry")]
    SettlementWeightRange,
    #[error("safety factor must be in (0, 1], got {0}")]
    SafetyFactor(f64),
    #[error("{field} must be a non-negative finite amount, got {value}")]
    NegativeAmount { field: &'static str, value: f64 },
    #[error("{field} must be a fraction in [0, 1], got {value}")]
    FractionRange { field: &'static str, value: f64 },
    #[error("worker count must be at least 1")]
    WorkerCount,
    #[error("no benefit parameters registered for year {0}")]
    MissingParameters(i32),
    #[error("benefit parameters for year {year} rejected: {reason}")]
    InvalidParameters { year: i32, reason: String },
}

/// Risk-condition toggles and thresholds for the quarantine evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    pub enabled: bool,
    pub earns_too_much_enabled: bool,
    pub earns_too_little_enabled: bool,
    pub wrong_payout_enabled: bool,
    /// Multiplier on the annualized rolling standard deviation used for the
    /// "earns too much" upper bound. Exposed rather than derived; the source
    /// system never justified a fixed width.
    pub upper_bound_width: f64,
    /// "Earns too little" triggers when the estimate falls below this
    /// fraction of the prior year's realized income.
    pub low_income_fraction: f64,
    /// "Wrong payout" triggers when the prior year closed with a realized
    /// overpayment above this amount.
    pub overpayment_limit: f64,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            earns_too_much_enabled: true,
            earns_too_little_enabled: false,
            wrong_payout_enabled: true,
            upper_bound_width: 1.0,
            low_income_fraction: 0.5,
            overpayment_limit: 10_000.0,
        }
    }
}

/// Per-run knobs. Everything here is operator-recognized configuration;
/// statutory constants live in `BenefitParameters`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Raw monthly deltas below this reuse the previous month's payout.
    pub sticky_threshold: f64,
    /// Interim months pay this fraction of the monthly amount; the final
    /// reconciliation month trues up.
    pub safety_factor: f64,
    /// Monthly amounts below this pay zero.
    pub trivial_payout_limit: f64,
    /// Engine used when no prior-year accuracy history exists, and the end
    /// of the fallback chain.
    pub fallback_engine: EngineKind,
    /// Relative monthly payout shares; must sum to 12. All-ones is the
    /// plain monthly twelfth.
    pub settlement_weights: [f64; 12],
    pub worker_count: usize,
    pub quarantine: QuarantineConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sticky_threshold: 0.0,
            safety_factor: 1.0,
            trivial_payout_limit: 0.0,
            fallback_engine: EngineKind::InYearExtrapolation,
            settlement_weights: [1.0; 12],
            worker_count: 8,
            quarantine: QuarantineConfig::default(),
        }
    }
}

impl RunConfig {
    /// Last month carrying a positive settlement weight; the year's true-up
    /// lands here. Month 12 under the default all-ones vector.
    pub fn final_reconciliation_month(&self) -> u32 {
        self.settlement_weights
            .iter()
            .rposition(|w| *w > 0.0)
            .map(|idx| idx as u32 + 1)
            .unwrap_or(12)
    }

    /// Cumulative payout share through `month`, as a fraction of the year.
    pub fn cumulative_share(&self, month: u32) -> f64 {
        let upto = (month.min(12)) as usize;
        self.settlement_weights[..upto].iter().sum::<f64>() / 12.0
    }
}

pub fn validate_run_config(config: &RunConfig) -> Result<(), ConfigError> {
    let sum: f64 = config.settlement_weights.iter().sum();
    if config.settlement_weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
        return Err(ConfigError::SettlementWeightRange);
    }
    if (sum - 12.0).abs() > WEIGHT_SUM_TOLERANCE {
        return Err(ConfigError::SettlementWeightSum { sum });
    }
    if !(config.safety_factor > 0.0 && config.safety_factor <= 1.0) {
        return Err(ConfigError::SafetyFactor(config.safety_factor));
    }
    for (field, value) in [
        ("sticky_threshold", config.sticky_threshold),
        ("trivial_payout_limit", config.trivial_payout_limit),
        ("quarantine.upper_bound_width", config.quarantine.upper_bound_width),
        ("quarantine.overpayment_limit", config.quarantine.overpayment_limit),
    ] {
        if !(value.is_finite() && value >= 0.0) {
            return Err(ConfigError::NegativeAmount { field, value });
        }
    }
    if !(0.0..=1.0).contains(&config.quarantine.low_income_fraction) {
        return Err(ConfigError::FractionRange {
            field: "quarantine.low_income_fraction",
            value: config.quarantine.low_income_fraction,
        });
    }
    if config.worker_count == 0 {
        return Err(ConfigError::WorkerCount);
    }
    Ok(())
}

pub fn validate_parameters(params: &BenefitParameters) -> Result<(), ConfigError> {
    let reject = |reason: &str| ConfigError::InvalidParameters {
        year: params.year,
        reason: reason.to_string(),
    };
    for (name, value) in [
        ("personal_allowance", params.personal_allowance),
        ("standard_allowance", params.standard_allowance),
        ("max_benefit", params.max_benefit),
        ("scaledown_ceiling", params.scaledown_ceiling),
    ] {
        if !(value.is_finite() && value >= 0.0) {
            return Err(reject(&format!("{name} must be a non-negative finite amount")));
        }
    }
    for (name, value) in [
        ("benefit_rate", params.benefit_rate),
        ("scaledown_rate", params.scaledown_rate),
    ] {
        if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
            return Err(reject(&format!("{name} must be a fraction in [0, 1]")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BenefitParameters {
        BenefitParameters {
            year: 2025,
            version: 1,
            personal_allowance: 60_000.0,
            standard_allowance: 10_000.0,
            benefit_rate: 0.175,
            max_benefit: 15_750.0,
            scaledown_rate: 0.063,
            scaledown_ceiling: 250_000.0,
        }
    }

    #[test]
    fn default_config_passes_validation() {
        validate_run_config(&RunConfig::default()).expect("default must validate");
    }

    #[test]
    fn settlement_weights_must_sum_to_twelve() {
        let mut config = RunConfig::default();
        config.settlement_weights[0] = 2.0;
        assert!(matches!(
            validate_run_config(&config),
            Err(ConfigError::SettlementWeightSum { .. })
        ));

        config.settlement_weights = [0.0; 12];
        config.settlement_weights[11] = 12.0;
        validate_run_config(&config).expect("december-only vector is valid");
        assert_eq!(config.final_reconciliation_month(), 12);
        assert_eq!(config.cumulative_share(11), 0.0);
        assert_eq!(config.cumulative_share(12), 1.0);
    }

    #[test]
    fn negative_weights_are_rejected() {
        let mut config = RunConfig::default();
        config.settlement_weights[3] = -1.0;
        config.settlement_weights[4] = 3.0;
        assert!(matches!(
            validate_run_config(&config),
            Err(ConfigError::SettlementWeightRange)
        ));
    }

    #[test]
    fn safety_factor_bounds() {
        let mut config = RunConfig::default();
        config.safety_factor = 0.0;
        assert!(validate_run_config(&config).is_err());
        config.safety_factor = 1.2;
        assert!(validate_run_config(&config).is_err());
        config.safety_factor = 0.85;
        assert!(validate_run_config(&config).is_ok());
    }

    #[test]
    fn final_reconciliation_month_follows_weights() {
        let mut config = RunConfig::default();
        assert_eq!(config.final_reconciliation_month(), 12);
        config.settlement_weights = [0.0; 12];
        config.settlement_weights[5] = 12.0;
        assert_eq!(config.final_reconciliation_month(), 6);
    }

    #[test]
    fn statutory_parameters_validate() {
        validate_parameters(&params()).expect("sample parameters are valid");

        let mut bad = params();
        bad.benefit_rate = 17.5;
        assert!(matches!(
            validate_parameters(&bad),
            Err(ConfigError::InvalidParameters { year: 2025, .. })
        ));

        let mut bad = params();
        bad.personal_allowance = -1.0;
        assert!(validate_parameters(&bad).is_err());
    }

    #[test]
    fn config_roundtrips_through_json() {
        let config = RunConfig::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: RunConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
    }
}
