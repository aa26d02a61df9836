use super::benefit::floor_to_minor;
use super::config::RunConfig;

/// One month's smoothing decision inputs. `raw_monthly` and
/// `previous_raw_monthly` are pre-smoothing twelfths; `previous_calculated`
/// is what last month actually paid after smoothing.
#[derive(Debug, Clone, Copy)]
pub struct StabilityInput {
    pub month: u32,
    pub raw_monthly: f64,
    pub annual_benefit: f64,
    pub previous_raw_monthly: Option<f64>,
    pub previous_calculated: Option<f64>,
    /// Sum committed for the year's earlier months.
    pub committed_so_far: f64,
}

/// Sticky-threshold smoothing plus safety-factor scheduling. The final
/// reconciliation month ignores both and pays the true-up: whatever of the
/// annual benefit has not been committed yet.
pub fn stabilize(input: &StabilityInput, config: &RunConfig) -> f64 {
    if input.month >= config.final_reconciliation_month() {
        return floor_to_minor((input.annual_benefit - input.committed_so_far).max(0.0));
    }

    if let (Some(previous_raw), Some(previous_calculated)) =
        (input.previous_raw_monthly, input.previous_calculated)
    {
        if (input.raw_monthly - previous_raw).abs() < config.sticky_threshold {
            return previous_calculated;
        }
    }

    floor_to_minor(input.raw_monthly * config.safety_factor)
}
