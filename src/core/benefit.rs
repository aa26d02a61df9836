use super::types::BenefitParameters;

/// Floor to the currency minor unit (two decimals).
pub fn floor_to_minor(amount: f64) -> f64 {
    (amount * 100.0).floor() / 100.0
}

/// Statutory annual benefit for an estimated annual income. Pure; single-hump
/// in income and continuous at both breakpoints.
pub fn annual_benefit(income: f64, params: &BenefitParameters) -> f64 {
    let income = income.max(0.0);
    let rateable = (income - params.personal_allowance - params.standard_allowance).max(0.0);
    let scaledown = (income - params.scaledown_ceiling).max(0.0);
    let capped = (params.benefit_rate * rateable).min(params.max_benefit);
    (capped - params.scaledown_rate * scaledown).max(0.0)
}

/// Monthly twelfth of the annual benefit, floored to the minor unit.
pub fn monthly_benefit(annual: f64) -> f64 {
    floor_to_minor(annual.max(0.0) / 12.0)
}
