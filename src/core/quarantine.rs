use tracing::debug;

use super::benefit::{annual_benefit, floor_to_minor};
use super::config::{QuarantineConfig, RunConfig};
use super::types::{BenefitParameters, QuarantineReason, RealizedYear};

/// Inputs for one run's quarantine decision. `trailing_monthly_totals` are
/// the person's combined monthly incomes over the trailing window (at most
/// twelve months), used for the upper-bound spread.
#[derive(Debug, Clone)]
pub struct QuarantineContext<'a> {
    pub annual_estimate: f64,
    pub trailing_monthly_totals: &'a [f64],
    pub prior_year: Option<&'a RealizedYear>,
    pub params: &'a BenefitParameters,
}

/// Re-evaluated every run; never sticky. `None` means payouts flow normally.
/// Conditions are checked in a fixed order, so the first reason wins when
/// several hold at once.
pub fn evaluate(
    context: &QuarantineContext<'_>,
    config: &QuarantineConfig,
) -> Option<QuarantineReason> {
    if !config.enabled {
        return None;
    }

    if config.earns_too_much_enabled {
        let spread = rolling_std(context.trailing_monthly_totals);
        let upper = context.annual_estimate + config.upper_bound_width * spread * 12.0;
        let point = annual_benefit(context.annual_estimate, context.params);
        if point > 0.0 && annual_benefit(upper, context.params) == 0.0 {
            debug!(
                estimate = context.annual_estimate,
                upper, "quarantine: upper income bound erases the benefit"
            );
            return Some(QuarantineReason::EarnsTooMuch);
        }
    }

    if config.earns_too_little_enabled {
        if let Some(prior) = context.prior_year {
            if prior.actual_year_result > 0.0
                && context.annual_estimate
                    < config.low_income_fraction * prior.actual_year_result
            {
                return Some(QuarantineReason::EarnsTooLittle);
            }
        }
    }

    if config.wrong_payout_enabled {
        if let Some(prior) = context.prior_year {
            if prior.overpayment > config.overpayment_limit {
                return Some(QuarantineReason::PriorOverpayment);
            }
        }
    }

    None
}

/// Payout for a quarantined month: zero outside settlement months; inside
/// one, the cumulative weighted share of the annual benefit minus what the
/// year has already committed.
pub fn settlement_payout(
    annual_benefit: f64,
    month: u32,
    committed_so_far: f64,
    config: &RunConfig,
) -> f64 {
    let weight = config.settlement_weights[(month - 1) as usize];
    if weight <= 0.0 {
        return 0.0;
    }
    let target = annual_benefit * config.cumulative_share(month);
    floor_to_minor((target - committed_so_far).max(0.0))
}

/// Population standard deviation of the trailing window; zero when fewer
/// than two points exist.
pub fn rolling_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
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

    fn realized(overpayment: f64) -> RealizedYear {
        RealizedYear {
            person: "p1".to_string(),
            year: 2024,
            actual_year_result: 240_000.0,
            benefit_owed: 15_750.0,
            benefit_paid: 15_750.0 + overpayment,
            overpayment,
        }
    }

    #[test]
    fn steady_income_is_not_quarantined() {
        let p = params();
        let totals = [20_000.0; 12];
        let context = QuarantineContext {
            annual_estimate: 240_000.0,
            trailing_monthly_totals: &totals,
            prior_year: None,
            params: &p,
        };
        assert_eq!(evaluate(&context, &QuarantineConfig::default()), None);
    }

    #[test]
    fn volatile_income_near_the_kill_point_earns_too_much() {
        let p = params();
        // Point estimate 480,000 still pays a sliver; the upper bound does not.
        let mut totals = [20_000.0; 12];
        totals[6] = 260_000.0;
        let context = QuarantineContext {
            annual_estimate: 480_000.0,
            trailing_monthly_totals: &totals,
            prior_year: None,
            params: &p,
        };
        assert!(annual_benefit(480_000.0, &p) > 0.0);
        assert_eq!(
            evaluate(&context, &QuarantineConfig::default()),
            Some(QuarantineReason::EarnsTooMuch)
        );
    }

    #[test]
    fn zero_point_benefit_never_triggers_earns_too_much() {
        let p = params();
        let totals = [60_000.0; 12];
        let context = QuarantineContext {
            annual_estimate: 720_000.0,
            trailing_monthly_totals: &totals,
            prior_year: None,
            params: &p,
        };
        assert_eq!(evaluate(&context, &QuarantineConfig::default()), None);
    }

    #[test]
    fn prior_overpayment_above_the_limit_quarantines() {
        let p = params();
        let totals = [20_000.0; 12];
        let prior = realized(12_000.0);
        let context = QuarantineContext {
            annual_estimate: 240_000.0,
            trailing_monthly_totals: &totals,
            prior_year: Some(&prior),
            params: &p,
        };
        assert_eq!(
            evaluate(&context, &QuarantineConfig::default()),
            Some(QuarantineReason::PriorOverpayment)
        );

        let small = realized(9_999.0);
        let context = QuarantineContext {
            prior_year: Some(&small),
            ..context
        };
        assert_eq!(evaluate(&context, &QuarantineConfig::default()), None);
    }

    #[test]
    fn earns_too_little_is_opt_in() {
        let p = params();
        let totals = [2_000.0; 12];
        let prior = realized(0.0);
        let context = QuarantineContext {
            annual_estimate: 24_000.0,
            trailing_monthly_totals: &totals,
            prior_year: Some(&prior),
            params: &p,
        };
        assert_eq!(evaluate(&context, &QuarantineConfig::default()), None);

        let config = QuarantineConfig {
            earns_too_little_enabled: true,
            ..QuarantineConfig::default()
        };
        assert_eq!(
            evaluate(&context, &config),
            Some(QuarantineReason::EarnsTooLittle)
        );
    }

    #[test]
    fn master_flag_disables_every_condition() {
        let p = params();
        let totals = [20_000.0; 12];
        let prior = realized(50_000.0);
        let context = QuarantineContext {
            annual_estimate: 240_000.0,
            trailing_monthly_totals: &totals,
            prior_year: Some(&prior),
            params: &p,
        };
        let config = QuarantineConfig {
            enabled: false,
            ..QuarantineConfig::default()
        };
        assert_eq!(evaluate(&context, &config), None);
    }

    #[test]
    fn settlement_pays_only_in_weighted_months() {
        let mut config = RunConfig::default();
        config.settlement_weights = [0.0; 12];
        config.settlement_weights[11] = 12.0;
        for month in 1..=11 {
            assert_eq!(settlement_payout(15_750.0, month, 0.0, &config), 0.0);
        }
        assert_eq!(settlement_payout(15_750.0, 12, 0.0, &config), 15_750.0);
        assert_eq!(settlement_payout(15_750.0, 12, 6_000.0, &config), 9_750.0);
    }

    #[test]
    fn split_settlement_honours_cumulative_shares() {
        let mut config = RunConfig::default();
        config.settlement_weights = [0.0; 12];
        config.settlement_weights[5] = 6.0;
        config.settlement_weights[11] = 6.0;
        // June: half the year's benefit; December: the rest.
        let june = settlement_payout(12_000.0, 6, 0.0, &config);
        assert_eq!(june, 6_000.0);
        let december = settlement_payout(12_000.0, 12, june, &config);
        assert_eq!(december, 6_000.0);
    }

    #[test]
    fn rolling_std_of_a_flat_window_is_zero() {
        assert_eq!(rolling_std(&[5.0; 12]), 0.0);
        assert_eq!(rolling_std(&[]), 0.0);
        assert_eq!(rolling_std(&[7.0]), 0.0);
        assert!(rolling_std(&[0.0, 10.0]) > 0.0);
    }
}
