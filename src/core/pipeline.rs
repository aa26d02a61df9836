use thiserror::Error;
use tracing::{debug, info, warn};

use super::benefit::{annual_benefit, monthly_benefit};
use super::config::RunConfig;
use super::engine::{EngineRegistry, EstimationInput};
use super::quarantine::{self, QuarantineContext};
use super::stability::{stabilize, StabilityInput};
use super::types::{
    BenefitParameters, EngineKind, IncomeEstimate, IncomeKind, IncomeSeries,
    MonthlyBenefitRecord, Period, PersonId, PreferredEngineSelection, RealizedYear,
    SelfAssessment,
};

/// Everything one person's monthly computation reads, fetched once per run.
/// Snapshots are immutable during compute; persistence happens afterwards.
#[derive(Debug, Clone)]
pub struct PersonSnapshot {
    pub person: PersonId,
    /// Full per-kind histories for kinds with any observation.
    pub series: Vec<IncomeSeries>,
    pub assessment: Option<SelfAssessment>,
    pub preferred: Vec<PreferredEngineSelection>,
    /// The previous month's record when it belongs to the same year.
    pub previous_record: Option<MonthlyBenefitRecord>,
    /// This month's record from an earlier run, if any.
    pub existing_record: Option<MonthlyBenefitRecord>,
    /// Sum committed over this year's earlier months.
    pub committed_so_far: f64,
    pub prior_year: Option<RealizedYear>,
}

#[derive(Debug, Clone)]
pub struct PersonMonthOutcome {
    pub record: MonthlyBenefitRecord,
    /// Every engine's proposal this month, retained for the accuracy loop.
    pub proposals: Vec<IncomeEstimate>,
    /// Winning (kind, engine, estimate) triples after the fallback chain.
    pub chosen: Vec<(IncomeKind, EngineKind, f64)>,
}

#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("{person} {period} is already exported; recomputation rejected")]
    ExportFinality { person: PersonId, period: Period },
}

/// Strictly sequential per-person pipeline for one month: estimate per kind
/// with fallback, convert to the statutory benefit, smooth, quarantine,
/// apply de-minimis, and assemble the record.
pub fn compute_person_month(
    snapshot: &PersonSnapshot,
    period: Period,
    params: &BenefitParameters,
    config: &RunConfig,
    registry: &EngineRegistry,
) -> Result<PersonMonthOutcome, PipelineError> {
    if let Some(existing) = &snapshot.existing_record {
        if existing.benefit_transferred.is_some() {
            return Err(PipelineError::ExportFinality {
                person: snapshot.person.clone(),
                period,
            });
        }
    }

    let mut proposals = Vec::new();
    let mut chosen = Vec::new();
    for kind in IncomeKind::ALL {
        let causal = causal_series(snapshot, kind, period);
        let assessment = snapshot
            .assessment
            .as_ref()
            .filter(|a| a.year == period.year)
            .and_then(|a| a.amount(kind));
        if causal.is_empty() && assessment.is_none() {
            continue;
        }
        let input = EstimationInput {
            series: &causal,
            as_of: period,
            self_assessment: assessment,
        };

        let mut by_engine = Vec::new();
        for engine in registry.engines() {
            if let Some(estimate) = engine.estimate(&input) {
                proposals.push(IncomeEstimate {
                    person: snapshot.person.clone(),
                    as_of: period,
                    kind,
                    engine: engine.kind(),
                    estimated_year_result: estimate,
                    actual_year_result: None,
                });
                by_engine.push((engine.kind(), estimate));
            }
        }

        let preferred = preferred_engine(snapshot, kind, period.year, config);
        if let Some((engine, estimate)) = pick_with_fallback(&by_engine, preferred) {
            if engine != preferred {
                debug!(
                    person = %snapshot.person,
                    kind = ?kind,
                    preferred = ?preferred,
                    used = ?engine,
                    "preferred engine abstained, fell back"
                );
            }
            chosen.push((kind, engine, estimate));
        }
    }

    if chosen.is_empty() {
        info!(person = %snapshot.person, "no engine produced an estimate; month left unknown");
        return Ok(PersonMonthOutcome {
            record: MonthlyBenefitRecord {
                person: snapshot.person.clone(),
                period,
                estimated_year_result: None,
                estimated_year_benefit: None,
                benefit_calculated: None,
                benefit_transferred: None,
                prior_benefit_transferred: snapshot.committed_so_far,
                quarantined: false,
                quarantine_reason: None,
            },
            proposals,
            chosen,
        });
    }

    let estimated_year_result: f64 = chosen.iter().map(|(_, _, e)| e).sum();
    let annual = annual_benefit(estimated_year_result, params);
    let raw_monthly = monthly_benefit(annual);

    let trailing = trailing_monthly_totals(snapshot, period);
    let quarantine_reason = quarantine::evaluate(
        &QuarantineContext {
            annual_estimate: estimated_year_result,
            trailing_monthly_totals: &trailing,
            prior_year: snapshot.prior_year.as_ref(),
            params,
        },
        &config.quarantine,
    );

    let mut amount = match quarantine_reason {
        Some(reason) => {
            warn!(person = %snapshot.person, reason = ?reason, "month quarantined");
            quarantine::settlement_payout(annual, period.month, snapshot.committed_so_far, config)
        }
        None => stabilize(
            &StabilityInput {
                month: period.month,
                raw_monthly,
                annual_benefit: annual,
                previous_raw_monthly: snapshot
                    .previous_record
                    .as_ref()
                    .and_then(|r| r.estimated_year_benefit)
                    .map(monthly_benefit),
                previous_calculated: snapshot
                    .previous_record
                    .as_ref()
                    .and_then(|r| r.benefit_calculated),
                committed_so_far: snapshot.committed_so_far,
            },
            config,
        ),
    };

    if amount > 0.0 && amount < config.trivial_payout_limit {
        debug!(person = %snapshot.person, amount, "below de-minimis limit, paying zero");
        amount = 0.0;
    }

    Ok(PersonMonthOutcome {
        record: MonthlyBenefitRecord {
            person: snapshot.person.clone(),
            period,
            estimated_year_result: Some(estimated_year_result),
            estimated_year_benefit: Some(annual),
            benefit_calculated: Some(amount),
            benefit_transferred: None,
            prior_benefit_transferred: snapshot.committed_so_far,
            quarantined: quarantine_reason.is_some(),
            quarantine_reason,
        },
        proposals,
        chosen,
    })
}

fn causal_series(snapshot: &PersonSnapshot, kind: IncomeKind, as_of: Period) -> IncomeSeries {
    snapshot
        .series
        .iter()
        .find(|s| s.kind == kind)
        .map(|s| s.truncated(as_of))
        .unwrap_or_else(|| IncomeSeries::new(kind))
}

fn preferred_engine(
    snapshot: &PersonSnapshot,
    kind: IncomeKind,
    year: i32,
    config: &RunConfig,
) -> EngineKind {
    snapshot
        .preferred
        .iter()
        .find(|p| p.kind == kind && p.year == year)
        .map(|p| p.engine)
        .unwrap_or(config.fallback_engine)
}

/// The preferred engine's estimate when it produced one, otherwise the first
/// producing engine in priority order.
fn pick_with_fallback(
    by_engine: &[(EngineKind, f64)],
    preferred: EngineKind,
) -> Option<(EngineKind, f64)> {
    by_engine
        .iter()
        .find(|(kind, _)| *kind == preferred)
        .or_else(|| {
            EngineKind::PRIORITY
                .iter()
                .find_map(|kind| by_engine.iter().find(|(k, _)| k == kind))
        })
        .copied()
}

/// Combined monthly income totals over the trailing twelve months ending at
/// `as_of`, starting no earlier than the person's first observation.
fn trailing_monthly_totals(snapshot: &PersonSnapshot, as_of: Period) -> Vec<f64> {
    let Some(first) = snapshot
        .series
        .iter()
        .filter_map(|s| s.first_observed())
        .min()
    else {
        return Vec::new();
    };
    let mut totals = Vec::new();
    for back in (0..12u32).rev() {
        let month = as_of.minus_months(back);
        if month < first {
            continue;
        }
        totals.push(
            snapshot
                .series
                .iter()
                .filter_map(|s| s.truncated(as_of).amount_at(month))
                .sum(),
        );
    }
    totals
}
