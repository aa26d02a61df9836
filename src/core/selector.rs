use super::types::{
    EngineAccuracySummary, EngineKind, IncomeEstimate, IncomeKind, PersonId,
    PreferredEngineSelection,
};

/// Grades one engine's retained monthly estimates against the realized
/// annual result. `None` when the year never realized a non-zero result or
/// the engine never produced an estimate: accuracy is undefined, not zero.
pub fn accuracy_summary(
    person: &str,
    year: i32,
    kind: IncomeKind,
    engine: EngineKind,
    estimates: &[IncomeEstimate],
    actual: f64,
) -> Option<EngineAccuracySummary> {
    if actual.abs() < f64::EPSILON {
        return None;
    }
    let errors: Vec<f64> = estimates
        .iter()
        .filter(|e| e.engine == engine && e.kind == kind && e.as_of.year == year)
        .map(|e| 100.0 * (e.estimated_year_result - actual) / actual)
        .collect();
    if errors.is_empty() {
        return None;
    }
    let count = errors.len() as f64;
    let mean = errors.iter().sum::<f64>() / count;
    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / count).sqrt();
    Some(EngineAccuracySummary {
        person: person.to_string(),
        year,
        kind,
        engine,
        mean_error_percent: mean,
        rmse_percent: rmse,
        months_evaluated: errors.len() as u32,
    })
}

/// Designates next year's preferred engine from the prior year's summaries:
/// minimum RMSE, ties broken by the fixed engine priority order, configured
/// fallback when no summary exists. Identical summaries always yield the
/// identical selection.
pub fn select_preferred(
    person: &PersonId,
    selection_year: i32,
    kind: IncomeKind,
    summaries: &[EngineAccuracySummary],
    fallback: EngineKind,
) -> PreferredEngineSelection {
    let mut candidates: Vec<&EngineAccuracySummary> = summaries
        .iter()
        .filter(|s| s.kind == kind && s.rmse_percent.is_finite())
        .collect();
    candidates.sort_by(|a, b| {
        a.rmse_percent
            .total_cmp(&b.rmse_percent)
            .then_with(|| a.engine.priority_rank().cmp(&b.engine.priority_rank()))
    });

    match candidates.first() {
        Some(best) => PreferredEngineSelection {
            person: person.clone(),
            year: selection_year,
            kind,
            engine: best.engine,
            based_on_year: Some(best.year),
        },
        None => PreferredEngineSelection {
            person: person.clone(),
            year: selection_year,
            kind,
            engine: fallback,
            based_on_year: None,
        },
    }
}
