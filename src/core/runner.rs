use std::sync::Arc;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::benefit::annual_benefit;
use super::config::{validate_parameters, validate_run_config, ConfigError, RunConfig};
use super::engine::EngineRegistry;
use super::pipeline::{compute_person_month, PersonSnapshot, PipelineError};
use super::selector::{accuracy_summary, select_preferred};
use super::sources::{
    BenefitParameterStore, BenefitRecordStore, EstimateStore, IncomeObservationSource,
    SelectionStore, SelfReportedAssessmentSource, StoreError,
};
use super::types::{EngineKind, IncomeKind, Period, PersonId, RealizedYear};

/// The external collaborators one run talks to. Shared handles so person
/// tasks can run on the worker pool.
#[derive(Clone)]
pub struct Services {
    pub observations: Arc<dyn IncomeObservationSource>,
    pub assessments: Arc<dyn SelfReportedAssessmentSource>,
    pub parameters: Arc<dyn BenefitParameterStore>,
    pub records: Arc<dyn BenefitRecordStore>,
    pub estimates: Arc<dyn EstimateStore>,
    pub selections: Arc<dyn SelectionStore>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub period: Period,
    pub processed: usize,
    pub unknown: usize,
    pub quarantined: usize,
    pub finality_rejections: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct YearCloseSummary {
    pub year: i32,
    pub persons_closed: usize,
    pub selections_written: usize,
}

/// One monthly batch: snapshot every person's reads, compute on a bounded
/// worker pool, then persist sequentially in person order. Aborts before
/// touching any person when the configuration or the year's statutory
/// parameters are invalid.
pub async fn run_monthly_batch(
    services: &Services,
    persons: &[PersonId],
    period: Period,
    config: &RunConfig,
    registry: Arc<EngineRegistry>,
) -> Result<RunSummary, ConfigError> {
    validate_run_config(config)?;
    let params = services
        .parameters
        .parameters(period.year)
        .ok_or(ConfigError::MissingParameters(period.year))?;
    validate_parameters(&params)?;

    let snapshots: Vec<PersonSnapshot> = persons
        .iter()
        .map(|person| build_snapshot(services, person, period))
        .collect();

    let params = Arc::new(params);
    let config_shared = Arc::new(config.clone());
    let semaphore = Arc::new(Semaphore::new(config.worker_count));
    let mut tasks = JoinSet::new();
    for (index, snapshot) in snapshots.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let params = params.clone();
        let config = config_shared.clone();
        let registry = registry.clone();
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("run semaphore is never closed");
            let result = compute_person_month(&snapshot, period, &params, &config, &registry);
            (index, result)
        });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (index, result) = joined.expect("person task must not panic");
        outcomes.push((index, result));
    }
    outcomes.sort_by_key(|(index, _)| *index);

    let mut summary = RunSummary {
        period,
        processed: 0,
        unknown: 0,
        quarantined: 0,
        finality_rejections: 0,
    };
    for (_, result) in outcomes {
        match result {
            Ok(outcome) => {
                let unknown = outcome.record.benefit_calculated.is_none();
                let quarantined = outcome.record.quarantined;
                match services.records.upsert(outcome.record) {
                    Ok(()) => {
                        summary.processed += 1;
                        if unknown {
                            summary.unknown += 1;
                        }
                        if quarantined {
                            summary.quarantined += 1;
                        }
                        services.estimates.record_proposals(outcome.proposals);
                    }
                    Err(StoreError::RecordExported { person, period }) => {
                        warn!(%person, %period, "record exported since snapshot; skipping");
                        summary.finality_rejections += 1;
                    }
                    Err(error) => {
                        warn!(%error, "record upsert rejected");
                    }
                }
            }
            Err(PipelineError::ExportFinality { person, period }) => {
                warn!(%person, %period, "recompute of exported month rejected");
                summary.finality_rejections += 1;
            }
        }
    }

    info!(
        period = ?summary.period,
        processed = summary.processed,
        unknown = summary.unknown,
        quarantined = summary.quarantined,
        finality_rejections = summary.finality_rejections,
        "monthly batch finished"
    );
    Ok(summary)
}

fn build_snapshot(services: &Services, person: &str, period: Period) -> PersonSnapshot {
    let series: Vec<_> = IncomeKind::ALL
        .iter()
        .map(|kind| services.observations.series(person, *kind))
        .filter(|s| !s.is_empty())
        .collect();
    let preferred = IncomeKind::ALL
        .iter()
        .filter_map(|kind| services.selections.preferred(person, period.year, *kind))
        .collect();
    let committed_so_far = services
        .records
        .year_records(person, period.year)
        .iter()
        .filter(|r| r.period < period)
        .map(|r| r.committed())
        .sum();
    PersonSnapshot {
        person: person.to_string(),
        series,
        assessment: services.assessments.assessment(person, period.year),
        preferred,
        previous_record: (period.month > 1)
            .then(|| services.records.record(person, period.pred()))
            .flatten(),
        existing_record: services.records.record(person, period),
        committed_so_far,
        prior_year: services.selections.realized(person, period.year - 1),
    }
}

/// Closes a realized year: fills `actual_year_result` on retained estimates,
/// grades every engine, designates next year's preferred engines, and books
/// the realized payout against what the year actually owed.
pub async fn run_year_close(
    services: &Services,
    persons: &[PersonId],
    year: i32,
    config: &RunConfig,
) -> Result<YearCloseSummary, ConfigError> {
    validate_run_config(config)?;
    let params = services
        .parameters
        .parameters(year)
        .ok_or(ConfigError::MissingParameters(year))?;
    validate_parameters(&params)?;

    let mut summary = YearCloseSummary {
        year,
        persons_closed: 0,
        selections_written: 0,
    };
    let start = Period::new(year, 1);
    let end = Period::new(year, 12);

    for person in persons {
        let mut actual_total = 0.0;
        let mut any_kind_closed = false;
        for kind in IncomeKind::ALL {
            let series = services.observations.series(person, kind);
            if series.is_empty() || series.window_sum(start, end) == 0.0 {
                continue;
            }
            let actual = series.window_sum(start, end);
            actual_total += actual;
            any_kind_closed = true;

            services.estimates.set_actual(person, year, kind, actual);
            let estimates = services.estimates.estimates(person, year, kind);
            let summaries: Vec<_> = EngineKind::PRIORITY
                .iter()
                .filter_map(|engine| {
                    accuracy_summary(person, year, kind, *engine, &estimates, actual)
                })
                .collect();
            services.selections.store_summaries(summaries.clone());
            let selection =
                select_preferred(person, year + 1, kind, &summaries, config.fallback_engine);
            services.selections.store_selection(selection);
            summary.selections_written += 1;
        }

        if !any_kind_closed {
            continue;
        }
        let benefit_owed = annual_benefit(actual_total, &params);
        let benefit_paid: f64 = services
            .records
            .year_records(person, year)
            .iter()
            .map(|r| r.committed())
            .sum();
        services.selections.store_realized(RealizedYear {
            person: person.to_string(),
            year,
            actual_year_result: actual_total,
            benefit_owed,
            benefit_paid,
            overpayment: benefit_paid - benefit_owed,
        });
        summary.persons_closed += 1;
    }

    info!(
        year,
        persons_closed = summary.persons_closed,
        selections_written = summary.selections_written,
        "year close finished"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::seasonal::SeasonalConfig;
    use crate::core::sources::{
        InMemoryAssessments, InMemoryEstimates, InMemoryObservations, InMemoryParameters,
        InMemoryRecords, InMemorySelections,
    };
    use crate::core::types::{BenefitParameters, IncomeObservation};

    struct Fixture {
        observations: Arc<InMemoryObservations>,
        parameters: Arc<InMemoryParameters>,
        services: Services,
    }

    fn fixture() -> Fixture {
        let observations = Arc::new(InMemoryObservations::new());
        let parameters = Arc::new(InMemoryParameters::new());
        let services = Services {
            observations: observations.clone(),
            assessments: Arc::new(InMemoryAssessments::new()),
            parameters: parameters.clone(),
            records: Arc::new(InMemoryRecords::new()),
            estimates: Arc::new(InMemoryEstimates::new()),
            selections: Arc::new(InMemorySelections::new()),
        };
        Fixture {
            observations,
            parameters,
            services,
        }
    }

    fn params_2025() -> BenefitParameters {
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

    fn seed_flat_year(fixture: &Fixture, person: &str, year: i32, amount: f64) {
        for month in 1..=12 {
            fixture
                .observations
                .insert(IncomeObservation {
                    person: person.to_string(),
                    period: Period::new(year, month),
                    kind: IncomeKind::A,
                    amount,
                    source: "registry".to_string(),
                })
                .expect("unique observation");
        }
    }

    fn registry() -> Arc<EngineRegistry> {
        Arc::new(EngineRegistry::standard(SeasonalConfig::default()))
    }

    #[tokio::test]
    async fn batch_processes_persons_and_persists_records() {
        let fixture = fixture();
        fixture.parameters.insert(params_2025());
        seed_flat_year(&fixture, "p1", 2025, 20_000.0);
        seed_flat_year(&fixture, "p2", 2025, 8_000.0);
        let services = &fixture.services;
        let config = RunConfig::default();
        let registry = registry();

        for month in 1..=12 {
            let summary = run_monthly_batch(
                services,
                &["p1".to_string(), "p2".to_string()],
                Period::new(2025, month),
                &config,
                registry.clone(),
            )
            .await
            .expect("batch runs");
            assert_eq!(summary.processed, 2);
            assert_eq!(summary.finality_rejections, 0);
        }

        let p1_total: f64 = services
            .records
            .year_records("p1", 2025)
            .iter()
            .map(|r| r.committed())
            .sum();
        assert!((p1_total - 15_750.0).abs() <= 0.12);

        // Proposals were retained for every month.
        let estimates = services.estimates.estimates("p1", 2025, IncomeKind::A);
        assert!(estimates.len() >= 12);
    }

    #[tokio::test]
    async fn missing_parameters_abort_the_whole_run() {
        let fixture = fixture();
        seed_flat_year(&fixture, "p1", 2025, 20_000.0);
        let error = run_monthly_batch(
            &fixture.services,
            &["p1".to_string()],
            Period::new(2025, 1),
            &RunConfig::default(),
            registry(),
        )
        .await
        .expect_err("no parameters registered");
        assert!(matches!(error, ConfigError::MissingParameters(2025)));
        assert!(fixture.services.records.year_records("p1", 2025).is_empty());
    }

    #[tokio::test]
    async fn exported_months_survive_reruns_unchanged() {
        let fixture = fixture();
        fixture.parameters.insert(params_2025());
        seed_flat_year(&fixture, "p1", 2025, 20_000.0);
        let services = &fixture.services;
        let config = RunConfig::default();
        let registry = registry();
        let persons = vec!["p1".to_string()];

        run_monthly_batch(services, &persons, Period::new(2025, 1), &config, registry.clone())
            .await
            .expect("first run");
        let exported = services
            .records
            .mark_transferred("p1", Period::new(2025, 1))
            .expect("export lock");

        let summary =
            run_monthly_batch(services, &persons, Period::new(2025, 1), &config, registry)
                .await
                .expect("rerun continues");
        assert_eq!(summary.finality_rejections, 1);
        assert_eq!(summary.processed, 0);
        let record = services
            .records
            .record("p1", Period::new(2025, 1))
            .expect("record exists");
        assert_eq!(record.benefit_transferred, Some(exported));
    }

    #[tokio::test]
    async fn year_close_grades_engines_and_selects_for_next_year() {
        let fixture = fixture();
        fixture.parameters.insert(params_2025());
        seed_flat_year(&fixture, "p1", 2025, 20_000.0);
        let services = &fixture.services;
        let config = RunConfig::default();
        let registry = registry();
        let persons = vec!["p1".to_string()];

        for month in 1..=12 {
            run_monthly_batch(
                services,
                &persons,
                Period::new(2025, month),
                &config,
                registry.clone(),
            )
            .await
            .expect("batch runs");
        }
        let summary = run_year_close(services, &persons, 2025, &config)
            .await
            .expect("close runs");
        assert_eq!(summary.persons_closed, 1);
        assert!(summary.selections_written >= 1);

        // Flat income: every engine that produced is exact, so the tie breaks
        // to the highest-priority engine.
        let selection = services
            .selections
            .preferred("p1", 2026, IncomeKind::A)
            .expect("selection written");
        assert_eq!(selection.engine, EngineKind::InYearExtrapolation);
        assert_eq!(selection.based_on_year, Some(2025));

        let realized = services
            .selections
            .realized("p1", 2025)
            .expect("realized year stored");
        assert!((realized.actual_year_result - 240_000.0).abs() < 1e-9);
        assert!((realized.benefit_owed - 15_750.0).abs() < 1e-9);
        assert!(realized.overpayment.abs() <= 0.12);
    }
}
