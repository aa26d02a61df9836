use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

use super::types::{
    BenefitParameters, EngineAccuracySummary, IncomeEstimate, IncomeKind, IncomeObservation,
    IncomeSeries, MonthlyBenefitRecord, Period, PersonId, PreferredEngineSelection, RealizedYear,
    SelfAssessment,
};

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("duplicate observation for {person} {period} {kind:?} from {source_tag}")]
    DuplicateObservation {
        person: PersonId,
        period: Period,
        kind: IncomeKind,
        source_tag: String,
    },
    #[error("record {person} {period} is exported and immutable")]
    RecordExported { person: PersonId, period: Period },
    #[error("record {person} {period} cannot be transferred: {reason}")]
    TransferRejected {
        person: PersonId,
        period: Period,
        reason: &'static str,
    },
}

/// Read-only ordered per-person monthly income series.
pub trait IncomeObservationSource: Send + Sync {
    fn series(&self, person: &str, kind: IncomeKind) -> IncomeSeries;
    fn persons(&self) -> Vec<PersonId>;
}

/// Single advance assessment per person and year.
pub trait SelfReportedAssessmentSource: Send + Sync {
    fn assessment(&self, person: &str, year: i32) -> Option<SelfAssessment>;
}

/// Statutory constants per year; a year's run consumes one version.
pub trait BenefitParameterStore: Send + Sync {
    fn parameters(&self, year: i32) -> Option<BenefitParameters>;
}

/// Monthly benefit records, mutable until the export collaborator locks them.
pub trait BenefitRecordStore: Send + Sync {
    fn record(&self, person: &str, period: Period) -> Option<MonthlyBenefitRecord>;
    fn year_records(&self, person: &str, year: i32) -> Vec<MonthlyBenefitRecord>;
    fn upsert(&self, record: MonthlyBenefitRecord) -> Result<(), StoreError>;
    /// Locks `benefit_transferred` to the calculated amount; write-once.
    fn mark_transferred(&self, person: &str, period: Period) -> Result<f64, StoreError>;
}

/// Retained engine proposals, graded when the year closes.
pub trait EstimateStore: Send + Sync {
    fn record_proposals(&self, proposals: Vec<IncomeEstimate>);
    fn estimates(&self, person: &str, year: i32, kind: IncomeKind) -> Vec<IncomeEstimate>;
    fn set_actual(&self, person: &str, year: i32, kind: IncomeKind, actual: f64);
}

/// Accuracy summaries, preferred-engine selections and realized-year
/// outcomes, read by reporting and the next year's run.
pub trait SelectionStore: Send + Sync {
    fn preferred(&self, person: &str, year: i32, kind: IncomeKind)
        -> Option<PreferredEngineSelection>;
    fn store_selection(&self, selection: PreferredEngineSelection);
    fn summaries(&self, person: &str, year: i32, kind: IncomeKind) -> Vec<EngineAccuracySummary>;
    fn store_summaries(&self, summaries: Vec<EngineAccuracySummary>);
    fn realized(&self, person: &str, year: i32) -> Option<RealizedYear>;
    fn store_realized(&self, realized: RealizedYear);
}

// ---------------------------------------------------------------------------
// In-memory implementations backing the CLI and tests.
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryObservations {
    observations: Mutex<Vec<IncomeObservation>>,
}

impl InMemoryObservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append-only: one observation per (person, period, kind, source).
    pub fn insert(&self, observation: IncomeObservation) -> Result<(), StoreError> {
        let mut observations = self.observations.lock().expect("observations lock");
        let duplicate = observations.iter().any(|o| {
            o.person == observation.person
                && o.period == observation.period
                && o.kind == observation.kind
                && o.source == observation.source
        });
        if duplicate {
            return Err(StoreError::DuplicateObservation {
                person: observation.person,
                period: observation.period,
                kind: observation.kind,
                source_tag: observation.source,
            });
        }
        observations.push(observation);
        Ok(())
    }
}

impl IncomeObservationSource for InMemoryObservations {
    fn series(&self, person: &str, kind: IncomeKind) -> IncomeSeries {
        let observations = self.observations.lock().expect("observations lock");
        IncomeSeries::from_observations(
            kind,
            observations.iter().filter(|o| o.person == person),
        )
    }

    fn persons(&self) -> Vec<PersonId> {
        let observations = self.observations.lock().expect("observations lock");
        let mut persons: Vec<PersonId> =
            observations.iter().map(|o| o.person.clone()).collect();
        persons.sort();
        persons.dedup();
        persons
    }
}

#[derive(Default)]
pub struct InMemoryAssessments {
    assessments: Mutex<Vec<SelfAssessment>>,
}

impl InMemoryAssessments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, assessment: SelfAssessment) {
        let mut assessments = self.assessments.lock().expect("assessments lock");
        assessments.retain(|a| !(a.person == assessment.person && a.year == assessment.year));
        assessments.push(assessment);
    }
}

impl SelfReportedAssessmentSource for InMemoryAssessments {
    fn assessment(&self, person: &str, year: i32) -> Option<SelfAssessment> {
        let assessments = self.assessments.lock().expect("assessments lock");
        assessments
            .iter()
            .find(|a| a.person == person && a.year == year)
            .cloned()
    }
}

#[derive(Default)]
pub struct InMemoryParameters {
    parameters: Mutex<Vec<BenefitParameters>>,
}

impl InMemoryParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, params: BenefitParameters) {
        let mut parameters = self.parameters.lock().expect("parameters lock");
        parameters.push(params);
    }
}

impl BenefitParameterStore for InMemoryParameters {
    /// Highest registered version for the year.
    fn parameters(&self, year: i32) -> Option<BenefitParameters> {
        let parameters = self.parameters.lock().expect("parameters lock");
        parameters
            .iter()
            .filter(|p| p.year == year)
            .max_by_key(|p| p.version)
            .cloned()
    }
}

#[derive(Default)]
pub struct InMemoryRecords {
    records: Mutex<HashMap<(PersonId, Period), MonthlyBenefitRecord>>,
}

impl InMemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BenefitRecordStore for InMemoryRecords {
    fn record(&self, person: &str, period: Period) -> Option<MonthlyBenefitRecord> {
        let records = self.records.lock().expect("records lock");
        records.get(&(person.to_string(), period)).cloned()
    }

    fn year_records(&self, person: &str, year: i32) -> Vec<MonthlyBenefitRecord> {
        let records = self.records.lock().expect("records lock");
        let mut found: Vec<MonthlyBenefitRecord> = records
            .values()
            .filter(|r| r.person == person && r.period.year == year)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.period);
        found
    }

    fn upsert(&self, record: MonthlyBenefitRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("records lock");
        let key = (record.person.clone(), record.period);
        if let Some(existing) = records.get(&key) {
            if existing.benefit_transferred.is_some() {
                return Err(StoreError::RecordExported {
                    person: record.person,
                    period: record.period,
                });
            }
        }
        records.insert(key, record);
        Ok(())
    }

    fn mark_transferred(&self, person: &str, period: Period) -> Result<f64, StoreError> {
        let mut records = self.records.lock().expect("records lock");
        let key = (person.to_string(), period);
        let Some(record) = records.get_mut(&key) else {
            return Err(StoreError::TransferRejected {
                person: person.to_string(),
                period,
                reason: "no record for the month",
            });
        };
        if record.benefit_transferred.is_some() {
            return Err(StoreError::TransferRejected {
                person: person.to_string(),
                period,
                reason: "already transferred",
            });
        }
        let Some(amount) = record.benefit_calculated else {
            return Err(StoreError::TransferRejected {
                person: person.to_string(),
                period,
                reason: "month is unknown",
            });
        };
        record.benefit_transferred = Some(amount);
        Ok(amount)
    }
}

#[derive(Default)]
pub struct InMemoryEstimates {
    estimates: Mutex<Vec<IncomeEstimate>>,
}

impl InMemoryEstimates {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EstimateStore for InMemoryEstimates {
    /// A rerun of the same month replaces that month's proposals; earlier
    /// months stay untouched.
    fn record_proposals(&self, proposals: Vec<IncomeEstimate>) {
        let mut estimates = self.estimates.lock().expect("estimates lock");
        for proposal in proposals {
            estimates.retain(|e| {
                !(e.person == proposal.person
                    && e.as_of == proposal.as_of
                    && e.kind == proposal.kind
                    && e.engine == proposal.engine)
            });
            estimates.push(proposal);
        }
    }

    fn estimates(&self, person: &str, year: i32, kind: IncomeKind) -> Vec<IncomeEstimate> {
        let estimates = self.estimates.lock().expect("estimates lock");
        let mut found: Vec<IncomeEstimate> = estimates
            .iter()
            .filter(|e| e.person == person && e.as_of.year == year && e.kind == kind)
            .cloned()
            .collect();
        found.sort_by_key(|e| (e.as_of, e.engine));
        found
    }

    fn set_actual(&self, person: &str, year: i32, kind: IncomeKind, actual: f64) {
        let mut estimates = self.estimates.lock().expect("estimates lock");
        for estimate in estimates
            .iter_mut()
            .filter(|e| e.person == person && e.as_of.year == year && e.kind == kind)
        {
            estimate.actual_year_result = Some(actual);
        }
    }
}

#[derive(Default)]
pub struct InMemorySelections {
    selections: Mutex<Vec<PreferredEngineSelection>>,
    summaries: Mutex<Vec<EngineAccuracySummary>>,
    realized: Mutex<Vec<RealizedYear>>,
}

impl InMemorySelections {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SelectionStore for InMemorySelections {
    fn preferred(
        &self,
        person: &str,
        year: i32,
        kind: IncomeKind,
    ) -> Option<PreferredEngineSelection> {
        let selections = self.selections.lock().expect("selections lock");
        selections
            .iter()
            .find(|s| s.person == person && s.year == year && s.kind == kind)
            .cloned()
    }

    fn store_selection(&self, selection: PreferredEngineSelection) {
        let mut selections = self.selections.lock().expect("selections lock");
        selections.retain(|s| {
            !(s.person == selection.person && s.year == selection.year && s.kind == selection.kind)
        });
        selections.push(selection);
    }

    fn summaries(&self, person: &str, year: i32, kind: IncomeKind) -> Vec<EngineAccuracySummary> {
        let summaries = self.summaries.lock().expect("summaries lock");
        let mut found: Vec<EngineAccuracySummary> = summaries
            .iter()
            .filter(|s| s.person == person && s.year == year && s.kind == kind)
            .cloned()
            .collect();
        found.sort_by_key(|s| s.engine);
        found
    }

    fn store_summaries(&self, new: Vec<EngineAccuracySummary>) {
        let mut summaries = self.summaries.lock().expect("summaries lock");
        for summary in new {
            summaries.retain(|s| {
                !(s.person == summary.person
                    && s.year == summary.year
                    && s.kind == summary.kind
                    && s.engine == summary.engine)
            });
            summaries.push(summary);
        }
    }

    fn realized(&self, person: &str, year: i32) -> Option<RealizedYear> {
        let realized = self.realized.lock().expect("realized lock");
        realized
            .iter()
            .find(|r| r.person == person && r.year == year)
            .cloned()
    }

    fn store_realized(&self, entry: RealizedYear) {
        let mut realized = self.realized.lock().expect("realized lock");
        realized.retain(|r| !(r.person == entry.person && r.year == entry.year));
        realized.push(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(person: &str, month: u32, source: &str) -> IncomeObservation {
        IncomeObservation {
            person: person.to_string(),
            period: Period::new(2025, month),
            kind: IncomeKind::A,
            amount: 10_000.0,
            source: source.to_string(),
        }
    }

    fn record(person: &str, month: u32, calculated: Option<f64>) -> MonthlyBenefitRecord {
        MonthlyBenefitRecord {
            person: person.to_string(),
            period: Period::new(2025, month),
            estimated_year_result: Some(120_000.0),
            estimated_year_benefit: Some(8_750.0),
            benefit_calculated: calculated,
            benefit_transferred: None,
            prior_benefit_transferred: 0.0,
            quarantined: false,
            quarantine_reason: None,
        }
    }

    #[test]
    fn duplicate_observations_are_rejected_per_source() {
        let store = InMemoryObservations::new();
        store.insert(obs("p1", 1, "employer-a")).expect("first insert");
        store
            .insert(obs("p1", 1, "employer-b"))
            .expect("same month, different source");
        assert!(matches!(
            store.insert(obs("p1", 1, "employer-a")),
            Err(StoreError::DuplicateObservation { .. })
        ));
        // Both sources contribute to the month's total.
        let series = store.series("p1", IncomeKind::A);
        assert_eq!(series.amount_at(Period::new(2025, 1)), Some(20_000.0));
    }

    #[test]
    fn transfer_is_write_once() {
        let store = InMemoryRecords::new();
        store.upsert(record("p1", 3, Some(729.16))).expect("insert");
        let amount = store
            .mark_transferred("p1", Period::new(2025, 3))
            .expect("first transfer");
        assert_eq!(amount, 729.16);
        assert!(matches!(
            store.mark_transferred("p1", Period::new(2025, 3)),
            Err(StoreError::TransferRejected { .. })
        ));
        assert_eq!(
            store
                .record("p1", Period::new(2025, 3))
                .and_then(|r| r.benefit_transferred),
            Some(729.16)
        );
    }

    #[test]
    fn exported_records_refuse_upserts() {
        let store = InMemoryRecords::new();
        store.upsert(record("p1", 3, Some(729.16))).expect("insert");
        store
            .mark_transferred("p1", Period::new(2025, 3))
            .expect("transfer");
        assert!(matches!(
            store.upsert(record("p1", 3, Some(999.0))),
            Err(StoreError::RecordExported { .. })
        ));
    }

    #[test]
    fn unknown_months_cannot_transfer() {
        let store = InMemoryRecords::new();
        store.upsert(record("p1", 4, None)).expect("insert");
        assert!(matches!(
            store.mark_transferred("p1", Period::new(2025, 4)),
            Err(StoreError::TransferRejected { reason: "month is unknown", .. })
        ));
    }

    #[test]
    fn parameter_store_returns_the_highest_version() {
        let store = InMemoryParameters::new();
        let base = BenefitParameters {
            year: 2025,
            version: 1,
            personal_allowance: 60_000.0,
            standard_allowance: 10_000.0,
            benefit_rate: 0.175,
            max_benefit: 15_750.0,
            scaledown_rate: 0.063,
            scaledown_ceiling: 250_000.0,
        };
        store.insert(base.clone());
        store.insert(BenefitParameters {
            version: 2,
            max_benefit: 16_000.0,
            ..base
        });
        let current = store.parameters(2025).expect("registered year");
        assert_eq!(current.version, 2);
        assert_eq!(current.max_benefit, 16_000.0);
        assert!(store.parameters(2024).is_none());
    }

    #[test]
    fn rerun_replaces_only_the_same_month_proposals() {
        let store = InMemoryEstimates::new();
        let estimate = |month: u32, value: f64| IncomeEstimate {
            person: "p1".to_string(),
            as_of: Period::new(2025, month),
            kind: IncomeKind::A,
            engine: crate::core::types::EngineKind::InYearExtrapolation,
            estimated_year_result: value,
            actual_year_result: None,
        };
        store.record_proposals(vec![estimate(1, 120_000.0), estimate(2, 121_000.0)]);
        store.record_proposals(vec![estimate(2, 125_000.0)]);
        let estimates = store.estimates("p1", 2025, IncomeKind::A);
        assert_eq!(estimates.len(), 2);
        assert_eq!(estimates[1].estimated_year_result, 125_000.0);

        store.set_actual("p1", 2025, IncomeKind::A, 123_000.0);
        let estimates = store.estimates("p1", 2025, IncomeKind::A);
        assert!(estimates.iter().all(|e| e.actual_year_result == Some(123_000.0)));
    }
}
