mod benefit;
mod config;
mod engine;
mod pipeline;
mod quarantine;
mod runner;
mod seasonal;
mod selector;
mod sources;
mod stability;
mod types;

pub use benefit::{annual_benefit, floor_to_minor, monthly_benefit};
pub use config::{validate_parameters, validate_run_config, ConfigError, QuarantineConfig, RunConfig};
pub use engine::{EngineRegistry, EstimationEngine, EstimationInput};
pub use pipeline::{compute_person_month, PersonMonthOutcome, PersonSnapshot, PipelineError};
pub use quarantine::{rolling_std, settlement_payout, QuarantineContext};
pub use runner::{run_monthly_batch, run_year_close, RunSummary, Services, YearCloseSummary};
pub use seasonal::{SeasonalConfig, SeasonalEngine};
pub use selector::{accuracy_summary, select_preferred};
pub use sources::{
    BenefitParameterStore, BenefitRecordStore, EstimateStore, InMemoryAssessments,
    InMemoryEstimates, InMemoryObservations, InMemoryParameters, InMemoryRecords,
    InMemorySelections, IncomeObservationSource, SelectionStore, SelfReportedAssessmentSource,
    StoreError,
};
pub use types::{
    BenefitParameters, EngineAccuracySummary, EngineKind, IncomeEstimate, IncomeKind,
    IncomeObservation, IncomeSeries, MonthlyBenefitRecord, Period, PersonId,
    PreferredEngineSelection, QuarantineReason, RealizedYear, RecordStatus, SelfAssessment,
};
