use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::core::{
    run_monthly_batch, run_year_close, BenefitParameters, ConfigError, EngineAccuracySummary,
    EngineRegistry, InMemoryAssessments, InMemoryEstimates, InMemoryObservations,
    InMemoryParameters, InMemoryRecords, InMemorySelections, IncomeKind, IncomeObservation,
    IncomeObservationSource,
    MonthlyBenefitRecord, Period, PersonId, PreferredEngineSelection, RealizedYear, RunConfig,
    RunSummary, SeasonalConfig, SelfAssessment, Services, StoreError, YearCloseSummary,
};

#[derive(Parser)]
#[command(name = "stipend", about = "Income-contingent wage subsidy engine")]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run monthly batches from January through the given month.
    Run {
        /// JSON fixture with observations, assessments and parameters.
        #[arg(long)]
        fixtures: PathBuf,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
        /// Run configuration file; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Simulate the export collaborator locking months up to and
        /// including this one after each batch.
        #[arg(long)]
        export_through: Option<u32>,
    },
    /// Run the full year, then grade engines and select next year's
    /// preferred engine per person and income kind.
    CloseYear {
        #[arg(long)]
        fixtures: PathBuf,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("month must be in 1..=12, got {0}")]
    MonthRange(u32),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FixtureFile {
    observations: Vec<IncomeObservation>,
    assessments: Vec<SelfAssessment>,
    parameters: Vec<BenefitParameters>,
}

#[derive(Serialize)]
struct RunOutput {
    summaries: Vec<RunSummary>,
    records: Vec<MonthlyBenefitRecord>,
}

#[derive(Serialize)]
struct CloseYearOutput {
    close: YearCloseSummary,
    realized: Vec<RealizedYear>,
    selections: Vec<PreferredEngineSelection>,
    accuracy: Vec<EngineAccuracySummary>,
}

pub async fn execute(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Run {
            fixtures,
            year,
            month,
            config,
            export_through,
        } => {
            if !(1..=12).contains(&month) {
                return Err(CliError::MonthRange(month));
            }
            let config = load_config(config.as_deref())?;
            let (services, persons) = load_services(&fixtures)?;
            let registry = Arc::new(EngineRegistry::standard(SeasonalConfig::default()));

            let mut summaries = Vec::new();
            for m in 1..=month {
                let period = Period::new(year, m);
                summaries
                    .push(run_monthly_batch(&services, &persons, period, &config, registry.clone()).await?);
                if export_through.is_some_and(|through| m <= through) {
                    lock_month(&services, &persons, period);
                }
            }

            let records = persons
                .iter()
                .flat_map(|p| services.records.year_records(p, year))
                .collect();
            print_json(&RunOutput { summaries, records });
            Ok(())
        }
        Command::CloseYear {
            fixtures,
            year,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let (services, persons) = load_services(&fixtures)?;
            let registry = Arc::new(EngineRegistry::standard(SeasonalConfig::default()));

            for m in 1..=12 {
                run_monthly_batch(&services, &persons, Period::new(year, m), &config, registry.clone())
                    .await?;
            }
            let close = run_year_close(&services, &persons, year, &config).await?;

            let mut realized = Vec::new();
            let mut selections = Vec::new();
            let mut accuracy = Vec::new();
            for person in &persons {
                realized.extend(services.selections.realized(person, year));
                for kind in IncomeKind::ALL {
                    selections.extend(services.selections.preferred(person, year + 1, kind));
                    accuracy.extend(services.selections.summaries(person, year, kind));
                }
            }
            print_json(&CloseYearOutput {
                close,
                realized,
                selections,
                accuracy,
            });
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RunConfig, CliError> {
    match path {
        Some(path) => read_json(path),
        None => Ok(RunConfig::default()),
    }
}

fn load_services(fixtures: &Path) -> Result<(Services, Vec<PersonId>), CliError> {
    let fixture: FixtureFile = read_json(fixtures)?;

    let observations = InMemoryObservations::new();
    for observation in fixture.observations {
        observations.insert(observation)?;
    }
    let assessments = InMemoryAssessments::new();
    for assessment in fixture.assessments {
        assessments.insert(assessment);
    }
    let parameters = InMemoryParameters::new();
    for params in fixture.parameters {
        parameters.insert(params);
    }

    let observations = Arc::new(observations);
    let persons = observations.persons();
    let services = Services {
        observations,
        assessments: Arc::new(assessments),
        parameters: Arc::new(parameters),
        records: Arc::new(InMemoryRecords::new()),
        estimates: Arc::new(InMemoryEstimates::new()),
        selections: Arc::new(InMemorySelections::new()),
    };
    Ok((services, persons))
}

/// Stand-in for the payment-export collaborator: locks every computed month.
fn lock_month(services: &Services, persons: &[PersonId], period: Period) {
    for person in persons {
        if let Err(error) = services.records.mark_transferred(person, period) {
            warn!(%error, "export lock skipped");
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(error) => warn!(%error, "output serialization failed"),
    }
}
