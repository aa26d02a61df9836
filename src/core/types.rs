use std::fmt;

use serde::{Deserialize, Serialize};

pub type PersonId = String;

/// Calendar month, `month` in 1..=12.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Self {
        debug_assert!((1..=12).contains(&month), "month out of range: {month}");
        Self { year, month }
    }

    fn index(self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    fn from_index(index: i64) -> Self {
        Self {
            year: index.div_euclid(12) as i32,
            month: (index.rem_euclid(12) + 1) as u32,
        }
    }

    pub fn minus_months(self, months: u32) -> Self {
        Self::from_index(self.index() - months as i64)
    }

    pub fn plus_months(self, months: u32) -> Self {
        Self::from_index(self.index() + months as i64)
    }

    pub fn pred(self) -> Self {
        self.minus_months(1)
    }

    /// Whole months from `start` to `self`, inclusive of both ends.
    pub fn months_since(self, start: Period) -> i64 {
        self.index() - start.index() + 1
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

/// Statutory income categories, estimated separately and never mixed.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub enum IncomeKind {
    /// Wage income.
    A,
    /// Capital and other income.
    B,
    /// Self-employment-like income.
    U,
}

impl IncomeKind {
    pub const ALL: [IncomeKind; 3] = [IncomeKind::A, IncomeKind::B, IncomeKind::U];
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncomeObservation {
    pub person: PersonId,
    pub period: Period,
    pub kind: IncomeKind,
    pub amount: f64,
    pub source: String,
}

/// Ordered per-(person, kind) monthly amounts. Amounts from different
/// sources for the same month are summed on construction.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomeSeries {
    pub kind: IncomeKind,
    months: Vec<(Period, f64)>,
}

impl IncomeSeries {
    pub fn new(kind: IncomeKind) -> Self {
        Self {
            kind,
            months: Vec::new(),
        }
    }

    pub fn from_observations<'a, I>(kind: IncomeKind, observations: I) -> Self
    where
        I: IntoIterator<Item = &'a IncomeObservation>,
    {
        let mut months: Vec<(Period, f64)> = Vec::new();
        for obs in observations {
            if obs.kind != kind {
                continue;
            }
            match months.iter_mut().find(|(p, _)| *p == obs.period) {
                Some((_, amount)) => *amount += obs.amount,
                None => months.push((obs.period, obs.amount)),
            }
        }
        months.sort_by_key(|(p, _)| *p);
        Self { kind, months }
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    pub fn observation_count(&self) -> usize {
        self.months.len()
    }

    pub fn amount_at(&self, period: Period) -> Option<f64> {
        self.months
            .iter()
            .find(|(p, _)| *p == period)
            .map(|(_, a)| *a)
    }

    pub fn has_observation(&self, period: Period) -> bool {
        self.amount_at(period).is_some()
    }

    pub fn first_observed(&self) -> Option<Period> {
        self.months.first().map(|(p, _)| *p)
    }

    pub fn last_observed(&self) -> Option<(Period, f64)> {
        self.months.last().copied()
    }

    /// Causal view: the series restricted to observations at or before `as_of`.
    pub fn truncated(&self, as_of: Period) -> IncomeSeries {
        IncomeSeries {
            kind: self.kind,
            months: self
                .months
                .iter()
                .filter(|(p, _)| *p <= as_of)
                .copied()
                .collect(),
        }
    }

    /// Sum over the inclusive window; months without an observation count as zero.
    pub fn window_sum(&self, start: Period, end: Period) -> f64 {
        self.months
            .iter()
            .filter(|(p, _)| *p >= start && *p <= end)
            .map(|(_, a)| *a)
            .sum()
    }

    /// Contiguous monthly values from the first observation through `end`,
    /// with unobserved months filled as zero.
    pub fn values_through(&self, end: Period) -> Vec<f64> {
        let Some(first) = self.first_observed() else {
            return Vec::new();
        };
        if end < first {
            return Vec::new();
        }
        let len = end.months_since(first) as usize;
        let mut values = vec![0.0; len];
        for (p, a) in &self.months {
            if *p <= end {
                values[(p.months_since(first) - 1) as usize] = *a;
            }
        }
        values
    }
}

/// Forecasting strategies, in fixed priority order (`EngineKind::PRIORITY`):
/// the order breaks accuracy ties and drives the fallback chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    InYearExtrapolation,
    TwelveMonthsSummation,
    TwoYearsSummation,
    SelfReported,
    Seasonal,
    MonthlyContinuation,
}

impl EngineKind {
    pub const PRIORITY: [EngineKind; 6] = [
        EngineKind::InYearExtrapolation,
        EngineKind::TwelveMonthsSummation,
        EngineKind::TwoYearsSummation,
        EngineKind::SelfReported,
        EngineKind::Seasonal,
        EngineKind::MonthlyContinuation,
    ];

    pub fn priority_rank(self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|k| *k == self)
            .unwrap_or(Self::PRIORITY.len())
    }
}

/// One engine's annual-income proposal as of a given month. `actual_year_result`
/// stays `None` until the year closes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IncomeEstimate {
    pub person: PersonId,
    pub as_of: Period,
    pub kind: IncomeKind,
    pub engine: EngineKind,
    pub estimated_year_result: f64,
    pub actual_year_result: Option<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EngineAccuracySummary {
    pub person: PersonId,
    pub year: i32,
    pub kind: IncomeKind,
    pub engine: EngineKind,
    pub mean_error_percent: f64,
    pub rmse_percent: f64,
    pub months_evaluated: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PreferredEngineSelection {
    pub person: PersonId,
    pub year: i32,
    pub kind: IncomeKind,
    pub engine: EngineKind,
    /// Year whose accuracy summaries drove the choice; `None` when the
    /// configured fallback was used.
    pub based_on_year: Option<i32>,
}

/// Year-scoped statutory constants. Rates are fractions, not percentages.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenefitParameters {
    pub year: i32,
    pub version: u32,
    pub personal_allowance: f64,
    pub standard_allowance: f64,
    pub benefit_rate: f64,
    pub max_benefit: f64,
    pub scaledown_rate: f64,
    pub scaledown_ceiling: f64,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuarantineReason {
    EarnsTooMuch,
    EarnsTooLittle,
    PriorOverpayment,
}

/// User-visible record state. Internal error detail never surfaces here.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    Provisional,
    Quarantined,
    Unknown,
    Paid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonthlyBenefitRecord {
    pub person: PersonId,
    pub period: Period,
    pub estimated_year_result: Option<f64>,
    pub estimated_year_benefit: Option<f64>,
    /// Monthly amount after smoothing, quarantine and de-minimis. `None`
    /// when every engine abstained and the month is unknown.
    pub benefit_calculated: Option<f64>,
    /// Locked by the payment-export collaborator; write-once.
    pub benefit_transferred: Option<f64>,
    /// Year-to-date committed before this month.
    pub prior_benefit_transferred: f64,
    pub quarantined: bool,
    pub quarantine_reason: Option<QuarantineReason>,
}

impl MonthlyBenefitRecord {
    pub fn status(&self) -> RecordStatus {
        if self.benefit_transferred.is_some() {
            RecordStatus::Paid
        } else if self.quarantined {
            RecordStatus::Quarantined
        } else if self.benefit_calculated.is_none() {
            RecordStatus::Unknown
        } else {
            RecordStatus::Provisional
        }
    }

    /// Best known monthly commitment: the transferred amount once exported,
    /// the calculated amount before.
    pub fn committed(&self) -> f64 {
        self.benefit_transferred
            .or(self.benefit_calculated)
            .unwrap_or(0.0)
    }
}

/// Outcome of closing a person's year: realized income against payout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RealizedYear {
    pub person: PersonId,
    pub year: i32,
    pub actual_year_result: f64,
    pub benefit_owed: f64,
    pub benefit_paid: f64,
    /// Positive when the person was paid more than the realized year owed.
    pub overpayment: f64,
}

/// A person's advance self-assessment for a year, one annual figure per
/// income kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelfAssessment {
    pub person: PersonId,
    pub year: i32,
    pub a_income: Option<f64>,
    pub b_income: Option<f64>,
    pub u_income: Option<f64>,
}

impl SelfAssessment {
    pub fn amount(&self, kind: IncomeKind) -> Option<f64> {
        match kind {
            IncomeKind::A => self.a_income,
            IncomeKind::B => self.b_income,
            IncomeKind::U => self.u_income,
        }
    }
}
