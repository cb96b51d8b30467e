use candlekeep_domain::errors::IngestError;
use candlekeep_domain::value_objects::coverage::CoverageRange;
use candlekeep_domain::value_objects::interval::Interval;
use candlekeep_domain::value_objects::time_range::TimeRange;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalSelection {
    One(Interval),
    All,
}

impl IntervalSelection {
    /// `all` or a single interval code.
    pub fn parse(value: &str) -> Result<Self, String> {
        if value.trim().eq_ignore_ascii_case("all") {
            return Ok(IntervalSelection::All);
        }
        Interval::parse(value).map(IntervalSelection::One)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IntervalReport {
    pub rows: u64,
    pub batches: usize,
    pub failed_batches: usize,
    pub ranges: Vec<TimeRange>,
    /// The provider has no history for the pair.
    pub skipped_no_data: bool,
    pub cancelled: bool,
}

/// A problem scoped to one interval, or to one window of it.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestFailure {
    pub interval: Interval,
    pub window: Option<TimeRange>,
    pub error: IngestError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestResult {
    pub symbol: String,
    pub total_rows_persisted: u64,
    pub per_interval: BTreeMap<Interval, IntervalReport>,
    pub errors: Vec<IngestFailure>,
}

impl IngestResult {
    pub fn failed_batches(&self) -> usize {
        self.per_interval.values().map(|r| r.failed_batches).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntervalCoverage {
    pub interval: Interval,
    pub rows: u64,
    pub coverage: Option<CoverageRange>,
}
