use crate::errors::IngestError;
use crate::value_objects::coverage::CoverageRange;
use crate::value_objects::interval::Interval;
use crate::value_objects::time_range::TimeRange;
use chrono::{DateTime, Duration, Utc};

/// Smallest timestamp increment the provider distinguishes.
pub fn resume_epsilon() -> Duration {
    Duration::milliseconds(1)
}

/// Ranges still missing for a pair: backfill before stored coverage first,
/// then the forward range after the latest stored candle up to `now`.
pub fn plan_ranges(
    coverage: Option<&CoverageRange>,
    earliest_available: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<TimeRange> {
    let Some(coverage) = coverage else {
        if earliest_available < now {
            return vec![TimeRange::new(earliest_available, now)];
        }
        return Vec::new();
    };

    let mut ranges = Vec::with_capacity(2);
    if earliest_available < coverage.earliest_stored {
        ranges.push(TimeRange::new(earliest_available, coverage.earliest_stored));
    }

    let forward_start = coverage.latest_stored + resume_epsilon();
    if forward_start < now {
        ranges.push(TimeRange::new(forward_start, now));
    }
    ranges
}

/// [`plan_ranges`] for a pair whose earliest candle may be unknown. An unknown
/// earliest candle means the provider has no history: `NoDataAvailable`.
pub fn plan_ranges_for(
    symbol: &str,
    interval: Interval,
    coverage: Option<&CoverageRange>,
    earliest_available: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<Vec<TimeRange>, IngestError> {
    match earliest_available {
        Some(earliest) => Ok(plan_ranges(coverage, earliest, now)),
        None => Err(IngestError::NoDataAvailable {
            symbol: symbol.to_string(),
            interval,
        }),
    }
}
