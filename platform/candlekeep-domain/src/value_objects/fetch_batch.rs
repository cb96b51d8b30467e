use crate::value_objects::interval::Interval;
use crate::value_objects::time_range::TimeRange;

/// One provider request worth of work. Built by the scheduler, consumed once.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchBatch {
    pub symbol: String,
    pub interval: Interval,
    pub window: TimeRange,
    pub limit: u32,
}
