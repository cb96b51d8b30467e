use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stored span for one (symbol, interval). "Empty" is modelled as `None` by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CoverageRange {
    pub earliest_stored: DateTime<Utc>,
    pub latest_stored: DateTime<Utc>,
}

impl CoverageRange {
    pub fn new(earliest_stored: DateTime<Utc>, latest_stored: DateTime<Utc>) -> Self {
        Self {
            earliest_stored,
            latest_stored,
        }
    }

    /// Widens the span to include `ts`.
    pub fn extend(&mut self, ts: DateTime<Utc>) {
        if ts < self.earliest_stored {
            self.earliest_stored = ts;
        }
        if ts > self.latest_stored {
            self.latest_stored = ts;
        }
    }
}
