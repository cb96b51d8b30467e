use crate::value_objects::interval::Interval;

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressUpdate {
    pub symbol: String,
    pub interval: Interval,
    pub batches_done: usize,
    pub batches_total: usize,
    pub rows_persisted: u64,
    pub budget_consumed: u64,
}

/// Fire-and-forget observer. Implementations must not block and cannot fail the run.
pub trait ProgressSink: Send + Sync {
    fn report(&self, update: &ProgressUpdate);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressSink;

impl ProgressSink for NoopProgressSink {
    fn report(&self, _update: &ProgressUpdate) {}
}
