use crate::value_objects::fetch_batch::FetchBatch;
use crate::value_objects::interval::Interval;
use crate::value_objects::time_range::TimeRange;
use chrono::Duration;

/// Slices `range` into consecutive, non-overlapping windows of `window` length,
/// the last one clipped to the range end.
pub fn slice_range(range: &TimeRange, window: Duration) -> Vec<TimeRange> {
    if range.is_empty() || window <= Duration::zero() {
        return Vec::new();
    }

    let mut windows = Vec::new();
    let mut cursor = range.start;
    while cursor < range.end {
        let end = (cursor + window).min(range.end);
        windows.push(TimeRange::new(cursor, end));
        cursor = end;
    }
    windows
}

/// Window length for `interval` under a per-request cap of `max_rows`. A
/// half-open window never holds more than `max_rows` open times, so one request
/// always returns the whole window.
pub fn window_for(interval: Interval, max_rows: u32) -> Duration {
    let table_ms = interval.batch_window().num_milliseconds();
    let capped_ms = interval
        .min_step()
        .num_milliseconds()
        .saturating_mul(i64::from(max_rows.max(1)));
    Duration::milliseconds(table_ms.min(capped_ms))
}

/// Fetch batches for every planned range, in range order. Each batch asks for at
/// most `max_rows` candles; short windows ask for fewer so they weigh less.
pub fn plan_batches(
    symbol: &str,
    interval: Interval,
    ranges: &[TimeRange],
    max_rows: u32,
) -> Vec<FetchBatch> {
    let max_rows = max_rows.max(1);
    let window = window_for(interval, max_rows);
    ranges
        .iter()
        .flat_map(|range| slice_range(range, window))
        .map(|window| {
            let expected = interval.max_rows_in(window.duration());
            let limit = expected.clamp(1, u64::from(max_rows)) as u32;
            FetchBatch {
                symbol: symbol.to_string(),
                interval,
                window,
                limit,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{plan_batches, slice_range, window_for};
    use crate::value_objects::interval::Interval;
    use crate::value_objects::time_range::TimeRange;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn ts(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).unwrap()
    }

    #[test]
    fn slice_range_clips_last_window() {
        let windows = slice_range(&TimeRange::new(ts(0), ts(250)), Duration::seconds(100));
        assert_eq!(
            windows,
            vec![
                TimeRange::new(ts(0), ts(100)),
                TimeRange::new(ts(100), ts(200)),
                TimeRange::new(ts(200), ts(250)),
            ]
        );
    }

    #[test]
    fn slice_range_of_empty_range_is_empty() {
        assert!(slice_range(&TimeRange::new(ts(10), ts(10)), Duration::seconds(5)).is_empty());
        assert!(slice_range(&TimeRange::new(ts(10), ts(5)), Duration::seconds(5)).is_empty());
    }

    #[test]
    fn plan_batches_caps_full_windows_and_shrinks_tail() {
        // 1m interval, 1000 minute windows: two full windows and a 30 minute tail.
        let range = TimeRange::new(ts(0), ts(60 * 2_030));
        let batches = plan_batches("BTCUSDT", Interval::Minute1, &[range], 1_000);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].limit, 1_000);
        assert_eq!(batches[1].limit, 1_000);
        assert_eq!(batches[2].limit, 31);
        assert_eq!(batches[2].window.end, ts(60 * 2_030));
        assert!(batches.iter().all(|b| b.symbol == "BTCUSDT"));
    }

    #[test]
    fn small_cap_shrinks_windows_instead_of_truncating() {
        let range = TimeRange::new(ts(0), ts(60 * 2_000));
        let batches = plan_batches("BTCUSDT", Interval::Minute1, &[range], 500);
        assert_eq!(batches.len(), 4);
        assert!(batches.iter().all(|b| b.limit == 500));
        assert!(batches
            .iter()
            .all(|b| b.window.duration() == Duration::minutes(500)));
        assert_eq!(batches[3].window.end, ts(60 * 2_000));
    }

    #[test]
    fn window_follows_table_unless_cap_is_smaller() {
        assert_eq!(window_for(Interval::Minute1, 1_000), Duration::minutes(1_000));
        assert_eq!(window_for(Interval::Hour1, 5_000), Duration::minutes(60_000));
        assert_eq!(window_for(Interval::Hour1, 100), Duration::hours(100));
        assert_eq!(window_for(Interval::Month1, 10), Duration::days(280));
        assert_eq!(window_for(Interval::Minute1, 0), Duration::minutes(1));
    }

    #[test]
    fn plan_batches_keeps_range_order() {
        let backfill = TimeRange::new(ts(0), ts(600));
        let forward = TimeRange::new(ts(10_000), ts(10_600));
        let batches = plan_batches("ETHUSDT", Interval::Minute1, &[backfill, forward], 1_000);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].window, backfill);
        assert_eq!(batches[1].window, forward);
    }
}
