use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle granularities served by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Interval {
    Minute1,
    Minute3,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Hour2,
    Hour4,
    Hour6,
    Hour8,
    Hour12,
    Day1,
    Day3,
    Week1,
    Month1,
}

const SHORTEST_MONTH_SECONDS: i64 = 28 * 86_400;

impl Interval {
    pub const ALL: [Interval; 15] = [
        Interval::Minute1,
        Interval::Minute3,
        Interval::Minute5,
        Interval::Minute15,
        Interval::Minute30,
        Interval::Hour1,
        Interval::Hour2,
        Interval::Hour4,
        Interval::Hour6,
        Interval::Hour8,
        Interval::Hour12,
        Interval::Day1,
        Interval::Day3,
        Interval::Week1,
        Interval::Month1,
    ];

    /// Provider wire code. Case matters: `1m` is a minute, `1M` a month.
    pub fn code(self) -> &'static str {
        match self {
            Interval::Minute1 => "1m",
            Interval::Minute3 => "3m",
            Interval::Minute5 => "5m",
            Interval::Minute15 => "15m",
            Interval::Minute30 => "30m",
            Interval::Hour1 => "1h",
            Interval::Hour2 => "2h",
            Interval::Hour4 => "4h",
            Interval::Hour6 => "6h",
            Interval::Hour8 => "8h",
            Interval::Hour12 => "12h",
            Interval::Day1 => "1d",
            Interval::Day3 => "3d",
            Interval::Week1 => "1w",
            Interval::Month1 => "1M",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        let trimmed = value.trim();
        if let Some(interval) = Self::ALL.iter().copied().find(|i| i.code() == trimmed) {
            return Ok(interval);
        }

        let interval = match trimmed.to_lowercase().as_str() {
            "1min" => Interval::Minute1,
            "3min" => Interval::Minute3,
            "5min" => Interval::Minute5,
            "15min" => Interval::Minute15,
            "30min" => Interval::Minute30,
            "1hour" => Interval::Hour1,
            "2hour" => Interval::Hour2,
            "4hour" => Interval::Hour4,
            "6hour" => Interval::Hour6,
            "8hour" => Interval::Hour8,
            "12hour" => Interval::Hour12,
            "1day" => Interval::Day1,
            "3day" => Interval::Day3,
            "1week" => Interval::Week1,
            "1mo" | "1month" => Interval::Month1,
            _ => return Err(format!("unsupported interval: {value}")),
        };
        Ok(interval)
    }

    /// Nominal period length. Months are counted as 30 days.
    pub fn step_seconds(self) -> i64 {
        match self {
            Interval::Minute1 => 60,
            Interval::Minute3 => 180,
            Interval::Minute5 => 300,
            Interval::Minute15 => 900,
            Interval::Minute30 => 1_800,
            Interval::Hour1 => 3_600,
            Interval::Hour2 => 7_200,
            Interval::Hour4 => 14_400,
            Interval::Hour6 => 21_600,
            Interval::Hour8 => 28_800,
            Interval::Hour12 => 43_200,
            Interval::Day1 => 86_400,
            Interval::Day3 => 259_200,
            Interval::Week1 => 604_800,
            Interval::Month1 => 2_592_000,
        }
    }

    pub fn step(self) -> Duration {
        Duration::seconds(self.step_seconds())
    }

    /// Time span covered by one fetch batch, sized so a full window holds
    /// about 1000 candles.
    pub fn batch_window(self) -> Duration {
        match self {
            Interval::Minute1 => Duration::minutes(1_000),
            Interval::Minute3 => Duration::minutes(3_000),
            Interval::Minute5 => Duration::minutes(5_000),
            Interval::Minute15 => Duration::minutes(15_000),
            Interval::Minute30 => Duration::minutes(30_000),
            Interval::Hour1 => Duration::minutes(60_000),
            Interval::Hour2 => Duration::minutes(120_000),
            Interval::Hour4 => Duration::minutes(240_000),
            Interval::Hour6 => Duration::minutes(360_000),
            Interval::Hour8 => Duration::minutes(480_000),
            Interval::Hour12 => Duration::minutes(720_000),
            Interval::Day1 => Duration::days(1_000),
            Interval::Day3 => Duration::days(3_000),
            Interval::Week1 => Duration::days(7_000),
            Interval::Month1 => Duration::days(30_000),
        }
    }

    /// Shortest gap between two consecutive open times. Equal to the step except
    /// for months.
    pub fn min_step(self) -> Duration {
        match self {
            Interval::Month1 => Duration::seconds(SHORTEST_MONTH_SECONDS),
            other => other.step(),
        }
    }

    /// Upper bound on the number of candle open times inside a half-open span.
    pub fn max_rows_in(self, span: Duration) -> u64 {
        let span_ms = span.num_milliseconds();
        if span_ms <= 0 {
            return 0;
        }
        let step_ms = self.min_step().num_milliseconds();
        // ceil(span / step) aligned open times, plus one for an unaligned start.
        (span_ms as u64).div_ceil(step_ms as u64) + 1
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Interval {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Interval> for String {
    fn from(value: Interval) -> Self {
        value.code().to_string()
    }
}
