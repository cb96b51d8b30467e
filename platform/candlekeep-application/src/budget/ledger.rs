use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Weight consumed inside a trailing window. Pure bookkeeping: callers pass the
/// current instant and do any waiting themselves.
#[derive(Debug, Clone)]
pub struct BudgetLedger {
    window: Duration,
    ceiling: u32,
    entries: VecDeque<(Instant, u32)>,
    window_sum: u64,
}

impl BudgetLedger {
    pub fn new(window: Duration, ceiling: u32) -> Self {
        Self {
            window,
            ceiling,
            entries: VecDeque::new(),
            window_sum: 0,
        }
    }

    fn evict(&mut self, now: Instant) {
        while let Some(&(ts, cost)) = self.entries.front() {
            if now.saturating_duration_since(ts) < self.window {
                break;
            }
            self.entries.pop_front();
            self.window_sum -= u64::from(cost);
        }
    }

    /// Records `cost` at `now` if it fits, otherwise returns how long until enough
    /// of the oldest entries have aged out. The returned delay is always non-zero.
    pub fn try_admit(&mut self, now: Instant, cost: u32) -> Result<(), Duration> {
        self.evict(now);
        if cost == 0 {
            return Ok(());
        }

        let ceiling = u64::from(self.ceiling);
        let needed = self.window_sum + u64::from(cost);
        if needed <= ceiling {
            self.entries.push_back((now, cost));
            self.window_sum = needed;
            return Ok(());
        }

        let excess = needed - ceiling;
        let mut freed = 0u64;
        for &(ts, entry_cost) in &self.entries {
            freed += u64::from(entry_cost);
            if freed >= excess {
                let wait = (ts + self.window).saturating_duration_since(now);
                return Err(wait.max(Duration::from_millis(1)));
            }
        }
        // Only reachable when cost > ceiling, which callers reject up front.
        Err(self.window)
    }

    pub fn window_sum(&mut self, now: Instant) -> u64 {
        self.evict(now);
        self.window_sum
    }
}

#[cfg(test)]
mod tests {
    use super::BudgetLedger;
    use std::time::Duration;
    use tokio::time::Instant;

    #[test]
    fn admits_until_ceiling_then_reports_wait() {
        let t0 = Instant::now();
        let mut ledger = BudgetLedger::new(Duration::from_secs(60), 10);
        assert!(ledger.try_admit(t0, 4).is_ok());
        assert!(ledger.try_admit(t0 + Duration::from_secs(10), 6).is_ok());
        assert_eq!(ledger.window_sum(t0 + Duration::from_secs(10)), 10);

        let wait = ledger
            .try_admit(t0 + Duration::from_secs(20), 3)
            .expect_err("over ceiling");
        // Freeing the first entry (4) is enough, it expires at t0 + 60s.
        assert_eq!(wait, Duration::from_secs(40));
    }

    #[test]
    fn wait_covers_multiple_entries_when_needed() {
        let t0 = Instant::now();
        let mut ledger = BudgetLedger::new(Duration::from_secs(60), 10);
        ledger.try_admit(t0, 2).unwrap();
        ledger.try_admit(t0 + Duration::from_secs(5), 3).unwrap();
        ledger.try_admit(t0 + Duration::from_secs(30), 5).unwrap();

        let wait = ledger
            .try_admit(t0 + Duration::from_secs(30), 4)
            .expect_err("over ceiling");
        assert_eq!(wait, Duration::from_secs(35));
    }

    #[test]
    fn entries_expire_after_window() {
        let t0 = Instant::now();
        let mut ledger = BudgetLedger::new(Duration::from_secs(60), 10);
        ledger.try_admit(t0, 10).unwrap();
        assert!(ledger.try_admit(t0 + Duration::from_secs(59), 1).is_err());
        assert!(ledger.try_admit(t0 + Duration::from_secs(60), 10).is_ok());
        assert_eq!(ledger.window_sum(t0 + Duration::from_secs(60)), 10);
    }

    #[test]
    fn zero_cost_is_free() {
        let t0 = Instant::now();
        let mut ledger = BudgetLedger::new(Duration::from_secs(60), 1);
        ledger.try_admit(t0, 1).unwrap();
        assert!(ledger.try_admit(t0, 0).is_ok());
        assert_eq!(ledger.window_sum(t0), 1);
    }
}
