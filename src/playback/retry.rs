use std::time::Duration;

use crate::config::RetryConfig;

/// Outcome of one poll of the prepare wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetTick {
    Continue,
    /// A full round of ticks passed without an answer
    StillWaiting { round: u32 },
    Exhausted,
}

/// Bounded wait for a single prepare attempt
#[derive(Debug, Clone)]
pub struct RetryBudget {
    poll_interval: Duration,
    max_wait_ticks: u32,
    max_retries: u32,
    wait_tick: u32,
    retry_count: u32,
    total_ticks: u64,
}

impl RetryBudget {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            max_wait_ticks: config.max_wait_ticks.max(1),
            max_retries: config.max_retries.max(1),
            wait_tick: 0,
            retry_count: 0,
            total_ticks: 0,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Time spent polling so far
    pub fn waited(&self) -> Duration {
        self.poll_interval * self.total_ticks as u32
    }

    /// Account for one poll interval
    pub fn tick(&mut self) -> BudgetTick {
        self.total_ticks += 1;
        self.wait_tick += 1;
        if self.wait_tick < self.max_wait_ticks {
            return BudgetTick::Continue;
        }

        self.wait_tick = 0;
        self.retry_count += 1;
        if self.retry_count >= self.max_retries {
            BudgetTick::Exhausted
        } else {
            BudgetTick::StillWaiting {
                round: self.retry_count,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_lasts_two_hundred_ticks() {
        let mut budget = RetryBudget::new(&RetryConfig::default());
        let mut waiting = 0;
        let mut ticks = 0;
        loop {
            ticks += 1;
            match budget.tick() {
                BudgetTick::Continue => {}
                BudgetTick::StillWaiting { .. } => waiting += 1,
                BudgetTick::Exhausted => break,
            }
        }
        assert_eq!(ticks, 200);
        assert_eq!(waiting, 9);
        assert_eq!(budget.waited(), Duration::from_secs(20));
    }

    #[test]
    fn test_still_waiting_reports_round() {
        let config = RetryConfig {
            poll_interval_ms: 10,
            max_wait_ticks: 2,
            max_retries: 3,
        };
        let mut budget = RetryBudget::new(&config);
        assert_eq!(budget.tick(), BudgetTick::Continue);
        assert_eq!(budget.tick(), BudgetTick::StillWaiting { round: 1 });
        assert_eq!(budget.tick(), BudgetTick::Continue);
        assert_eq!(budget.tick(), BudgetTick::StillWaiting { round: 2 });
        assert_eq!(budget.tick(), BudgetTick::Continue);
        assert_eq!(budget.tick(), BudgetTick::Exhausted);
        assert_eq!(budget.retry_count(), 3);
    }

    #[test]
    fn test_zero_config_is_clamped() {
        let config = RetryConfig {
            poll_interval_ms: 0,
            max_wait_ticks: 0,
            max_retries: 0,
        };
        let mut budget = RetryBudget::new(&config);
        assert_eq!(budget.poll_interval(), Duration::from_millis(1));
        assert_eq!(budget.tick(), BudgetTick::Exhausted);
    }
}
