//! Injected collaborators: currency rates and the engine clock.
//!
//! Both are read-only for the duration of a batch. Rates are never fetched
//! remotely; callers load whatever table they trust and hand it in.

use std::collections::HashMap;

use chrono::Utc;

/// Supplies exchange rates for `currency_conversion` steps. Same-currency
/// pairs always resolve to 1.
pub trait RateProvider: Send + Sync {
    fn rate(&self, from: &str, to: &str) -> Option<f64>;
}

/// Rate table backed by a `(from, to) -> rate` map. Lookups are
/// case-insensitive on currency codes and fall back to the inverse pair.
#[derive(Debug, Default, Clone)]
pub struct RateTable {
    rates: HashMap<(String, String), f64>,
}

impl RateTable {
    pub fn new() -> Self {
        RateTable::default()
    }

    pub fn with_rate(mut self, from: &str, to: &str, rate: f64) -> Self {
        self.insert(from, to, rate);
        self
    }

    pub fn insert(&mut self, from: &str, to: &str, rate: f64) {
        self.rates
            .insert((from.to_uppercase(), to.to_uppercase()), rate);
    }
}

impl RateProvider for RateTable {
    fn rate(&self, from: &str, to: &str) -> Option<f64> {
        let from = from.to_uppercase();
        let to = to.to_uppercase();
        if from == to {
            return Some(1.0);
        }
        if let Some(rate) = self.rates.get(&(from.clone(), to.clone())) {
            return Some(*rate);
        }
        self.rates
            .get(&(to, from))
            .filter(|r| **r != 0.0)
            .map(|r| 1.0 / r)
    }
}

/// Engine clock, injected so `fill_null` date sentinels are testable.
pub trait Clock: Send + Sync {
    fn now_epoch_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// Fixed clock for tests and reproducible runs.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_epoch_ms(&self) -> i64 {
        self.0
    }
}
