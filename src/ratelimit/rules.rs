//! Rate table: per (service, operation) refill rate and burst.
//!
//! The built-in table is hand-curated from the management API's published
//! throttling limits and must be updated when those limits change. Entries can
//! be overridden from configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::key::{Operation, Service};
use crate::error::{Result, ThrottleError};

/// Slowest accepted refill rate: one token per day.
pub const MIN_RATE_PER_SECOND: f64 = 1.0 / 86_400.0;

/// Refill rate and burst capacity of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rate {
    /// Tokens added per second
    pub per_second: f64,
    /// Maximum tokens held (and largest single reservation)
    pub burst: u32,
}

impl Rate {
    pub const fn new(per_second: f64, burst: u32) -> Self {
        Self { per_second, burst }
    }

    fn validate(&self, service: Service, operation: Operation) -> Result<()> {
        if !(self.per_second.is_finite() && self.per_second > 0.0) {
            return Err(ThrottleError::Config(format!(
                "rate for {service} {operation} must be a positive number, got {}",
                self.per_second
            )));
        }
        if self.per_second < MIN_RATE_PER_SECOND {
            return Err(ThrottleError::Config(format!(
                "rate for {service} {operation} must be at least one token per day, got {}",
                self.per_second
            )));
        }
        if self.burst == 0 {
            return Err(ThrottleError::Config(format!(
                "burst for {service} {operation} must be at least 1"
            )));
        }
        Ok(())
    }
}

/// A rate table entry as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateOverride {
    pub service: Service,
    pub operation: Operation,
    pub rate_per_second: f64,
    pub burst: u32,
}

/// Built-in budgets. Subscription-level read limits are split across the
/// resource providers the provider talks to most.
const DEFAULT_RATES: &[(Service, Operation, Rate)] = &[
    // Compute: 450 list / 3600 get calls per 3 minutes
    (Service::Compute, Operation::List, Rate::new(2.5, 50)),
    (Service::Compute, Operation::Read, Rate::new(20.0, 200)),
    // Network: ARM default bucket, 250 tokens refilled at 25/s
    (Service::Network, Operation::List, Rate::new(5.0, 50)),
    (Service::Network, Operation::Read, Rate::new(25.0, 250)),
    // Storage: 100 list / 800 read calls per 5 minutes
    (Service::Storage, Operation::List, Rate::new(0.33, 10)),
    (Service::Storage, Operation::Read, Rate::new(2.66, 100)),
    (Service::Cosmos, Operation::List, Rate::new(2.0, 20)),
    (Service::Cosmos, Operation::Read, Rate::new(10.0, 100)),
    // Redis list calls are not throttled separately
    (Service::Redis, Operation::Read, Rate::new(5.0, 30)),
];

/// Static lookup from (service, operation) to a [`Rate`].
#[derive(Debug, Clone, PartialEq)]
pub struct RateTable {
    rates: BTreeMap<(Service, Operation), Rate>,
}

impl Default for RateTable {
    fn default() -> Self {
        Self {
            rates: DEFAULT_RATES
                .iter()
                .map(|(service, operation, rate)| ((*service, *operation), *rate))
                .collect(),
        }
    }
}

impl RateTable {
    /// A table with no budgets; every lookup means "no limit".
    pub fn empty() -> Self {
        Self {
            rates: BTreeMap::new(),
        }
    }

    /// Build the built-in table with configured overrides applied on top.
    pub fn with_overrides(overrides: &[RateOverride]) -> Result<Self> {
        let mut table = Self::default();
        for o in overrides {
            table.insert(o.service, o.operation, Rate::new(o.rate_per_second, o.burst))?;
        }
        Ok(table)
    }

    /// Set the budget for a (service, operation) pair.
    pub fn insert(&mut self, service: Service, operation: Operation, rate: Rate) -> Result<()> {
        if service.is_unknown() {
            return Err(ThrottleError::Config(
                "the unknown service cannot be given a rate".to_string(),
            ));
        }
        rate.validate(service, operation)?;
        self.rates.insert((service, operation), rate);
        Ok(())
    }

    /// Builder-style [`RateTable::insert`].
    pub fn with_rate(mut self, service: Service, operation: Operation, rate: Rate) -> Result<Self> {
        self.insert(service, operation, rate)?;
        Ok(self)
    }

    /// Look up the budget for a pair.
    ///
    /// Returns `None` ("no limit") for pairs without a configured budget,
    /// including anything involving [`Service::Unknown`].
    pub fn rate_for(&self, service: Service, operation: Operation) -> Option<Rate> {
        if service.is_unknown() {
            return None;
        }
        self.rates.get(&(service, operation)).copied()
    }

    /// Iterate over configured budgets in (service, operation) order.
    pub fn iter(&self) -> impl Iterator<Item = (Service, Operation, Rate)> + '_ {
        self.rates.iter().map(|((s, o), r)| (*s, *o, *r))
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_has_budgets() {
        let table = RateTable::default();
        let rate = table.rate_for(Service::Storage, Operation::List).unwrap();
        assert_eq!(rate.burst, 10);
        assert!(table.rate_for(Service::Compute, Operation::Read).is_some());
    }

    #[test]
    fn test_unknown_service_has_no_limit() {
        let table = RateTable::default();
        for op in Operation::ALL {
            assert!(table.rate_for(Service::Unknown, op).is_none());
        }
    }

    #[test]
    fn test_unconfigured_pair_has_no_limit() {
        let table = RateTable::default();
        assert!(table.rate_for(Service::Redis, Operation::List).is_none());
        assert!(table.rate_for(Service::Redis, Operation::Read).is_some());
    }

    #[test]
    fn test_default_rates_are_valid() {
        for (service, operation, rate) in RateTable::default().iter() {
            rate.validate(service, operation).unwrap();
        }
    }

    #[test]
    fn test_overrides_replace_defaults() {
        let overrides = vec![RateOverride {
            service: Service::Storage,
            operation: Operation::List,
            rate_per_second: 1.0,
            burst: 1,
        }];
        let table = RateTable::with_overrides(&overrides).unwrap();
        assert_eq!(
            table.rate_for(Service::Storage, Operation::List),
            Some(Rate::new(1.0, 1))
        );
        assert_eq!(table.len(), RateTable::default().len());
    }

    #[test]
    fn test_overrides_can_add_budget() {
        let table = RateTable::default()
            .with_rate(Service::Redis, Operation::List, Rate::new(1.0, 5))
            .unwrap();
        assert_eq!(table.rate_for(Service::Redis, Operation::List), Some(Rate::new(1.0, 5)));
    }

    #[test]
    fn test_invalid_rates_rejected() {
        let mut table = RateTable::empty();
        assert!(table.insert(Service::Compute, Operation::Read, Rate::new(0.0, 1)).is_err());
        assert!(table.insert(Service::Compute, Operation::Read, Rate::new(-1.0, 1)).is_err());
        assert!(table.insert(Service::Compute, Operation::Read, Rate::new(f64::NAN, 1)).is_err());
        assert!(table.insert(Service::Compute, Operation::Read, Rate::new(1.0e-20, 1)).is_err());
        assert!(table.insert(Service::Compute, Operation::Read, Rate::new(1.0, 0)).is_err());
        assert!(table.insert(Service::Unknown, Operation::Read, Rate::new(1.0, 1)).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_slowest_accepted_rate() {
        let mut table = RateTable::empty();
        table
            .insert(Service::Storage, Operation::List, Rate::new(MIN_RATE_PER_SECOND, 1))
            .unwrap();
        assert!(table
            .insert(Service::Storage, Operation::List, Rate::new(MIN_RATE_PER_SECOND / 2.0, 1))
            .is_err());
    }

    #[test]
    fn test_lookup_is_pure() {
        let table = RateTable::default();
        let first = table.rate_for(Service::Network, Operation::Read);
        for _ in 0..10 {
            assert_eq!(table.rate_for(Service::Network, Operation::Read), first);
        }
    }
}
