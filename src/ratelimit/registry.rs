//! Limiter registry: one token bucket per observed key, reclaimed when idle.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use super::key::RateLimitKey;
use super::rules::RateTable;
use crate::config::ThrottleConfig;
use crate::error::Result;

/// Default time an unused limiter is kept.
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(600);

struct LimiterEntry {
    bucket: Arc<TokenBucket>,
    expires_at: Instant,
}

impl LimiterEntry {
    /// Idle once both the last lookup and the last queued reservation are a
    /// full TTL in the past.
    fn is_idle(&self, now: Instant, idle_ttl: Duration) -> bool {
        self.expires_at <= now
            && self
                .bucket
                .last_event()
                .checked_add(idle_ttl)
                .is_some_and(|drained| drained <= now)
    }
}

/// Registry of token buckets indexed by [`RateLimitKey`].
///
/// Buckets are created lazily from the [`RateTable`] on first use and stay
/// alive while they keep being looked up or still have reservations queued.
/// An entry idle for longer than the idle TTL is replaced on its next lookup
/// and removed by [`LimiterRegistry::sweep`].
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct LimiterRegistry {
    entries: DashMap<RateLimitKey, LimiterEntry>,
    rates: RateTable,
    idle_ttl: Duration,
}

impl LimiterRegistry {
    /// Create a registry over the given rate table.
    pub fn new(rates: RateTable, idle_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            rates,
            idle_ttl,
        }
    }

    /// Create a registry from configuration (built-in rates plus overrides).
    pub fn from_config(config: &ThrottleConfig) -> Result<Self> {
        let rates = RateTable::with_overrides(&config.rates)?;
        Ok(Self::new(rates, config.registry.idle_ttl()))
    }

    /// Get the limiter for `key`, creating it if needed.
    ///
    /// Returns `None` when the key is not rate limited: the service is unknown
    /// or the rate table has no budget for it. `None` means "admit immediately".
    pub fn acquire(&self, key: &RateLimitKey) -> Option<Arc<TokenBucket>> {
        self.acquire_at(key, Instant::now())
    }

    pub fn acquire_at(&self, key: &RateLimitKey, now: Instant) -> Option<Arc<TokenBucket>> {
        if key.is_unlimited() {
            return None;
        }

        let expires_at = now + self.idle_ttl;

        // Lookup, creation and TTL refresh happen under the entry's shard lock.
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_idle(now, self.idle_ttl) {
                    debug!(key = %key, "Replacing expired limiter");
                    entry.bucket = Arc::new(TokenBucket::new_at(entry.bucket.rate(), now));
                } else {
                    trace!(key = %key, "Reusing limiter");
                }
                entry.expires_at = expires_at;
                Some(Arc::clone(&entry.bucket))
            }
            Entry::Vacant(vacant) => {
                let rate = self.rates.rate_for(key.service, key.operation)?;
                debug!(
                    key = %key,
                    rate = rate.per_second,
                    burst = rate.burst,
                    "Creating new limiter"
                );
                let bucket = Arc::new(TokenBucket::new_at(rate, now));
                vacant.insert(LimiterEntry {
                    bucket: Arc::clone(&bucket),
                    expires_at,
                });
                Some(bucket)
            }
        }
    }

    /// Whether `key` has a budget at all. Unlimited keys never get an entry.
    pub fn is_limited(&self, key: &RateLimitKey) -> bool {
        !key.is_unlimited() && self.rates.rate_for(key.service, key.operation).is_some()
    }

    /// Remove every entry idle past its expiry. Returns the number removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            let keep = !entry.is_idle(now, self.idle_ttl);
            if !keep {
                trace!(key = %key, "Removing idle limiter");
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Whether a limiter currently exists for `key`.
    pub fn contains(&self, key: &RateLimitKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Get the number of live limiters.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all limiters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn rates(&self) -> &RateTable {
        &self.rates
    }

    pub fn idle_ttl(&self) -> Duration {
        self.idle_ttl
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new(RateTable::default(), DEFAULT_IDLE_TTL)
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("limiters", &self.entries.len())
            .field("idle_ttl", &self.idle_ttl)
            .finish()
    }
}
