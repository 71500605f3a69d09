//! Background sweep that reclaims idle limiters.
//!
//! A single task per registry wakes on a fixed interval and removes every
//! entry whose expiry has passed. This complements the lazy expiry done on
//! lookup: lookups guarantee a fresh bucket after idling, the sweep keeps
//! keys that are never looked up again from accumulating.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::registry::LimiterRegistry;
use crate::error::{Result, ThrottleError};

/// Spawn the sweep task for `registry`.
///
/// Returns a CancellationToken that stops the task. The task also stops on
/// its own once the registry has been dropped.
pub fn spawn_reaper(registry: &Arc<LimiterRegistry>, every: Duration) -> Result<CancellationToken> {
    if every.is_zero() {
        return Err(ThrottleError::Config("sweep interval must be non-zero".to_string()));
    }
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| ThrottleError::NoRuntime)?;
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let registry = Arc::downgrade(registry);

    runtime.spawn(async move {
        run_reaper_loop(registry, every, cancel_clone).await;
    });

    Ok(cancel)
}

async fn run_reaper_loop(registry: Weak<LimiterRegistry>, every: Duration, cancel: CancellationToken) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    debug!(interval_ms = every.as_millis() as u64, "Limiter reaper started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Limiter reaper shutting down");
                break;
            }
            _ = ticker.tick() => {
                let Some(registry) = registry.upgrade() else {
                    debug!("Limiter registry dropped, reaper exiting");
                    break;
                };
                let removed = registry.sweep();
                if removed > 0 {
                    info!(removed, remaining = registry.len(), "Reclaimed idle limiters");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::key::{Operation, RateLimitKey, Service};
    use crate::ratelimit::rules::RateTable;

    fn registry(ttl_secs: u64) -> Arc<LimiterRegistry> {
        Arc::new(LimiterRegistry::new(RateTable::default(), Duration::from_secs(ttl_secs)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_removes_idle_entries() {
        let registry = registry(5);
        let key = RateLimitKey::new("sub", Service::Compute, Operation::List);
        registry.acquire(&key).unwrap();

        let cancel = spawn_reaper(&registry, Duration::from_secs(1)).unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(registry.contains(&key));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!registry.contains(&key));
        assert!(registry.is_empty());

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_spares_active_entries() {
        let registry = registry(5);
        let key = RateLimitKey::new("sub", Service::Network, Operation::Read);
        let cancel = spawn_reaper(&registry, Duration::from_secs(1)).unwrap();

        for _ in 0..10 {
            registry.acquire(&key).unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert!(registry.contains(&key));

        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_stops_on_cancel() {
        let registry = registry(1);
        let cancel = spawn_reaper(&registry, Duration::from_secs(1)).unwrap();
        cancel.cancel();
        tokio::task::yield_now().await;

        let key = RateLimitKey::new("sub", Service::Compute, Operation::Read);
        registry.acquire(&key).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        // Nobody swept; only lazy expiry would replace it.
        assert!(registry.contains(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_exits_when_registry_dropped() {
        let registry = registry(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_reaper_loop(
            Arc::downgrade(&registry),
            Duration::from_secs(1),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(!task.is_finished());

        drop(registry);
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("reaper still running after registry drop")
            .unwrap();
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_task_finishes_on_cancel() {
        let registry = registry(1);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_reaper_loop(
            Arc::downgrade(&registry),
            Duration::from_secs(60),
            cancel.clone(),
        ));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("reaper still running after cancel")
            .unwrap();
        assert_eq!(Arc::strong_count(&registry), 1);
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let registry = registry(1);
        assert!(matches!(
            spawn_reaper(&registry, Duration::ZERO),
            Err(ThrottleError::Config(_))
        ));
    }

    #[test]
    fn test_spawn_requires_runtime() {
        let registry = registry(1);
        assert!(matches!(
            spawn_reaper(&registry, Duration::from_secs(1)),
            Err(ThrottleError::NoRuntime)
        ));
    }
}
