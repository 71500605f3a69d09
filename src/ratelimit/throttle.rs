//! Admission API: wait until a list or read call may be issued.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::bucket::ReserveError;
use super::classifier::{read_cost, service_for};
use super::key::{Operation, RateLimitKey, Service};
use super::reaper::spawn_reaper;
use super::registry::LimiterRegistry;
use crate::config::ThrottleConfig;
use crate::error::{Result, ThrottleError};

/// Cancellation and deadline for a single wait.
#[derive(Debug, Clone)]
pub struct WaitContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for WaitContext {
    fn default() -> Self {
        Self::new()
    }
}

impl WaitContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context cancelled together with `token`.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.deadline(Instant::now() + timeout)
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Client-side throttle for management API calls.
///
/// Holds the limiter registry and, unless disabled in configuration, the
/// background task that sweeps idle limiters out of it. The sweep stops when
/// the throttle is dropped.
#[derive(Debug)]
pub struct Throttle {
    registry: Arc<LimiterRegistry>,
    reaper: Option<CancellationToken>,
}

impl Throttle {
    /// Build a throttle from configuration.
    ///
    /// Must be called from within a tokio runtime when the sweep is enabled.
    pub fn new(config: &ThrottleConfig) -> Result<Self> {
        let registry = Arc::new(LimiterRegistry::from_config(config)?);
        let reaper = config
            .registry
            .sweep_interval()
            .map(|every| spawn_reaper(&registry, every))
            .transpose()?;
        Ok(Self { registry, reaper })
    }

    /// Wrap an existing registry without a sweep task (lazy expiry only).
    pub fn with_registry(registry: Arc<LimiterRegistry>) -> Self {
        Self {
            registry,
            reaper: None,
        }
    }

    pub fn registry(&self) -> &Arc<LimiterRegistry> {
        &self.registry
    }

    /// Wait until `n` tokens of the (scope, service, operation) budget are available.
    ///
    /// Returns immediately when the key is not rate limited. Fails without
    /// waiting or touching the registry when the context is already cancelled.
    /// Fails without waiting when `n` exceeds the budget's burst, or when the
    /// wait would end after the context's deadline. Reservations are served in
    /// the order they were made. If the wait is cancelled or the future
    /// dropped, the reserved tokens are given back.
    pub async fn wait_for_service(
        &self,
        ctx: &WaitContext,
        scope: &str,
        service: Service,
        operation: Operation,
        n: u32,
    ) -> Result<()> {
        let key = RateLimitKey::new(scope, service, operation);
        if !self.registry.is_limited(&key) {
            return Ok(());
        }

        if ctx.is_cancelled() {
            return Err(ThrottleError::Cancelled { key });
        }

        let Some(bucket) = self.registry.acquire(&key) else {
            return Ok(());
        };

        let now = Instant::now();
        let reservation = bucket.reserve_at(n, now).map_err(|e| match e {
            ReserveError::ExceedsBurst => ThrottleError::BurstExceeded {
                service,
                operation,
                requested: n,
                burst: bucket.burst(),
            },
            ReserveError::Unschedulable => ThrottleError::Unschedulable { key: key.clone() },
        })?;

        let delay = reservation.delay_from(now);
        if delay.is_zero() {
            reservation.consume();
            return Ok(());
        }

        if let Some(deadline) = ctx.deadline {
            if reservation.ready_at() > deadline {
                return Err(ThrottleError::DeadlineExceeded { key, delay });
            }
        }

        trace!(key = %key, tokens = n, delay_ms = delay.as_millis() as u64, "Waiting for reservation");

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ThrottleError::Cancelled { key }),
            _ = tokio::time::sleep_until(reservation.ready_at()) => {
                reservation.consume();
                Ok(())
            }
        }
    }

    /// Wait before listing all resources of `resource_type` in `scope`.
    pub async fn wait_for_resource_list(
        &self,
        ctx: &WaitContext,
        scope: &str,
        resource_type: &str,
    ) -> Result<()> {
        let service = service_for(resource_type);
        if service.is_unknown() {
            return Ok(());
        }
        self.wait_for_service(ctx, scope, service, Operation::List, 1).await
    }

    /// Wait before refreshing one resource of `resource_type` in `scope`.
    ///
    /// Reserves as many read tokens as the resource's refresh issues calls.
    pub async fn wait_for_resource_refresh(
        &self,
        ctx: &WaitContext,
        scope: &str,
        resource_type: &str,
    ) -> Result<()> {
        let service = service_for(resource_type);
        if service.is_unknown() {
            return Ok(());
        }
        let n = read_cost(resource_type);
        self.wait_for_service(ctx, scope, service, Operation::Read, n).await
    }
}

impl Drop for Throttle {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.take() {
            reaper.cancel();
        }
    }
}
