//! Token bucket with reservations.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use super::rules::Rate;

/// Why a reservation could not be made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveError {
    /// More tokens than the bucket can ever hold.
    ExceedsBurst,
    /// The reservation would come due too far in the future to represent.
    Unschedulable,
}

/// A token bucket that hands out reservations.
///
/// Tokens refill continuously at `rate.per_second` up to `rate.burst`.
/// Reserving `n` tokens always commits them immediately, possibly driving the
/// balance negative; the reservation then carries the instant at which the
/// deficit will have been refilled. Later reservations queue behind earlier
/// ones, so admission order per bucket is the order of reservation.
#[derive(Debug)]
pub struct TokenBucket {
    rate: Rate,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    /// Token balance as of `last` (negative when reservations are queued)
    tokens: f64,
    /// Last time `tokens` was brought up to date
    last: Instant,
    /// Time to act of the latest reservation
    last_event: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(rate: Rate) -> Self {
        Self::new_at(rate, Instant::now())
    }

    pub fn new_at(rate: Rate, now: Instant) -> Self {
        Self {
            rate,
            state: Mutex::new(BucketState {
                tokens: rate.burst as f64,
                last: now,
                last_event: now,
            }),
        }
    }

    pub fn rate(&self) -> Rate {
        self.rate
    }

    pub fn burst(&self) -> u32 {
        self.rate.burst
    }

    /// Tokens available at `now` (negative while reservations are pending).
    pub fn available_at(&self, now: Instant) -> f64 {
        let state = self.state.lock();
        self.advance(&state, now)
    }

    /// Time to act of the latest reservation; nothing is queued past it.
    pub fn last_event(&self) -> Instant {
        self.state.lock().last_event
    }

    /// Reserve `n` tokens at `now`.
    ///
    /// Fails if `n` exceeds the burst, since such a reservation could never be
    /// satisfied, or if the backlog pushes its time to act out of range. A
    /// failed reservation takes nothing. Dropping the returned [`Reservation`]
    /// before calling [`Reservation::consume`] gives the tokens back.
    pub fn reserve_at(self: &Arc<Self>, n: u32, now: Instant) -> Result<Reservation, ReserveError> {
        if n > self.rate.burst {
            return Err(ReserveError::ExceedsBurst);
        }

        let mut state = self.state.lock();
        let now = now.max(state.last);
        let tokens = self.advance(&state, now) - n as f64;
        let wait = if tokens < 0.0 {
            self.duration_from_tokens(-tokens).ok_or(ReserveError::Unschedulable)?
        } else {
            Duration::ZERO
        };
        let time_to_act = now.checked_add(wait).ok_or(ReserveError::Unschedulable)?;

        state.tokens = tokens;
        state.last = now;
        state.last_event = time_to_act;

        Ok(Reservation {
            bucket: Arc::clone(self),
            tokens: n,
            time_to_act,
            consumed: false,
        })
    }

    pub fn reserve(self: &Arc<Self>, n: u32) -> Result<Reservation, ReserveError> {
        self.reserve_at(n, Instant::now())
    }

    /// Tokens in the bucket at `now`, refilled from the last update and capped at burst.
    fn advance(&self, state: &BucketState, now: Instant) -> f64 {
        let elapsed = now.saturating_duration_since(state.last);
        let refilled = state.tokens + elapsed.as_secs_f64() * self.rate.per_second;
        refilled.min(self.rate.burst as f64)
    }

    fn duration_from_tokens(&self, tokens: f64) -> Option<Duration> {
        Duration::try_from_secs_f64(tokens / self.rate.per_second).ok()
    }

    /// Return the tokens of an abandoned reservation, minus whatever later
    /// reservations have already been promised.
    fn cancel_at(&self, tokens: u32, time_to_act: Instant, now: Instant) {
        if tokens == 0 || time_to_act <= now {
            return;
        }

        let mut state = self.state.lock();
        let promised_after = state
            .last_event
            .saturating_duration_since(time_to_act)
            .as_secs_f64()
            * self.rate.per_second;
        let restore = tokens as f64 - promised_after;
        if restore <= 0.0 {
            return;
        }

        let now = now.max(state.last);
        let refilled = (self.advance(&state, now) + restore).min(self.rate.burst as f64);
        state.tokens = refilled;
        state.last = now;

        if time_to_act == state.last_event {
            let prev_event = self
                .duration_from_tokens(tokens as f64)
                .and_then(|d| time_to_act.checked_sub(d));
            if let Some(prev_event) = prev_event {
                if prev_event >= now {
                    state.last_event = prev_event;
                }
            }
        }
    }
}

/// Tokens committed by a [`TokenBucket`], usable from [`Reservation::ready_at`].
#[derive(Debug)]
#[must_use = "dropping a reservation gives its tokens back"]
pub struct Reservation {
    bucket: Arc<TokenBucket>,
    tokens: u32,
    time_to_act: Instant,
    consumed: bool,
}

impl Reservation {
    /// When the reserved tokens are available.
    pub fn ready_at(&self) -> Instant {
        self.time_to_act
    }

    /// How long a caller at `now` has to wait before acting.
    pub fn delay_from(&self, now: Instant) -> Duration {
        self.time_to_act.saturating_duration_since(now)
    }

    pub fn tokens(&self) -> u32 {
        self.tokens
    }

    /// Keep the tokens; the caller is acting on this reservation.
    pub fn consume(mut self) {
        self.consumed = true;
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.consumed {
            self.bucket.cancel_at(self.tokens, self.time_to_act, Instant::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(per_second: f64, burst: u32) -> (Arc<TokenBucket>, Instant) {
        let now = Instant::now();
        (Arc::new(TokenBucket::new_at(Rate::new(per_second, burst), now)), now)
    }

    #[test]
    fn test_full_bucket_admits_burst_immediately() {
        let (bucket, now) = bucket(1.0, 5);
        for _ in 0..5 {
            let r = bucket.reserve_at(1, now).unwrap();
            assert_eq!(r.delay_from(now), Duration::ZERO);
            r.consume();
        }
        assert_eq!(bucket.available_at(now), 0.0);
    }

    #[test]
    fn test_empty_bucket_delays_by_refill_time() {
        let (bucket, now) = bucket(2.0, 2);
        bucket.reserve_at(2, now).unwrap().consume();

        let r = bucket.reserve_at(1, now).unwrap();
        assert_eq!(r.delay_from(now), Duration::from_millis(500));
        r.consume();
    }

    #[test]
    fn test_reservations_queue_in_order() {
        let (bucket, now) = bucket(1.0, 1);
        let first = bucket.reserve_at(1, now).unwrap();
        let second = bucket.reserve_at(1, now).unwrap();
        let third = bucket.reserve_at(1, now).unwrap();

        assert_eq!(first.delay_from(now), Duration::ZERO);
        assert_eq!(second.delay_from(now), Duration::from_secs(1));
        assert_eq!(third.delay_from(now), Duration::from_secs(2));
        first.consume();
        second.consume();
        third.consume();
    }

    #[test]
    fn test_reserve_over_burst_fails() {
        let (bucket, now) = bucket(10.0, 3);
        assert_eq!(bucket.reserve_at(4, now).unwrap_err(), ReserveError::ExceedsBurst);
        // Nothing was taken.
        assert_eq!(bucket.available_at(now), 3.0);
    }

    #[test]
    fn test_refill_caps_at_burst() {
        let (bucket, now) = bucket(1.0, 3);
        bucket.reserve_at(3, now).unwrap().consume();
        assert_eq!(bucket.available_at(now + Duration::from_secs(1)), 1.0);
        assert_eq!(bucket.available_at(now + Duration::from_secs(60)), 3.0);
    }

    #[test]
    fn test_cancelled_reservation_restores_tokens() {
        let (bucket, now) = bucket(1.0, 1);
        bucket.reserve_at(1, now).unwrap().consume();

        let pending = bucket.reserve_at(1, now).unwrap();
        assert_eq!(bucket.available_at(now), -1.0);
        bucket.cancel_at(pending.tokens(), pending.ready_at(), now);
        pending.consume();

        assert_eq!(bucket.available_at(now), 0.0);
        let next = bucket.reserve_at(1, now).unwrap();
        assert_eq!(next.delay_from(now), Duration::from_secs(1));
        next.consume();
    }

    #[test]
    fn test_cancel_keeps_tokens_promised_to_later_reservations() {
        let (bucket, now) = bucket(1.0, 1);
        bucket.reserve_at(1, now).unwrap().consume();
        let second = bucket.reserve_at(1, now).unwrap();
        let third = bucket.reserve_at(1, now).unwrap();

        // The third reservation already depends on the second's slot.
        bucket.cancel_at(second.tokens(), second.ready_at(), now);
        second.consume();
        assert_eq!(bucket.available_at(now), -2.0);
        third.consume();
    }

    #[test]
    fn test_cancel_after_time_to_act_is_noop() {
        let (bucket, now) = bucket(1.0, 1);
        bucket.reserve_at(1, now).unwrap().consume();
        let r = bucket.reserve_at(1, now).unwrap();
        let later = r.ready_at();
        bucket.cancel_at(r.tokens(), r.ready_at(), later);
        r.consume();
        assert_eq!(bucket.available_at(later), 0.0);
    }

    #[test]
    fn test_out_of_order_now_does_not_rewind() {
        let (bucket, now) = bucket(1.0, 1);
        let later = now + Duration::from_secs(5);
        bucket.reserve_at(1, later).unwrap().consume();
        // A caller that sampled the clock earlier queues behind, not before.
        let r = bucket.reserve_at(1, now).unwrap();
        assert_eq!(r.ready_at(), later + Duration::from_secs(1));
        r.consume();
    }

    #[test]
    fn test_backlog_out_of_range_is_unschedulable() {
        // One token per ~3e12 years: the second reservation cannot be represented.
        let (bucket, now) = bucket(1.0e-20, 1);
        bucket.reserve_at(1, now).unwrap().consume();

        assert_eq!(bucket.reserve_at(1, now).unwrap_err(), ReserveError::Unschedulable);
        assert_eq!(bucket.available_at(now), 0.0);
        assert_eq!(bucket.last_event(), now);
    }

    #[test]
    fn test_last_event_tracks_queue_tail() {
        let (bucket, now) = bucket(1.0, 1);
        assert_eq!(bucket.last_event(), now);
        for _ in 0..3 {
            bucket.reserve_at(1, now).unwrap().consume();
        }
        assert_eq!(bucket.last_event(), now + Duration::from_secs(2));
    }
}
