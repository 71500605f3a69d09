//! Rate limiting logic and state management.

mod bucket;
mod classifier;
mod key;
mod reaper;
mod registry;
mod rules;
mod throttle;

pub use bucket::{ReserveError, Reservation, TokenBucket};
pub use classifier::{multi_read_types, read_cost, service_for};
pub use key::{Operation, RateLimitKey, Service};
pub use reaper::spawn_reaper;
pub use registry::{LimiterRegistry, DEFAULT_IDLE_TTL};
pub use rules::{Rate, RateOverride, RateTable, MIN_RATE_PER_SECOND};
pub use throttle::{Throttle, WaitContext};
