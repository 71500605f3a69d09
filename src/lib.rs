//! Armthrottle - client-side rate limiting for Azure Resource Manager calls
//!
//! This crate throttles outbound list and read calls per scope (tenant or
//! subscription), per logical service and per operation kind, so that large
//! refreshes stay under the management API's published throttling limits
//! instead of tripping them.
//!
//! Callers invoke [`Throttle::wait_for_resource_list`] or
//! [`Throttle::wait_for_resource_refresh`] before issuing the API call; the
//! future resolves once a token-bucket reservation for that call is due.

pub mod config;
pub mod error;
pub mod ratelimit;

pub use error::{Result, ThrottleError};
pub use ratelimit::{Operation, RateLimitKey, Service, Throttle, WaitContext};
