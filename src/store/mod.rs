//! Durable state: the per-sender rate limit store.

pub mod rate_limiter;

pub use rate_limiter::{
    Clock, QuotaDecision, QuotaPolicy, RateLimiter, RateWindow, SystemClock, normalize_identity,
};
