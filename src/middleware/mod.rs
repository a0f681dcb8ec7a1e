//! Per-IP HTTP rate limiting, independent of the outbound venue-side
//! token buckets in `ratelimiter`. Request logging is handled by
//! `tower_http::trace::TraceLayer` in `api::routes`, not here.

pub mod rate_limit;

pub use rate_limit::{RateLimitConfig, RateLimitLayer};
