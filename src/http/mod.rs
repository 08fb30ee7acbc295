//! HTTP integration for the rate limiter.
//!
//! Turns axum requests into [`RequestContext`] values, evaluates them once
//! per request in a middleware, and answers blocked requests with the
//! configured [`OnBlock`] action.

mod context;
mod keys;
mod middleware;
mod server;

pub use context::RequestContext;
pub use keys::PathExclusions;
pub use middleware::{limiter_from_config, rate_limit, OnBlock, RateLimitState, TooManyRequests};
pub use server::{router, HttpServer};
