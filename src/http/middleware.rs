//! Axum middleware enforcing the rate limiter.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{trace, warn};

use super::context::RequestContext;
use super::keys::PathExclusions;
use crate::config::AppConfig;
use crate::error::Result;
use crate::ratelimit::{Decision, RateLimiter};

/// Builds the response sent instead of running the handler.
pub trait OnBlock: Send + Sync {
    fn on_block(&self, key: &str, retry_after_secs: u64) -> Response;
}

/// Default block action: `429 Too Many Requests` with a `Retry-After` header.
#[derive(Debug, Clone, Copy, Default)]
pub struct TooManyRequests;

impl OnBlock for TooManyRequests {
    fn on_block(&self, key: &str, retry_after_secs: u64) -> Response {
        warn!(
            key = %key,
            retry_after = retry_after_secs,
            "Rate limit exceeded, rejecting request"
        );
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            "Too Many Requests",
        )
            .into_response()
    }
}

/// Shared state for [`rate_limit`].
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter<RequestContext>>,
    on_block: Arc<dyn OnBlock>,
}

impl RateLimitState {
    /// State using the default block action.
    pub fn new(limiter: Arc<RateLimiter<RequestContext>>) -> Self {
        Self {
            limiter,
            on_block: Arc::new(TooManyRequests),
        }
    }

    /// Replace the block action.
    pub fn with_on_block<B>(mut self, on_block: B) -> Self
    where
        B: OnBlock + 'static,
    {
        self.on_block = Arc::new(on_block);
        self
    }

    pub fn limiter(&self) -> &RateLimiter<RequestContext> {
        &self.limiter
    }
}

/// Evaluate the request once and either run the rest of the stack or answer
/// with the block action.
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::from_request(&request);

    match state.limiter.evaluate(&ctx).await {
        Decision::Allow => {
            trace!(path = %ctx.path(), "Request allowed");
            next.run(request).await
        }
        Decision::Block {
            key,
            retry_after_secs,
            ..
        } => state.on_block.on_block(&key, retry_after_secs),
    }
}

/// Build a limiter for HTTP requests from configuration.
pub fn limiter_from_config(config: &AppConfig) -> Result<RateLimiter<RequestContext>> {
    let mut builder = RateLimiter::<RequestContext>::builder();

    for rule in &config.rules {
        builder.register_shared_rule(
            rule.name.clone(),
            rule.limit,
            rule.window,
            Arc::new(rule.key.clone()),
        )?;
    }

    let exclusions = PathExclusions::new(config.exclude.clone());
    if !exclusions.is_empty() {
        builder.set_exclusion_predicate(exclusions);
    }

    builder.set_purge_thresholds(config.purge.hit_count, config.purge.interval)?;
    builder.build()
}
