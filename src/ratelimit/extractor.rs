//! Request-facing capabilities supplied by the integration layer.

use async_trait::async_trait;

/// Derives the rate limit key for one rule from a request.
///
/// Returning `None` means the rule does not apply to the request. Any
/// `Fn(&C) -> Option<String>` closure is a key extractor; implement the trait
/// directly when the key has to be awaited.
#[async_trait]
pub trait KeyExtractor<C: ?Sized + Sync>: Send + Sync {
    /// Extract the key for this request.
    async fn extract(&self, ctx: &C) -> Option<String>;
}

#[async_trait]
impl<C, F> KeyExtractor<C> for F
where
    C: ?Sized + Sync,
    F: Fn(&C) -> Option<String> + Send + Sync,
{
    async fn extract(&self, ctx: &C) -> Option<String> {
        self(ctx)
    }
}

/// Decides whether a request bypasses rate limiting entirely.
#[async_trait]
pub trait ExclusionPredicate<C: ?Sized + Sync>: Send + Sync {
    /// Return `true` to skip every rule for this request.
    async fn is_excluded(&self, ctx: &C) -> bool;
}

#[async_trait]
impl<C, F> ExclusionPredicate<C> for F
where
    C: ?Sized + Sync,
    F: Fn(&C) -> bool + Send + Sync,
{
    async fn is_excluded(&self, ctx: &C) -> bool {
        self(ctx)
    }
}
