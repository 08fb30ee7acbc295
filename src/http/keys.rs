//! Config-driven key extractors and exclusions for HTTP requests.

use async_trait::async_trait;

use super::context::RequestContext;
use crate::config::{KeySource, PathMatcher};
use crate::ratelimit::{ExclusionPredicate, KeyExtractor};

#[async_trait]
impl KeyExtractor<RequestContext> for KeySource {
    async fn extract(&self, ctx: &RequestContext) -> Option<String> {
        match self {
            KeySource::ClientIp => ctx.client_ip(),
            KeySource::Header { name } => ctx.header(name).map(str::to_string),
            KeySource::Path => Some(ctx.path().to_string()),
            KeySource::Fixed { value } => Some(value.clone()),
        }
    }
}

/// Excludes a request when its path matches any configured matcher.
#[derive(Debug, Clone, Default)]
pub struct PathExclusions {
    matchers: Vec<PathMatcher>,
}

impl PathExclusions {
    pub fn new(matchers: Vec<PathMatcher>) -> Self {
        Self { matchers }
    }

    pub fn is_empty(&self) -> bool {
        self.matchers.is_empty()
    }
}

#[async_trait]
impl ExclusionPredicate<RequestContext> for PathExclusions {
    async fn is_excluded(&self, ctx: &RequestContext) -> bool {
        let path = ctx.path();
        self.matchers.iter().any(|matcher| matcher.matches(path))
    }
}
