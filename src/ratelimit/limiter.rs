//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::extractor::{ExclusionPredicate, KeyExtractor};
use super::purge::{PurgeScheduler, DEFAULT_PURGE_HIT_COUNT, DEFAULT_PURGE_INTERVAL};
use super::rules::{RuleId, RuleRegistry, RuleRegistryBuilder};
use super::store::CounterStore;
use crate::error::{QuotaGateError, Result};

/// Outcome of evaluating a request against every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// No rule was exceeded, or the request was excluded.
    Allow,
    /// The first rule whose quota was exceeded.
    Block {
        rule: RuleId,
        /// Key the exceeded counter belongs to
        key: String,
        /// Seconds until that key's window resets
        retry_after_secs: u64,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

/// Point-in-time figures about a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterStats {
    pub rules: usize,
    pub counters: usize,
}

/// The rate limiter that evaluates requests of type `C`.
///
/// This struct is thread-safe and can be shared across multiple tasks. Its
/// rules are fixed at build time; only the counters change afterwards.
pub struct RateLimiter<C: ?Sized + Sync> {
    rules: RuleRegistry<C>,
    counters: CounterStore,
    exclusion: Option<Arc<dyn ExclusionPredicate<C>>>,
    clock: Arc<dyn Clock>,
}

impl<C: ?Sized + Sync> RateLimiter<C> {
    /// Start configuring a rate limiter.
    pub fn builder() -> RateLimiterBuilder<C> {
        RateLimiterBuilder::new()
    }

    /// Evaluate a request against the rules in registration order.
    ///
    /// Each rule that yields a key records a hit for it. Evaluation stops at
    /// the first rule that is over its limit, so rules before it keep their
    /// hit and rules after it are never consulted. A hit is not rolled back
    /// if the caller drops this future part way through.
    pub async fn evaluate(&self, ctx: &C) -> Decision {
        if let Some(exclusion) = &self.exclusion {
            if exclusion.is_excluded(ctx).await {
                trace!("Request excluded from rate limiting");
                return Decision::Allow;
            }
        }

        for rule in self.rules.iter() {
            let Some(key) = rule.key_extractor().extract(ctx).await else {
                trace!(rule = %rule.label(), "Rule does not apply to request");
                continue;
            };

            let outcome = self.counters.record_hit(rule.quota(), &key, self.clock.now());
            if let Some(retry_after_secs) = outcome.retry_after_secs {
                debug!(
                    rule = %rule.label(),
                    key = %key,
                    count = outcome.count,
                    limit = rule.limit(),
                    retry_after = retry_after_secs,
                    "Rate limit exceeded"
                );
                return Decision::Block {
                    rule: rule.id(),
                    key,
                    retry_after_secs,
                };
            }
        }

        Decision::Allow
    }

    /// Run a purge pass now, returning how many counters were removed.
    pub fn purge(&self) -> usize {
        self.counters.purge(self.clock.now())
    }

    /// Get the current counter value for a rule and key.
    ///
    /// Returns `None` if no live counter exists for the pair.
    pub fn get_counter_value(&self, rule: RuleId, key: &str) -> Option<u64> {
        self.counters.counter_value(rule, key, self.clock.now())
    }

    pub fn rules(&self) -> &RuleRegistry<C> {
        &self.rules
    }

    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            rules: self.rules.len(),
            counters: self.counters.len(),
        }
    }
}

/// Setup-phase configuration for a [`RateLimiter`].
pub struct RateLimiterBuilder<C: ?Sized + Sync> {
    rules: RuleRegistryBuilder<C>,
    exclusion: Option<Arc<dyn ExclusionPredicate<C>>>,
    purge_hit_count: u64,
    purge_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl<C: ?Sized + Sync> RateLimiterBuilder<C> {
    pub fn new() -> Self {
        Self {
            rules: RuleRegistryBuilder::new(),
            exclusion: None,
            purge_hit_count: DEFAULT_PURGE_HIT_COUNT,
            purge_interval: DEFAULT_PURGE_INTERVAL,
            clock: Arc::new(SystemClock),
        }
    }

    /// Register a rule allowing `limit` hits per `window` for each key.
    pub fn register_rule<E>(
        &mut self,
        limit: u64,
        window: Duration,
        key_extractor: E,
    ) -> Result<RuleId>
    where
        E: KeyExtractor<C> + 'static,
    {
        self.rules.register(None, limit, window, Arc::new(key_extractor))
    }

    /// Register a rule with a name used in logs.
    pub fn register_named_rule<E>(
        &mut self,
        name: impl Into<String>,
        limit: u64,
        window: Duration,
        key_extractor: E,
    ) -> Result<RuleId>
    where
        E: KeyExtractor<C> + 'static,
    {
        self.rules
            .register(Some(name.into()), limit, window, Arc::new(key_extractor))
    }

    /// Register a rule whose extractor is already shared.
    pub fn register_shared_rule(
        &mut self,
        name: Option<String>,
        limit: u64,
        window: Duration,
        key_extractor: Arc<dyn KeyExtractor<C>>,
    ) -> Result<RuleId> {
        self.rules.register(name, limit, window, key_extractor)
    }

    /// Requests matching `predicate` skip every rule.
    pub fn set_exclusion_predicate<P>(&mut self, predicate: P) -> &mut Self
    where
        P: ExclusionPredicate<C> + 'static,
    {
        self.exclusion = Some(Arc::new(predicate));
        self
    }

    /// Purge after `hit_count` hits or `interval` of time, whichever comes first.
    pub fn set_purge_thresholds(
        &mut self,
        hit_count: u64,
        interval: Duration,
    ) -> Result<&mut Self> {
        if hit_count == 0 || interval.is_zero() {
            return Err(QuotaGateError::InvalidPurgeThreshold(format!(
                "hit count ({}) and interval ({:?}) must both be greater than zero",
                hit_count, interval
            )));
        }
        self.purge_hit_count = hit_count;
        self.purge_interval = interval;
        Ok(self)
    }

    /// Replace the system clock.
    pub fn set_clock<K>(&mut self, clock: K) -> &mut Self
    where
        K: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    /// Finish setup.
    pub fn build(self) -> Result<RateLimiter<C>> {
        let purge =
            PurgeScheduler::new(self.purge_hit_count, self.purge_interval, self.clock.now())?;
        let rules = self.rules.build();

        debug!(
            rules = rules.len(),
            excluding = self.exclusion.is_some(),
            purge_hit_count = self.purge_hit_count,
            purge_interval = ?self.purge_interval,
            "Rate limiter built"
        );

        Ok(RateLimiter {
            rules,
            counters: CounterStore::new(purge),
            exclusion: self.exclusion,
            clock: self.clock,
        })
    }
}

impl<C: ?Sized + Sync> Default for RateLimiterBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use async_trait::async_trait;
    use std::time::Instant;

    const MINUTE: Duration = Duration::from_secs(60);

    #[derive(Debug, Clone, Default)]
    struct TestRequest {
        host: Option<String>,
        user: Option<String>,
        path: String,
    }

    fn request(host: &str, path: &str) -> TestRequest {
        TestRequest {
            host: Some(host.to_string()),
            user: None,
            path: path.to_string(),
        }
    }

    fn by_host(req: &TestRequest) -> Option<String> {
        req.host.clone()
    }

    fn by_user(req: &TestRequest) -> Option<String> {
        req.user.clone()
    }

    struct SlowHost;

    #[async_trait]
    impl KeyExtractor<TestRequest> for SlowHost {
        async fn extract(&self, ctx: &TestRequest) -> Option<String> {
            tokio::task::yield_now().await;
            ctx.host.clone()
        }
    }

    #[tokio::test]
    async fn test_localhost_scenario() {
        let clock = ManualClock::new(Instant::now());
        let mut builder = RateLimiter::<TestRequest>::builder();
        let rule = builder.register_rule(10, MINUTE, by_host).unwrap();
        builder
            .set_exclusion_predicate(|req: &TestRequest| req.path.ends_with("excluded"))
            .set_clock(clock.clone());
        let limiter = builder.build().unwrap();

        for _ in 0..10 {
            let decision = limiter.evaluate(&request("localhost", "/")).await;
            assert_eq!(decision, Decision::Allow);
        }

        let decision = limiter.evaluate(&request("localhost", "/")).await;
        assert_eq!(
            decision,
            Decision::Block {
                rule,
                key: "localhost".to_string(),
                retry_after_secs: 60,
            }
        );

        let decision = limiter.evaluate(&request("localhost", "/excluded")).await;
        assert_eq!(decision, Decision::Allow);
        assert_eq!(limiter.get_counter_value(rule, "localhost"), Some(11));
    }

    #[tokio::test]
    async fn test_excluded_request_creates_no_counter() {
        let mut builder = RateLimiter::<TestRequest>::builder();
        builder.register_rule(0, MINUTE, by_host).unwrap();
        builder.set_exclusion_predicate(|req: &TestRequest| req.path.ends_with("excluded"));
        let limiter = builder.build().unwrap();

        for _ in 0..3 {
            assert!(limiter.evaluate(&request("localhost", "/excluded")).await.is_allowed());
        }
        assert_eq!(limiter.stats().counters, 0);
    }

    #[tokio::test]
    async fn test_retry_after_tracks_window() {
        let clock = ManualClock::new(Instant::now());
        let mut builder = RateLimiter::<TestRequest>::builder();
        builder.register_rule(1, MINUTE, by_host).unwrap();
        builder.set_clock(clock.clone());
        let limiter = builder.build().unwrap();

        limiter.evaluate(&request("a", "/")).await;
        clock.advance(Duration::from_millis(45_500));

        match limiter.evaluate(&request("a", "/")).await {
            Decision::Block { retry_after_secs, .. } => {
                assert_eq!(retry_after_secs, 15);
                assert!(retry_after_secs > 0 && retry_after_secs <= 60);
            }
            Decision::Allow => panic!("expected block"),
        }
    }

    #[tokio::test]
    async fn test_window_reset_allows_again() {
        let clock = ManualClock::new(Instant::now());
        let mut builder = RateLimiter::<TestRequest>::builder();
        let rule = builder.register_rule(2, MINUTE, by_host).unwrap();
        builder.set_clock(clock.clone());
        let limiter = builder.build().unwrap();

        for _ in 0..5 {
            limiter.evaluate(&request("a", "/")).await;
        }
        assert!(!limiter.evaluate(&request("a", "/")).await.is_allowed());

        clock.advance(MINUTE);
        assert!(limiter.evaluate(&request("a", "/")).await.is_allowed());
        assert_eq!(limiter.get_counter_value(rule, "a"), Some(1));
    }

    #[tokio::test]
    async fn test_absent_key_skips_rule() {
        let mut builder = RateLimiter::<TestRequest>::builder();
        let user_rule = builder.register_rule(0, MINUTE, by_user).unwrap();
        let host_rule = builder.register_rule(10, MINUTE, by_host).unwrap();
        let limiter = builder.build().unwrap();

        assert!(limiter.evaluate(&request("a", "/")).await.is_allowed());
        assert_eq!(limiter.get_counter_value(user_rule, "a"), None);
        assert_eq!(limiter.get_counter_value(host_rule, "a"), Some(1));
    }

    #[tokio::test]
    async fn test_reached_rules_record_hit_before_block() {
        let mut builder = RateLimiter::<TestRequest>::builder();
        let host_rule = builder.register_rule(10, MINUTE, by_host).unwrap();
        let user_rule = builder.register_rule(1, MINUTE, by_user).unwrap();
        let limiter = builder.build().unwrap();

        let req = TestRequest {
            user: Some("alice".to_string()),
            ..request("a", "/")
        };

        assert!(limiter.evaluate(&req).await.is_allowed());
        let decision = limiter.evaluate(&req).await;
        assert!(matches!(decision, Decision::Block { rule, .. } if rule == user_rule));

        // The earlier rule still counted both requests.
        assert_eq!(limiter.get_counter_value(host_rule, "a"), Some(2));
        assert_eq!(limiter.get_counter_value(user_rule, "alice"), Some(2));
    }

    #[tokio::test]
    async fn test_rules_after_block_not_touched() {
        let mut builder = RateLimiter::<TestRequest>::builder();
        let host_rule = builder.register_rule(1, MINUTE, by_host).unwrap();
        let user_rule = builder.register_rule(10, MINUTE, by_user).unwrap();
        let limiter = builder.build().unwrap();

        let req = TestRequest {
            user: Some("alice".to_string()),
            ..request("a", "/")
        };

        limiter.evaluate(&req).await;
        let decision = limiter.evaluate(&req).await;

        assert!(matches!(decision, Decision::Block { rule, .. } if rule == host_rule));
        assert_eq!(limiter.get_counter_value(user_rule, "alice"), Some(1));
    }

    #[tokio::test]
    async fn test_async_key_extractor() {
        let mut builder = RateLimiter::<TestRequest>::builder();
        let rule = builder.register_named_rule("slow", 1, MINUTE, SlowHost).unwrap();
        let limiter = builder.build().unwrap();

        assert!(limiter.evaluate(&request("a", "/")).await.is_allowed());
        assert!(!limiter.evaluate(&request("a", "/")).await.is_allowed());
        assert_eq!(limiter.rules().get(rule).and_then(|r| r.name()), Some("slow"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_evaluation_counts_exactly() {
        let mut builder = RateLimiter::<TestRequest>::builder();
        let rule = builder.register_rule(25, MINUTE, by_host).unwrap();
        let limiter = Arc::new(builder.build().unwrap());
        let n = 200;

        let tasks: Vec<_> = (0..n)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.evaluate(&request("hot", "/")).await })
            })
            .collect();

        let decisions = futures::future::join_all(tasks).await;
        let blocked = decisions
            .into_iter()
            .map(|d| d.unwrap())
            .filter(|d| !d.is_allowed())
            .count();

        assert_eq!(blocked, n - 25);
        assert_eq!(limiter.get_counter_value(rule, "hot"), Some(n as u64));
    }

    #[tokio::test]
    async fn test_purge_mid_window_keeps_count() {
        let clock = ManualClock::new(Instant::now());
        let mut builder = RateLimiter::<TestRequest>::builder();
        let rule = builder.register_rule(10, MINUTE, by_host).unwrap();
        builder.set_clock(clock.clone());
        let limiter = builder.build().unwrap();

        for _ in 0..4 {
            limiter.evaluate(&request("a", "/")).await;
        }
        clock.advance(Duration::from_secs(30));

        assert_eq!(limiter.purge(), 0);
        assert_eq!(limiter.get_counter_value(rule, "a"), Some(4));

        clock.advance(Duration::from_secs(30));
        assert_eq!(limiter.purge(), 1);
        assert_eq!(limiter.stats(), LimiterStats { rules: 1, counters: 0 });
    }

    #[test]
    fn test_builder_rejects_zero_window() {
        let mut builder = RateLimiter::<TestRequest>::builder();
        let result = builder.register_rule(10, Duration::ZERO, by_host);
        assert!(matches!(result, Err(QuotaGateError::InvalidWindow { .. })));
    }

    #[test]
    fn test_builder_applies_purge_thresholds() {
        let mut builder = RateLimiter::<TestRequest>::builder();
        builder.set_purge_thresholds(50, Duration::from_secs(5)).unwrap();
        let limiter = builder.build().unwrap();

        let scheduler = limiter.counters().purge_scheduler();
        assert_eq!(scheduler.hit_threshold(), 50);
        assert_eq!(scheduler.interval(), Duration::from_secs(5));
    }

    #[test]
    fn test_builder_default_purge_thresholds() {
        let limiter = RateLimiter::<TestRequest>::builder().build().unwrap();

        let scheduler = limiter.counters().purge_scheduler();
        assert_eq!(scheduler.hit_threshold(), DEFAULT_PURGE_HIT_COUNT);
        assert_eq!(scheduler.interval(), DEFAULT_PURGE_INTERVAL);
    }

    #[test]
    fn test_builder_rejects_zero_purge_thresholds() {
        let mut builder = RateLimiter::<TestRequest>::builder();
        assert!(builder.set_purge_thresholds(0, MINUTE).is_err());
        assert!(builder.set_purge_thresholds(10, Duration::ZERO).is_err());
        assert!(builder.set_purge_thresholds(10, MINUTE).is_ok());
    }
}
