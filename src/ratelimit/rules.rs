//! Rule registration.
//!
//! Rules are registered during setup and frozen into a [`RuleRegistry`]
//! before the first request is evaluated. Registration order is the order in
//! which the evaluator visits rules, so it is kept exactly as given.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::extractor::KeyExtractor;
use super::store::Quota;
use crate::error::{QuotaGateError, Result};

/// Identifies a registered rule; the value is its registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(u32);

impl RuleId {
    /// Registration index of the rule.
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rule#{}", self.0)
    }
}

/// A quota of `limit` hits per `window`, applied per extracted key.
pub struct Rule<C: ?Sized + Sync> {
    id: RuleId,
    name: Option<String>,
    limit: u64,
    window: Duration,
    key_extractor: Arc<dyn KeyExtractor<C>>,
}

impl<C: ?Sized + Sync> Rule<C> {
    pub fn id(&self) -> RuleId {
        self.id
    }

    /// Name given at registration, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Hits allowed per window. Zero blocks every request the rule applies to.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// The extractor deciding which key, if any, this rule counts against.
    pub fn key_extractor(&self) -> &dyn KeyExtractor<C> {
        self.key_extractor.as_ref()
    }

    /// The limit and window counters for this rule are checked against.
    pub fn quota(&self) -> Quota {
        Quota {
            rule: self.id,
            limit: self.limit,
            window: self.window,
        }
    }

    /// Name if one was given, otherwise the rule id.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.id.to_string(),
        }
    }
}

impl<C: ?Sized + Sync> fmt::Debug for Rule<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("limit", &self.limit)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

/// Collects rules during setup.
pub struct RuleRegistryBuilder<C: ?Sized + Sync> {
    rules: Vec<Rule<C>>,
}

impl<C: ?Sized + Sync> RuleRegistryBuilder<C> {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register a rule and return its id.
    ///
    /// Fails if `window` is zero.
    pub fn register(
        &mut self,
        name: Option<String>,
        limit: u64,
        window: Duration,
        key_extractor: Arc<dyn KeyExtractor<C>>,
    ) -> Result<RuleId> {
        let index = self.rules.len();
        if window.is_zero() {
            return Err(QuotaGateError::InvalidWindow {
                rule: name.unwrap_or_else(|| format!("rule#{}", index)),
            });
        }
        let index = u32::try_from(index)
            .map_err(|_| QuotaGateError::Config("too many rules registered".to_string()))?;

        let id = RuleId(index);
        debug!(
            rule = %id,
            name = ?name,
            limit = limit,
            window = ?window,
            "Registered rate limit rule"
        );

        self.rules.push(Rule {
            id,
            name,
            limit,
            window,
            key_extractor,
        });
        Ok(id)
    }

    /// Number of rules registered so far.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Freeze the registered rules.
    pub fn build(self) -> RuleRegistry<C> {
        RuleRegistry { rules: self.rules }
    }
}

impl<C: ?Sized + Sync> Default for RuleRegistryBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

/// The immutable, ordered set of rules used while serving requests.
pub struct RuleRegistry<C: ?Sized + Sync> {
    rules: Vec<Rule<C>>,
}

impl<C: ?Sized + Sync> RuleRegistry<C> {
    /// Rules in registration order.
    pub fn iter(&self) -> std::slice::Iter<'_, Rule<C>> {
        self.rules.iter()
    }

    pub fn get(&self, id: RuleId) -> Option<&Rule<C>> {
        self.rules.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<C: ?Sized + Sync> fmt::Debug for RuleRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.rules.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_value() -> Arc<dyn KeyExtractor<str>> {
        Arc::new(|ctx: &str| Some(ctx.to_string()))
    }

    #[test]
    fn test_register_assigns_sequential_ids() {
        let mut builder = RuleRegistryBuilder::<str>::new();
        let first = builder
            .register(None, 10, Duration::from_secs(60), by_value())
            .unwrap();
        let second = builder
            .register(Some("burst".to_string()), 2, Duration::from_secs(1), by_value())
            .unwrap();

        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        assert_eq!(builder.len(), 2);
        assert_ne!(first, second);
    }

    #[test]
    fn test_registration_order_preserved() {
        let mut builder = RuleRegistryBuilder::<str>::new();
        for limit in [5, 1, 3] {
            builder
                .register(None, limit, Duration::from_secs(1), by_value())
                .unwrap();
        }
        let registry = builder.build();

        let limits: Vec<u64> = registry.iter().map(|r| r.limit()).collect();
        assert_eq!(limits, vec![5, 1, 3]);
    }

    #[test]
    fn test_zero_window_rejected() {
        let mut builder = RuleRegistryBuilder::<str>::new();
        let err = builder
            .register(Some("bad".to_string()), 10, Duration::ZERO, by_value())
            .unwrap_err();

        assert!(matches!(err, QuotaGateError::InvalidWindow { ref rule } if rule == "bad"));
        assert!(builder.is_empty());
    }

    #[test]
    fn test_zero_limit_accepted() {
        let mut builder = RuleRegistryBuilder::<str>::new();
        let id = builder
            .register(None, 0, Duration::from_secs(1), by_value())
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.get(id).map(|r| r.limit()), Some(0));
    }

    #[test]
    fn test_rule_label() {
        let mut builder = RuleRegistryBuilder::<str>::new();
        let anonymous = builder
            .register(None, 1, Duration::from_secs(1), by_value())
            .unwrap();
        let named = builder
            .register(Some("per-host".to_string()), 1, Duration::from_secs(1), by_value())
            .unwrap();
        let registry = builder.build();

        assert_eq!(registry.get(anonymous).unwrap().label(), "rule#0");
        assert_eq!(registry.get(named).unwrap().label(), "per-host");
    }
}
