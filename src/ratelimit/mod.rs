//! Rate limiting logic and state management.

mod clock;
mod counter;
mod extractor;
mod limiter;
mod purge;
mod rules;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use counter::FixedWindowCounter;
pub use extractor::{ExclusionPredicate, KeyExtractor};
pub use limiter::{Decision, LimiterStats, RateLimiter, RateLimiterBuilder};
pub use purge::{PurgeGuard, PurgeScheduler, DEFAULT_PURGE_HIT_COUNT, DEFAULT_PURGE_INTERVAL};
pub use rules::{Rule, RuleId, RuleRegistry, RuleRegistryBuilder};
pub use store::{CounterKey, CounterStore, HitOutcome, Quota};
