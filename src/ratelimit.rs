use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as Governor};
use std::num::NonZeroU32;

/// Per-user admission with policy `{N messages per 60s, 0 disables}`.
/// Concurrency-safe; hot reload replaces the whole
/// struct rather than mutating it, so in-flight requests keep using
/// whichever instance they captured.
pub struct RateLimiter {
    inner: Option<Governor<String, DefaultKeyedStateStore<String>, DefaultClock>>,
}

impl RateLimiter {
    /// `limit == 0` disables admission checks entirely.
    pub fn new(limit_per_minute: u32) -> Self {
        if limit_per_minute == 0 {
            return Self { inner: None };
        }
        let quota = Quota::per_minute(NonZeroU32::new(limit_per_minute).unwrap());
        Self { inner: Some(Governor::keyed(quota)) }
    }

    /// Returns `true` if `user_id` is admitted under the current policy.
    pub fn admit(&self, user_id: &str) -> bool {
        match &self.inner {
            None => true,
            Some(limiter) => limiter.check_key(&user_id.to_string()).is_ok(),
        }
    }
}
