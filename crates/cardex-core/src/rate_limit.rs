//! Per-client token-bucket rate limiting.
//!
//! Each client key owns a bucket of at most `capacity` tokens that refills
//! at `capacity` tokens per `window`, in whole-token increments. Buckets are
//! created on first sight of a key; the first request is always admitted.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::clock::{Clock, SystemClock};
use crate::error::{CoreError, CoreResult};

/// How fractional refill progress is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefillPolicy {
    /// `last_refill` jumps to "now" whenever at least one whole token is
    /// earned, discarding the fractional remainder.
    #[default]
    Truncating,

    /// `last_refill` advances only by the time the granted tokens cost, so
    /// the remainder counts toward the next token.
    CarryRemainder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum burst; also the number of tokens regenerated per `window`.
    pub capacity: u32,
    pub window: Duration,
    pub refill: RefillPolicy,
}

impl RateLimitConfig {
    pub fn new(capacity: u32, window: Duration) -> Self {
        Self {
            capacity,
            window,
            refill: RefillPolicy::default(),
        }
    }

    pub fn with_refill(self, refill: RefillPolicy) -> Self {
        Self { refill, ..self }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new(100, Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: u32,
    last_refill: SystemTime,
}

/// Token-bucket limiter keyed by client (usually an IP address).
///
/// All updates to one key go through the map's entry lock, so concurrent
/// callers for the same key are serialised and can never spend the same
/// token twice.
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<String, Bucket>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> CoreResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// # Errors
    ///
    /// [`CoreError::InvalidConfig`] if `capacity` or `window` is zero.
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        if config.capacity == 0 {
            return Err(CoreError::InvalidConfig(
                "rate limit capacity must be greater than zero".to_string(),
            ));
        }
        if config.window.is_zero() {
            return Err(CoreError::InvalidConfig(
                "rate limit window must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            config,
            buckets: DashMap::new(),
            clock,
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Decides whether one more request from `key` may proceed now.
    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, self.clock.now())
    }

    pub fn allow_at(&self, key: &str, now: SystemTime) -> bool {
        match self.buckets.entry(key.to_owned()) {
            Entry::Vacant(slot) => {
                slot.insert(Bucket {
                    tokens: self.config.capacity - 1,
                    last_refill: now,
                });
                true
            }
            Entry::Occupied(mut slot) => self.take(slot.get_mut(), now),
        }
    }

    fn take(&self, bucket: &mut Bucket, now: SystemTime) -> bool {
        let capacity = self.config.capacity;
        let elapsed = now
            .duration_since(bucket.last_refill)
            .unwrap_or(Duration::ZERO);
        let earned = self.tokens_earned(elapsed);

        if earned > 0 {
            let refilled = (u64::from(bucket.tokens) + earned).min(u64::from(capacity));
            bucket.tokens = refilled as u32;
            bucket.last_refill = match self.config.refill {
                RefillPolicy::Truncating => now,
                RefillPolicy::CarryRemainder if bucket.tokens == capacity => now,
                RefillPolicy::CarryRemainder => bucket.last_refill + self.cost_of(earned),
            };
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// `floor(elapsed / window * capacity)` in integer nanoseconds.
    fn tokens_earned(&self, elapsed: Duration) -> u64 {
        let earned =
            elapsed.as_nanos() * u128::from(self.config.capacity) / self.config.window.as_nanos();
        u64::try_from(earned).unwrap_or(u64::MAX)
    }

    /// Time it takes to earn `tokens` whole tokens.
    fn cost_of(&self, tokens: u64) -> Duration {
        let nanos =
            u128::from(tokens) * self.config.window.as_nanos() / u128::from(self.config.capacity);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Drops buckets idle for at least `max_idle`, returning how many went.
    ///
    /// The horizon is never shorter than `window`: a bucket idle that long
    /// would refill to capacity on its next hit, which is exactly the state
    /// a fresh bucket starts in, so eviction is invisible to active clients.
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.evict_idle_at(max_idle, self.clock.now())
    }

    pub fn evict_idle_at(&self, max_idle: Duration, now: SystemTime) -> usize {
        let horizon = max_idle.max(self.config.window);
        let mut removed = 0;
        self.buckets.retain(|_, bucket| {
            let keep = now
                .duration_since(bucket.last_refill)
                .map_or(true, |idle| idle < horizon);
            if !keep {
                removed += 1;
            }
            keep
        });
        if removed > 0 {
            tracing::debug!(
                removed,
                remaining = self.buckets.len(),
                "Evicted idle rate-limit buckets"
            );
        }
        removed
    }

    /// Number of client keys currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
