//! Per-tier, per-client rate limiting

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::{Clock, DefaultClock},
    middleware::NoOpMiddleware,
    state::keyed::DashMapStateStore,
};
use tracing::{debug, warn};

use super::chain::{Middleware, Next};
use crate::config::RateLimitConfig;
use crate::dispatch::{DispatchRequest, DispatchResponse};
use crate::error::ErrorCode;
use crate::validation::ResponseEnvelope;
use crate::Result;

/// Checks between sweeps of replenished clients
const PRUNE_EVERY: u64 = 1024;

type TierLimiter<C> = RateLimiter<String, DashMapStateStore<String>, C, NoOpMiddleware<<C as Clock>::Instant>>;

/// Throttles requests on routes carrying a `rate_limit_tier`. Each tier
/// keeps a keyed limiter with a per-minute quota per client; the client is
/// the authenticated user, else the client address. Unknown tiers are
/// unlimited. Clients whose quota has fully replenished are dropped every
/// [`PRUNE_EVERY`] checks.
pub struct RateLimitMiddleware<C: Clock = DefaultClock> {
    tiers: HashMap<String, TierLimiter<C>>,
    checks: AtomicU64,
}

impl RateLimitMiddleware {
    /// Build from configuration
    #[must_use]
    pub fn new(config: &RateLimitConfig) -> Self {
        Self::with_clock(config, DefaultClock::default())
    }
}

impl<C: Clock + Clone> RateLimitMiddleware<C> {
    /// Build from configuration, reading time from `clock`
    #[must_use]
    pub fn with_clock(config: &RateLimitConfig, clock: C) -> Self {
        let tiers = config
            .tiers
            .iter()
            .filter_map(|(tier, rpm)| NonZeroU32::new(*rpm).map(|rpm| (tier.clone(), rpm)))
            .map(|(tier, rpm)| (tier, RateLimiter::dashmap_with_clock(Quota::per_minute(rpm), clock.clone())))
            .collect();
        Self {
            tiers,
            checks: AtomicU64::new(0),
        }
    }

    /// Take a permit for `client` on `tier`
    pub fn check(&self, tier: &str, client: &str) -> bool {
        let Some(limiter) = self.tiers.get(tier) else {
            return true;
        };
        let allowed = limiter.check_key(&client.to_string()).is_ok();

        if (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % PRUNE_EVERY == 0 {
            self.prune();
        }
        allowed
    }

    /// Forget clients whose quota is back to full
    pub fn prune(&self) {
        for (tier, limiter) in &self.tiers {
            let before = limiter.len();
            limiter.retain_recent();
            limiter.shrink_to_fit();
            debug!(tier = %tier, before, after = limiter.len(), "Pruned rate limit state");
        }
    }

    /// Number of clients currently tracked across all tiers
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.tiers.values().map(|limiter| limiter.len()).sum()
    }
}

fn client_key(req: &DispatchRequest) -> String {
    req.context
        .user_id
        .clone()
        .or_else(|| req.context.request.ip.clone())
        .unwrap_or_else(|| "anonymous".to_string())
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    async fn handle(&self, req: DispatchRequest, next: Next<'_>) -> Result<DispatchResponse> {
        let Some(tier) = req.route().and_then(|r| r.rate_limit_tier.clone()) else {
            return next.run(req).await;
        };

        let client = client_key(&req);
        if self.check(&tier, &client) {
            debug!(tier = %tier, client = %client, "Rate limit permit granted");
            return next.run(req).await;
        }

        warn!(
            correlation_id = %req.context.correlation_id,
            tier = %tier,
            client = %client,
            "Rate limit exceeded"
        );
        Ok(DispatchResponse::from_envelope(ResponseEnvelope::err(
            ErrorCode::RateLimited,
            format!("Rate limit exceeded for tier '{tier}'"),
        )))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use governor::clock::FakeRelativeClock;

    use super::*;

    fn config(rpm: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            tiers: HashMap::from([("ai".to_string(), rpm)]),
        }
    }

    #[test]
    fn quota_is_per_tier_and_client() {
        let rl = RateLimitMiddleware::new(&config(2));
        assert!(rl.check("ai", "alice"));
        assert!(rl.check("ai", "alice"));
        assert!(!rl.check("ai", "alice"));

        // Other clients have their own budget
        assert!(rl.check("ai", "bob"));
        assert_eq!(rl.tracked_clients(), 2);
    }

    #[test]
    fn unknown_tier_is_unlimited() {
        let rl = RateLimitMiddleware::new(&config(1));
        for _ in 0..10 {
            assert!(rl.check("bulk", "alice"));
        }
        assert_eq!(rl.tracked_clients(), 0);
    }

    #[test]
    fn prune_forgets_replenished_clients() {
        let clock = FakeRelativeClock::default();
        let rl = RateLimitMiddleware::with_clock(&config(2), clock.clone());
        assert!(rl.check("ai", "alice"));
        assert!(rl.check("ai", "bob"));

        rl.prune();
        assert_eq!(rl.tracked_clients(), 2);

        clock.advance(Duration::from_secs(60));
        rl.prune();
        assert_eq!(rl.tracked_clients(), 0);
    }

    #[test]
    fn distinct_clients_do_not_accumulate() {
        let clock = FakeRelativeClock::default();
        let rl = RateLimitMiddleware::with_clock(&config(1), clock.clone());

        // One-off clients, as from rotating addresses
        for i in 0..PRUNE_EVERY - 1 {
            assert!(rl.check("ai", &format!("10.0.{}.{}", i / 256, i % 256)));
        }
        assert_eq!(rl.tracked_clients(), usize::try_from(PRUNE_EVERY - 1).unwrap());

        clock.advance(Duration::from_secs(60));
        assert!(rl.check("ai", "late"));
        assert_eq!(rl.tracked_clients(), 1);
    }
}
