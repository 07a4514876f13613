//! Sliding-window rate limiter with a burst circuit breaker
//!
//! Decisions run over a shared sorted set of send timestamps (score = epoch
//! ms, member unique per send) so replicas agree on the count. The burst
//! breaker stores an ISO reset time under its own key; `set_if_absent` keeps
//! the first tripping replica authoritative.
//!
//! A successful `can_send` does not reserve capacity: callers record the
//! send only after the reply actually went out.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{ns, versioned_key, Cache, CacheExt};
use crate::config::RateLimitConfig;
use crate::metrics::RATE_LIMIT_HITS_TOTAL;

use super::Decision;

const SEND_LOG_KEY: &str = "send-log";
const BREAKER_KEY: &str = "rate-breaker";
const DAY_MS: i64 = 24 * 3600 * 1000;
const HOUR_MS: i64 = 3600 * 1000;

pub struct RateLimiter {
    cache: Arc<dyn Cache>,
    cfg: RateLimitConfig,
    send_log_key: String,
    breaker_key: String,
}

impl RateLimiter {
    pub fn new(cache: Arc<dyn Cache>, cfg: RateLimitConfig, key_prefix: &str) -> Self {
        RateLimiter {
            send_log_key: versioned_key(key_prefix, ns::RATE, SEND_LOG_KEY),
            breaker_key: versioned_key(key_prefix, ns::BREAKER, BREAKER_KEY),
            cache,
            cfg,
        }
    }

    /// Decide whether a reply may be sent right now.
    pub async fn can_send(&self) -> Decision {
        if !self.cfg.enabled {
            return Decision::allow();
        }
        match self.evaluate().await {
            Ok(decision) => {
                if !decision.allowed {
                    RATE_LIMIT_HITS_TOTAL.inc();
                }
                decision
            }
            Err(err) => {
                // A broken cache must not silence the service entirely.
                warn!(error = %err, "rate limiter check failed, allowing send");
                Decision::allow()
            }
        }
    }

    async fn evaluate(&self) -> Result<Decision, crate::cache::CacheError> {
        if let Some(reset_at) = self.cache.get(&self.breaker_key).await? {
            return Ok(Decision::deny(format!(
                "circuit_breaker open (resets at {})",
                reset_at
            )));
        }

        let now_ms = Utc::now().timestamp_millis();

        // Windows are exclusive of the lower bound.
        let hourly = self
            .cache
            .zcount(&self.send_log_key, (now_ms - HOUR_MS + 1) as f64, f64::MAX)
            .await?;
        if hourly >= self.cfg.max_per_hour {
            return Ok(Decision::deny("Hourly limit reached"));
        }

        let daily = self
            .cache
            .zcount(&self.send_log_key, (now_ms - DAY_MS + 1) as f64, f64::MAX)
            .await?;
        if daily >= self.cfg.max_per_day {
            return Ok(Decision::deny("Daily limit reached"));
        }

        let burst_ms = self.cfg.burst_window.as_millis() as i64;
        let burst = self
            .cache
            .zcount(&self.send_log_key, (now_ms - burst_ms + 1) as f64, f64::MAX)
            .await?;
        if burst >= self.cfg.burst_threshold {
            let reset_at = Utc
                .timestamp_millis_opt(now_ms + HOUR_MS)
                .single()
                .map(|t| t.to_rfc3339())
                .unwrap_or_default();
            let tripped = self
                .cache
                .set_if_absent(&self.breaker_key, &reset_at, Some(Duration::from_millis(HOUR_MS as u64)))
                .await?;
            if tripped {
                warn!(reset_at = %reset_at, burst, "burst threshold exceeded, circuit breaker opened");
            }
            return Ok(Decision::deny(format!(
                "circuit_breaker tripped by burst (resets at {})",
                reset_at
            )));
        }

        Ok(Decision::allow())
    }

    /// Record a successful send: append a unique timestamped member, prune
    /// entries older than 24 h, and refresh the set TTL, as one pipeline.
    pub async fn record_send(&self) {
        if !self.cfg.enabled {
            return;
        }
        let now_ms = Utc::now().timestamp_millis();
        let member = format!("{}-{}", now_ms, Uuid::new_v4());
        let result = self
            .cache
            .pipeline()
            .zadd(&self.send_log_key, now_ms as f64, &member)
            .zremrangebyscore(&self.send_log_key, 0.0, (now_ms - DAY_MS) as f64)
            .expire(&self.send_log_key, Duration::from_millis(DAY_MS as u64))
            .exec()
            .await;
        match result {
            Ok(_) => debug!(member = %member, "send recorded"),
            Err(err) => warn!(error = %err, "failed to record send"),
        }
    }
}
