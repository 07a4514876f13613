//! Three-state circuit breaker
//!
//! Closed until the error rate over the rolling volume window reaches the
//! threshold (with a minimum call volume), then open for the reset
//! interval, then half-open for a single probe call. Each external API gets
//! its own instance; state is per-process.

use std::future::Future;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::metrics::BREAKER_STATE;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Timeout applied to every call routed through the breaker.
    pub call_timeout: Duration,
    /// Error-rate threshold in [0, 1] that opens the breaker.
    pub error_threshold: f64,
    /// Minimum calls in the window before the rate is meaningful.
    pub volume_threshold: usize,
    /// Rolling window over which calls are counted.
    pub window: Duration,
    /// How long the breaker stays open before admitting a probe.
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            call_timeout: Duration::from_secs(10),
            error_threshold: 0.5,
            volume_threshold: 5,
            window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open { since: Instant },
    HalfOpen,
}

#[derive(Debug)]
struct Inner {
    state: State,
    // (when, failed)
    calls: Vec<(Instant, bool)>,
    probe_in_flight: bool,
}

/// Errors surfaced by a breaker-wrapped call.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    #[error("circuit breaker {0} is open")]
    Open(String),
    #[error("call through breaker {0} timed out")]
    Timeout(String),
    #[error("{0}")]
    Inner(String),
}

pub struct CircuitBreaker {
    name: String,
    cfg: BreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: BreakerConfig) -> Self {
        let name = name.into();
        BREAKER_STATE.with_label_values(&[&name]).set(0);
        CircuitBreaker {
            name,
            cfg,
            inner: Mutex::new(Inner {
                state: State::Closed,
                calls: Vec::new(),
                probe_in_flight: false,
            }),
        }
    }

    /// Run `fut` through the breaker with the configured timeout.
    pub async fn call<T, E, Fut>(&self, fut: Fut) -> Result<T, BreakerError>
    where
        E: std::fmt::Display,
        Fut: Future<Output = Result<T, E>>,
    {
        self.try_acquire()?;

        let outcome = tokio::time::timeout(self.cfg.call_timeout, fut).await;
        match outcome {
            Ok(Ok(value)) => {
                self.record(true);
                Ok(value)
            }
            Ok(Err(err)) => {
                self.record(false);
                Err(BreakerError::Inner(err.to_string()))
            }
            Err(_) => {
                self.record(false);
                Err(BreakerError::Timeout(self.name.clone()))
            }
        }
    }

    /// Current state tag for health reporting.
    pub fn state_name(&self) -> &'static str {
        let mut inner = self.inner.lock();
        self.refresh_state(&mut inner);
        match inner.state {
            State::Closed => "closed",
            State::Open { .. } => "open",
            State::HalfOpen => "half-open",
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn try_acquire(&self) -> Result<(), BreakerError> {
        let mut inner = self.inner.lock();
        self.refresh_state(&mut inner);
        match inner.state {
            State::Closed => Ok(()),
            State::Open { .. } => Err(BreakerError::Open(self.name.clone())),
            State::HalfOpen => {
                if inner.probe_in_flight {
                    Err(BreakerError::Open(self.name.clone()))
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    fn refresh_state(&self, inner: &mut Inner) {
        if let State::Open { since } = inner.state {
            if since.elapsed() >= self.cfg.reset_timeout {
                inner.state = State::HalfOpen;
                inner.probe_in_flight = false;
                self.publish_state(inner.state);
                debug!(breaker = %self.name, "breaker half-open, admitting probe");
            }
        }
    }

    fn record(&self, success: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        match inner.state {
            State::HalfOpen => {
                inner.probe_in_flight = false;
                if success {
                    inner.state = State::Closed;
                    inner.calls.clear();
                    self.publish_state(inner.state);
                    debug!(breaker = %self.name, "probe succeeded, breaker closed");
                } else {
                    inner.state = State::Open { since: now };
                    self.publish_state(inner.state);
                    warn!(breaker = %self.name, "probe failed, breaker re-opened");
                }
                return;
            }
            State::Open { .. } => return,
            State::Closed => {}
        }

        inner.calls.push((now, !success));
        let window = self.cfg.window;
        inner.calls.retain(|(when, _)| now.duration_since(*when) <= window);

        let total = inner.calls.len();
        if total >= self.cfg.volume_threshold {
            let failed = inner.calls.iter().filter(|(_, failed)| *failed).count();
            let rate = failed as f64 / total as f64;
            if rate >= self.cfg.error_threshold {
                inner.state = State::Open { since: now };
                self.publish_state(inner.state);
                warn!(
                    breaker = %self.name,
                    error_rate = rate,
                    calls = total,
                    "error rate over threshold, breaker opened"
                );
            }
        }
    }

    fn publish_state(&self, state: State) {
        let value = match state {
            State::Closed => 0,
            State::Open { .. } => 1,
            State::HalfOpen => 2,
        };
        BREAKER_STATE.with_label_values(&[&self.name]).set(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config() -> BreakerConfig {
        BreakerConfig {
            call_timeout: Duration::from_millis(50),
            error_threshold: 0.5,
            volume_threshold: 4,
            window: Duration::from_secs(10),
            reset_timeout: Duration::from_millis(100),
        }
    }

    async fn ok() -> Result<u32, String> {
        Ok(1)
    }

    async fn fail() -> Result<u32, String> {
        Err("boom".to_string())
    }

    #[tokio::test]
    async fn test_closed_passes_calls_through() {
        let breaker = CircuitBreaker::new("test-closed", quick_config());
        assert_eq!(breaker.call(ok()).await.unwrap(), 1);
        assert_eq!(breaker.state_name(), "closed");
    }

    #[tokio::test]
    async fn test_opens_at_error_rate_with_volume() {
        let breaker = CircuitBreaker::new("test-open", quick_config());
        // Three failures out of four calls: 75% > 50% with volume met.
        let _ = breaker.call(ok()).await;
        for _ in 0..3 {
            let _ = breaker.call(fail()).await;
        }
        assert_eq!(breaker.state_name(), "open");
        assert!(matches!(
            breaker.call(ok()).await,
            Err(BreakerError::Open(_))
        ));
    }

    #[tokio::test]
    async fn test_under_volume_does_not_open() {
        let breaker = CircuitBreaker::new("test-volume", quick_config());
        for _ in 0..3 {
            let _ = breaker.call(fail()).await;
        }
        // Only 3 calls, below the volume threshold of 4.
        assert_eq!(breaker.state_name(), "closed");
    }

    #[tokio::test]
    async fn test_half_open_probe_recovers() {
        let breaker = CircuitBreaker::new("test-recover", quick_config());
        for _ in 0..4 {
            let _ = breaker.call(fail()).await;
        }
        assert_eq!(breaker.state_name(), "open");

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(breaker.state_name(), "half-open");

        assert_eq!(breaker.call(ok()).await.unwrap(), 1);
        assert_eq!(breaker.state_name(), "closed");
    }

    #[tokio::test]
    async fn test_half_open_probe_failure_reopens() {
        let breaker = CircuitBreaker::new("test-reopen", quick_config());
        for _ in 0..4 {
            let _ = breaker.call(fail()).await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        let _ = breaker.call(fail()).await;
        assert_eq!(breaker.state_name(), "open");
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let breaker = CircuitBreaker::new("test-timeout", quick_config());
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<u32, String>(1)
        };
        assert!(matches!(
            breaker.call(slow).await,
            Err(BreakerError::Timeout(_))
        ));
    }
}
