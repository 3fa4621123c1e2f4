//! Circuit breaker pattern implementation

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Target for operator-forced state changes
pub const AUDIT_TARGET: &str = "reef::audit";

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Calls pass through; failures accumulate
    Closed,
    /// Calls are rejected outright
    Open,
    /// One probe call is allowed through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a closed circuit
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Time an open circuit waits before admitting a probe
    #[serde(default = "default_reset_interval", with = "humantime_serde")]
    pub reset_interval: Duration,
}

fn default_max_failures() -> u32 {
    5
}

fn default_reset_interval() -> Duration {
    Duration::from_secs(60)
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: default_max_failures(),
            reset_interval: default_reset_interval(),
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    probe_in_flight: bool,
}

/// Circuit breaker guarding one subject
#[derive(Debug)]
pub struct CircuitBreaker {
    subject: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
    successes: AtomicU64,
    failures: AtomicU64,
    rejections: AtomicU64,
    trips: AtomicU64,
}

impl CircuitBreaker {
    /// Create a closed breaker for `subject`
    pub fn new(subject: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            subject: subject.into(),
            config,
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                last_failure: None,
                probe_in_flight: false,
            }),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
            trips: AtomicU64::new(0),
        }
    }

    /// Guarded subject
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Current state
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a call may proceed
    ///
    /// An open circuit turns half-open once the reset interval has elapsed
    /// since the last failure and admits exactly one probe.
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock();
        let allowed = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|at| at.elapsed() >= self.config.reset_interval)
                    .unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    info!(subject = %self.subject, "Circuit breaker transitioned to HALF-OPEN");
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    false
                } else {
                    inner.probe_in_flight = true;
                    true
                }
            }
        };

        if !allowed {
            self.rejections.fetch_add(1, Ordering::Relaxed);
        }
        allowed
    }

    /// Record a failed call; returns whether this call tripped the circuit
    pub fn record_failure(&self) -> bool {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let trip = match inner.state {
            CircuitState::Closed => inner.consecutive_failures >= self.config.max_failures,
            CircuitState::HalfOpen => true,
            CircuitState::Open => false,
        };

        if trip {
            inner.state = CircuitState::Open;
            inner.last_failure = Some(Instant::now());
            inner.probe_in_flight = false;
            self.trips.fetch_add(1, Ordering::Relaxed);
            warn!(
                subject = %self.subject,
                failures = inner.consecutive_failures,
                "Circuit breaker transitioned to OPEN"
            );
        } else {
            if inner.state == CircuitState::Open {
                inner.last_failure = Some(Instant::now());
            }
            debug!(
                subject = %self.subject,
                state = %inner.state,
                failures = inner.consecutive_failures,
                "Circuit breaker recorded failure"
            );
        }
        trip
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.probe_in_flight = false;
            info!(subject = %self.subject, "Circuit breaker transitioned to CLOSED");
        }
    }

    /// Administrative close, audited
    pub fn reset(&self, actor: &str) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.probe_in_flight = false;
        info!(
            target: AUDIT_TARGET,
            subject = %self.subject,
            actor = %actor,
            previous = %previous,
            "Circuit breaker reset"
        );
    }

    /// Administrative open, audited
    pub fn trip(&self, reason: &str) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = CircuitState::Open;
        inner.last_failure = Some(Instant::now());
        inner.probe_in_flight = false;
        self.trips.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: AUDIT_TARGET,
            subject = %self.subject,
            reason = %reason,
            previous = %previous,
            "Circuit breaker tripped"
        );
    }

    /// Snapshot of counters and state
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        CircuitBreakerMetrics {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            success_count: self.successes.load(Ordering::Relaxed),
            failure_count: self.failures.load(Ordering::Relaxed),
            rejection_count: self.rejections.load(Ordering::Relaxed),
            trip_count: self.trips.load(Ordering::Relaxed),
        }
    }
}

/// Circuit breaker metrics
#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    /// Current state
    pub state: CircuitState,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Successful calls recorded
    pub success_count: u64,
    /// Failed calls recorded
    pub failure_count: u64,
    /// Calls rejected by `allow`
    pub rejection_count: u64,
    /// Transitions to open
    pub trip_count: u64,
}

/// One breaker per subject, created on first use
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: Arc<DashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create a registry whose breakers share `config`
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: Arc::new(DashMap::new()),
        }
    }

    /// Get or create the breaker for `subject`
    pub fn breaker(&self, subject: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(subject, self.config.clone())))
            .clone()
    }

    /// Existing breaker for `subject`
    pub fn get(&self, subject: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(subject).map(|b| Arc::clone(b.value()))
    }

    /// State of `subject`'s breaker; closed if none exists
    pub fn state(&self, subject: &str) -> CircuitState {
        self.get(subject)
            .map(|b| b.state())
            .unwrap_or(CircuitState::Closed)
    }

    /// Drop `subject`'s breaker
    pub fn remove(&self, subject: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.remove(subject).map(|(_, b)| b)
    }

    /// Metrics for every breaker
    pub fn all_metrics(&self) -> Vec<(String, CircuitBreakerMetrics)> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect()
    }

    /// Reset every breaker
    pub fn reset_all(&self, actor: &str) {
        for entry in self.breakers.iter() {
            entry.value().reset(actor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn breaker(max_failures: u32, reset_interval: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "test-plugin",
            CircuitBreakerConfig {
                max_failures,
                reset_interval,
            },
        )
    }

    #[test]
    fn test_opens_after_max_failures() {
        let breaker = breaker(3, Duration::from_secs(60));

        assert!(breaker.allow());
        assert!(!breaker.record_failure());
        assert!(!breaker.record_failure());
        assert!(breaker.record_failure());

        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
        // Not re-signaled while already open
        assert!(!breaker.record_failure());
    }

    #[test]
    fn test_success_resets_counter() {
        let breaker = breaker(2, Duration::from_secs(60));
        breaker.record_failure();
        breaker.record_success();
        assert!(!breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_admits_one_probe() {
        let breaker = breaker(1, Duration::from_millis(50));
        breaker.record_failure();
        assert!(!breaker.allow());

        sleep(Duration::from_millis(80));

        assert!(breaker.allow());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_successful_probe_closes() {
        let breaker = breaker(1, Duration::from_millis(50));
        breaker.record_failure();
        sleep(Duration::from_millis(80));
        assert!(breaker.allow());

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.metrics().consecutive_failures, 0);
        assert!(breaker.allow());
    }

    #[test]
    fn test_failed_probe_reopens() {
        let breaker = breaker(1, Duration::from_millis(50));
        breaker.record_failure();
        sleep(Duration::from_millis(80));
        assert!(breaker.allow());

        assert!(breaker.record_failure());
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());
    }

    #[test]
    fn test_admin_overrides() {
        let breaker = breaker(5, Duration::from_secs(60));
        breaker.trip("manual maintenance");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow());

        breaker.reset("admin@example.com");
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow());

        let metrics = breaker.metrics();
        assert_eq!(metrics.trip_count, 1);
        assert_eq!(metrics.rejection_count, 1);
    }

    #[test]
    fn test_registry() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig {
            max_failures: 1,
            reset_interval: Duration::from_secs(60),
        });
        assert_eq!(registry.state("a"), CircuitState::Closed);

        registry.breaker("a").record_failure();
        assert_eq!(registry.state("a"), CircuitState::Open);
        assert_eq!(registry.state("b"), CircuitState::Closed);
        assert!(Arc::ptr_eq(&registry.breaker("a"), &registry.breaker("a")));

        registry.reset_all("ops");
        assert_eq!(registry.state("a"), CircuitState::Closed);
        assert_eq!(registry.all_metrics().len(), 1);
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(format!("{}", CircuitState::Closed), "closed");
        assert_eq!(format!("{}", CircuitState::Open), "open");
        assert_eq!(format!("{}", CircuitState::HalfOpen), "half-open");
    }
}
