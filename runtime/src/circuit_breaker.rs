//! Per-broker circuit breaking for the publish path.
//!
//! Each broker of the log store gets its own breaker. Publishes consult the
//! breaker before sending and report outcomes after; only connection-class
//! failures count against it, so a broker drowning in timeouts stops
//! receiving records while per-record rejections leave it untouched.
//!
//! # States
//!
//! - **Closed**: normal operation. Outcomes are recorded in a sliding window.
//! - **Open**: too many recent failures. Requests are refused until a
//!   cooldown elapses.
//! - **HalfOpen**: cooldown over, limited requests probe for recovery.
//!
//! # Example
//!
//! ```rust
//! use eventgate_runtime::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//!
//! if breaker.allow_request().await {
//!     breaker.mark_start();
//!     // ... issue the send ...
//!     breaker.mark_successfully().await;
//! }
//! # }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of recent outcomes kept in the sliding window
    pub window_size: usize,
    /// Number of failures within the window before opening the circuit
    pub failure_threshold: usize,
    /// Duration to wait before transitioning from Open to `HalfOpen`
    pub cooldown: Duration,
    /// Number of successes in `HalfOpen` state before closing the circuit
    pub success_threshold: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub const fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder {
            window_size: None,
            failure_threshold: None,
            cooldown: None,
            success_threshold: None,
        }
    }
}

/// Builder for [`CircuitBreakerConfig`].
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfigBuilder {
    window_size: Option<usize>,
    failure_threshold: Option<usize>,
    cooldown: Option<Duration>,
    success_threshold: Option<usize>,
}

impl CircuitBreakerConfigBuilder {
    /// Set the sliding window size.
    #[must_use]
    pub const fn window_size(mut self, size: usize) -> Self {
        self.window_size = Some(size);
        self
    }

    /// Set the failure threshold within the window.
    #[must_use]
    pub const fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Set the cooldown before an open circuit probes again.
    #[must_use]
    pub const fn cooldown(mut self, duration: Duration) -> Self {
        self.cooldown = Some(duration);
        self
    }

    /// Set the success threshold that closes a half-open circuit.
    #[must_use]
    pub const fn success_threshold(mut self, threshold: usize) -> Self {
        self.success_threshold = Some(threshold);
        self
    }

    /// Build the configuration.
    #[must_use]
    pub fn build(self) -> CircuitBreakerConfig {
        let defaults = CircuitBreakerConfig::default();
        CircuitBreakerConfig {
            window_size: self.window_size.unwrap_or(defaults.window_size),
            failure_threshold: self
                .failure_threshold
                .unwrap_or(defaults.failure_threshold),
            cooldown: self.cooldown.unwrap_or(defaults.cooldown),
            success_threshold: self
                .success_threshold
                .unwrap_or(defaults.success_threshold),
        }
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, requests are refused
    Open,
    /// Circuit is half-open, testing if the broker recovered
    HalfOpen,
}

/// Internal state of the circuit breaker.
#[derive(Debug)]
struct BreakerState {
    state: State,
    /// Recent outcomes, `true` for failure. Bounded by `window_size`.
    window: VecDeque<bool>,
    success_count: usize,
    opened_at: Option<Instant>,
}

impl BreakerState {
    fn record(&mut self, failed: bool, window_size: usize) {
        self.window.push_back(failed);
        while self.window.len() > window_size {
            self.window.pop_front();
        }
    }

    fn window_failures(&self) -> usize {
        self.window.iter().filter(|failed| **failed).count()
    }
}

/// Circuit breaker guarding publishes to one broker.
///
/// Cheap to clone; clones share state.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    state: Arc<RwLock<BreakerState>>,
    // Metrics
    total_started: Arc<AtomicU64>,
    total_successes: Arc<AtomicU64>,
    total_failures: Arc<AtomicU64>,
    total_rejections: Arc<AtomicU64>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(RwLock::new(BreakerState {
                state: State::Closed,
                window: VecDeque::new(),
                success_count: 0,
                opened_at: None,
            })),
            total_started: Arc::new(AtomicU64::new(0)),
            total_successes: Arc::new(AtomicU64::new(0)),
            total_failures: Arc::new(AtomicU64::new(0)),
            total_rejections: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Get the current state of the circuit breaker.
    pub async fn state(&self) -> State {
        let state = self.state.read().await;
        state.state
    }

    /// Whether a request may be issued right now.
    ///
    /// Returns `true` in `Closed` and `HalfOpen`. In `Open`, returns `false`
    /// until the cooldown has elapsed, then transitions to `HalfOpen` and
    /// returns `true`.
    pub async fn allow_request(&self) -> bool {
        let mut state = self.state.write().await;

        match state.state {
            State::Closed | State::HalfOpen => true,
            State::Open => {
                let cooled_down = state
                    .opened_at
                    .is_some_and(|opened| opened.elapsed() >= self.config.cooldown);
                if cooled_down {
                    tracing::info!("circuit breaker transitioning OPEN -> HALF_OPEN");
                    state.state = State::HalfOpen;
                    state.success_count = 0;
                    true
                } else {
                    self.total_rejections.fetch_add(1, Ordering::Relaxed);
                    false
                }
            }
        }
    }

    /// Record a request in flight.
    pub fn mark_start(&self) {
        self.total_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful outcome.
    pub async fn mark_successfully(&self) {
        self.total_successes.fetch_add(1, Ordering::Relaxed);
        let window_size = self.config.window_size;
        let mut state = self.state.write().await;
        state.record(false, window_size);

        if state.state == State::HalfOpen {
            state.success_count += 1;
            if state.success_count >= self.config.success_threshold {
                tracing::info!(
                    successes = state.success_count,
                    "circuit breaker transitioning HALF_OPEN -> CLOSED"
                );
                state.state = State::Closed;
                state.window.clear();
                state.success_count = 0;
                state.opened_at = None;
            }
        }
    }

    /// Record a connection-class failure.
    pub async fn mark_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        let window_size = self.config.window_size;
        let mut state = self.state.write().await;
        state.record(true, window_size);

        match state.state {
            State::Closed => {
                let failures = state.window_failures();
                if failures >= self.config.failure_threshold {
                    tracing::warn!(
                        failures,
                        threshold = self.config.failure_threshold,
                        "circuit breaker transitioning CLOSED -> OPEN"
                    );
                    state.state = State::Open;
                    state.opened_at = Some(Instant::now());
                }
            }
            State::HalfOpen => {
                tracing::warn!("circuit breaker transitioning HALF_OPEN -> OPEN (recovery failed)");
                state.state = State::Open;
                state.opened_at = Some(Instant::now());
                state.success_count = 0;
            }
            State::Open => {
                state.opened_at = Some(Instant::now());
            }
        }
    }

    /// Get circuit breaker metrics.
    #[must_use]
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_started: self.total_started.load(Ordering::Relaxed),
            total_successes: self.total_successes.load(Ordering::Relaxed),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Counters for circuit breaker monitoring.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerMetrics {
    /// Requests recorded in flight
    pub total_started: u64,
    /// Successful outcomes
    pub total_successes: u64,
    /// Connection-class failures
    pub total_failures: u64,
    /// Requests refused while open
    pub total_rejections: u64,
}

/// One circuit breaker per broker id, created lazily on first use.
///
/// Breakers live for the process lifetime; the registry never evicts.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
}

impl BreakerRegistry {
    /// Create a registry whose breakers all use `config`.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get the breaker for `broker_id`, creating it on first reference.
    pub async fn breaker_for(&self, broker_id: &str) -> CircuitBreaker {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(broker_id) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(broker_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.config.clone()))
            .clone()
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_config(failure_threshold: usize) -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .window_size(10)
            .failure_threshold(failure_threshold)
            .cooldown(Duration::from_millis(100))
            .success_threshold(2)
            .build()
    }

    #[tokio::test]
    async fn stays_closed_on_success() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());

        assert!(breaker.allow_request().await);
        breaker.mark_start();
        breaker.mark_successfully().await;

        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn opens_after_threshold_failures_in_window() {
        let breaker = CircuitBreaker::new(quick_config(3));

        for _ in 0..3 {
            breaker.mark_failure().await;
        }

        assert_eq!(breaker.state().await, State::Open);
        assert!(!breaker.allow_request().await);
    }

    #[tokio::test]
    async fn successes_dilute_the_window() {
        let breaker = CircuitBreaker::new(quick_config(3));

        // Two failures spread among successes never reach the threshold.
        for _ in 0..2 {
            breaker.mark_failure().await;
            for _ in 0..8 {
                breaker.mark_successfully().await;
            }
        }

        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn old_failures_slide_out_of_the_window() {
        let breaker = CircuitBreaker::new(quick_config(3));

        breaker.mark_failure().await;
        breaker.mark_failure().await;
        for _ in 0..10 {
            breaker.mark_successfully().await;
        }
        // Window now holds only successes; one more failure is not enough.
        breaker.mark_failure().await;

        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn transitions_to_half_open_after_cooldown() {
        let breaker = CircuitBreaker::new(quick_config(2));

        breaker.mark_failure().await;
        breaker.mark_failure().await;
        assert!(!breaker.allow_request().await);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(breaker.allow_request().await);
        assert_eq!(breaker.state().await, State::HalfOpen);
    }

    #[tokio::test]
    async fn closes_after_success_threshold_in_half_open() {
        let breaker = CircuitBreaker::new(quick_config(2));

        breaker.mark_failure().await;
        breaker.mark_failure().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(breaker.allow_request().await);

        breaker.mark_successfully().await;
        breaker.mark_successfully().await;

        assert_eq!(breaker.state().await, State::Closed);
    }

    #[tokio::test]
    async fn reopens_on_half_open_failure() {
        let breaker = CircuitBreaker::new(quick_config(2));

        breaker.mark_failure().await;
        breaker.mark_failure().await;
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(breaker.allow_request().await);

        breaker.mark_failure().await;

        assert_eq!(breaker.state().await, State::Open);
        assert!(!breaker.allow_request().await);
    }

    #[tokio::test]
    async fn counts_rejections() {
        let breaker = CircuitBreaker::new(quick_config(1));

        breaker.mark_failure().await;
        assert!(!breaker.allow_request().await);
        assert!(!breaker.allow_request().await);

        let metrics = breaker.metrics();
        assert_eq!(metrics.total_failures, 1);
        assert_eq!(metrics.total_rejections, 2);
    }

    #[tokio::test]
    async fn registry_creates_lazily_and_returns_same_breaker() {
        let registry = BreakerRegistry::new(quick_config(2));

        let first = registry.breaker_for("7").await;
        first.mark_failure().await;
        first.mark_failure().await;

        let again = registry.breaker_for("7").await;
        assert_eq!(again.state().await, State::Open);
    }

    #[tokio::test]
    async fn brokers_are_isolated() {
        let registry = BreakerRegistry::new(quick_config(2));

        let seven = registry.breaker_for("7").await;
        seven.mark_failure().await;
        seven.mark_failure().await;
        assert_eq!(seven.state().await, State::Open);

        let eight = registry.breaker_for("8").await;
        assert_eq!(eight.state().await, State::Closed);
        assert!(eight.allow_request().await);
    }
}
