//! Circuit breaker guarding remote dependencies.
//!
//! One breaker per dependency name, owned by an explicit [`BreakerRegistry`]
//! that is built once at startup and handed to every component that talks to
//! that dependency.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Consecutive failures that trip CLOSED -> OPEN.
    pub failure_threshold: usize,
    /// Cool-down before an OPEN circuit lets one trial call through.
    pub recovery_timeout: Duration,
    /// Consecutive HALF_OPEN successes required to close.
    pub success_threshold: usize,
    /// Bound on the recorded call history.
    pub sliding_window_size: usize,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 2,
            sliding_window_size: 10,
        }
    }
}

impl CircuitConfig {
    /// Redis trips fast and recovers fast; the local cache covers the gap.
    pub fn remote_cache() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(15),
            ..Self::default()
        }
    }

    pub fn payment_gateway() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(120),
            ..Self::default()
        }
    }

    pub fn database() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }
}

#[derive(Error, Debug)]
pub enum BreakerError<E> {
    #[error("circuit {0} is open")]
    Open(String),

    #[error(transparent)]
    Inner(E),
}

/// Point-in-time view of a breaker, for health reporting.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: &'static str,
    pub failure_count: u64,
    pub success_count: u64,
    pub recent_failures: usize,
}

struct BreakerInner {
    state: CircuitState,
    // true = failure; newest at the back
    history: VecDeque<bool>,
    failure_count: u64,
    success_count: u64,
    half_open_successes: usize,
    last_failure: Option<Instant>,
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                history: VecDeque::new(),
                failure_count: 0,
                success_count: 0,
                half_open_successes: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().expect("breaker lock poisoned").state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock().expect("breaker lock poisoned");
        BreakerSnapshot {
            name: self.name.clone(),
            state: inner.state.as_str(),
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            recent_failures: inner.history.iter().rev().take_while(|f| **f).count(),
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = CircuitState::Closed;
        inner.history.clear();
        inner.half_open_successes = 0;
        inner.last_failure = None;
    }

    /// Runs the future under the breaker; every inner error counts against
    /// the circuit.
    pub async fn call<T, E, Fut>(&self, fut: Fut) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.call_filtered(fut, |_| true).await
    }

    /// Runs the future under the breaker. Errors for which `is_infra`
    /// returns false pass through without touching circuit state, so
    /// application-level failures do not trip the dependency's circuit.
    pub async fn call_filtered<T, E, Fut>(
        &self,
        fut: Fut,
        is_infra: impl Fn(&E) -> bool,
    ) -> Result<T, BreakerError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.acquire()?;

        match fut.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                if is_infra(&err) {
                    self.record_failure();
                }
                Err(BreakerError::Inner(err))
            }
        }
    }

    fn acquire<E>(&self) -> Result<(), BreakerError<E>> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.state == CircuitState::Open {
            let recovered = inner
                .last_failure
                .map(|at| at.elapsed() >= self.config.recovery_timeout)
                .unwrap_or(true);

            if recovered {
                inner.state = CircuitState::HalfOpen;
                inner.half_open_successes = 0;
                tracing::info!(circuit = %self.name, "circuit moving to half-open");
            } else {
                return Err(BreakerError::Open(self.name.clone()));
            }
        }
        Ok(())
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.success_count += 1;
        push_bounded(&mut inner.history, false, self.config.sliding_window_size);

        if inner.state == CircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes >= self.config.success_threshold {
                inner.state = CircuitState::Closed;
                inner.history.clear();
                inner.half_open_successes = 0;
                inner.last_failure = None;
                tracing::info!(circuit = %self.name, "circuit restored to closed");
            }
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        push_bounded(&mut inner.history, true, self.config.sliding_window_size);

        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                tracing::warn!(circuit = %self.name, "circuit failed in half-open, re-opening");
            }
            CircuitState::Closed => {
                let threshold = self.config.failure_threshold;
                let recent_all_failed = inner.history.len() >= threshold
                    && inner.history.iter().rev().take(threshold).all(|f| *f);
                if recent_all_failed {
                    inner.state = CircuitState::Open;
                    tracing::error!(circuit = %self.name, "circuit tripped to open");
                }
            }
            CircuitState::Open => {}
        }
    }
}

fn push_bounded(history: &mut VecDeque<bool>, outcome: bool, cap: usize) {
    if history.len() >= cap {
        history.pop_front();
    }
    history.push_back(outcome);
}

/// Owns one breaker per dependency name.
pub struct BreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn get_or_create(&self, name: &str, config: CircuitConfig) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("registry lock poisoned");
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                tracing::info!(circuit = name, "created circuit breaker");
                Arc::new(CircuitBreaker::new(name, config))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers
            .lock()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        self.breakers
            .lock()
            .expect("registry lock poisoned")
            .values()
            .map(|b| b.snapshot())
            .collect()
    }

    pub fn reset(&self, name: &str) -> bool {
        match self.get(name) {
            Some(breaker) => {
                breaker.reset();
                tracing::info!(circuit = name, "manually reset circuit");
                true
            }
            None => false,
        }
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failures: usize, recovery: Duration, successes: usize) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: failures,
            recovery_timeout: recovery,
            success_threshold: successes,
            sliding_window_size: 10,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(async { Err::<(), _>("boom") }).await.map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker.call(async { Ok::<_, &'static str>(()) }).await
    }

    #[tokio::test]
    async fn test_trips_after_consecutive_failures() {
        let breaker = CircuitBreaker::new("test", config(3, Duration::from_secs(60), 1));

        for _ in 0..3 {
            assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // Rejected fast while open.
        assert!(matches!(fail(&breaker).await, Err(BreakerError::Open(_))));
    }

    #[tokio::test]
    async fn test_success_interrupts_failure_streak() {
        let breaker = CircuitBreaker::new("test", config(3, Duration::from_secs(60), 1));

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;

        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_half_open_recovery_cycle() {
        let breaker = CircuitBreaker::new("test", config(2, Duration::from_millis(20), 2));

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        // First trial call moves to half-open; two successes close it.
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", config(2, Duration::from_millis(20), 2));

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_unexpected_errors_do_not_trip() {
        let breaker = CircuitBreaker::new("test", config(2, Duration::from_secs(60), 1));

        for _ in 0..5 {
            let result = breaker
                .call_filtered(async { Err::<(), _>("app-level") }, |_| false)
                .await;
            assert!(matches!(result, Err(BreakerError::Inner(_))));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_registry_returns_same_breaker() {
        let registry = BreakerRegistry::new();
        let a = registry.get_or_create("redis", CircuitConfig::remote_cache());
        let b = registry.get_or_create("redis", CircuitConfig::default());
        assert!(Arc::ptr_eq(&a, &b));

        assert!(registry.get("redis").is_some());
        assert!(registry.get("unknown").is_none());
        assert_eq!(registry.snapshots().len(), 1);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let registry = BreakerRegistry::new();
        let breaker = registry.get_or_create("gw", config(1, Duration::from_secs(60), 1));

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        assert!(registry.reset("gw"));
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(!registry.reset("missing"));
    }
}
