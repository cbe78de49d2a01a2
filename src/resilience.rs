//! Resilience for external context lookups.
//!
//! Validators never call out to external systems. Callers that enrich a
//! report with outside context (ownership data, historical metrics) go
//! through a [`ContextProvider`], optionally wrapped in a [`CachedProvider`]
//! that adds a TTL cache and a [`CircuitBreaker`].

use crate::error::{GateError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

// ============================================================================
// Provider trait
// ============================================================================

/// A source of context values keyed by string.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Fetch the value for `key`.
    async fn fetch(&self, key: &str) -> Result<Value>;
}

// ============================================================================
// Circuit breaker
// ============================================================================

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls go through.
    Closed,
    /// Calls are refused until the recovery timeout elapses.
    Open,
    /// One trial call is allowed; its result closes or reopens the circuit.
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call.
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<Instant>,
    half_open: bool,
}

/// Failure-count circuit breaker.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub async fn state(&self) -> CircuitState {
        let lock = self.state.lock().await;
        match lock.open_until {
            Some(until) if Instant::now() < until => CircuitState::Open,
            Some(_) => CircuitState::HalfOpen,
            None if lock.half_open => CircuitState::HalfOpen,
            None => CircuitState::Closed,
        }
    }

    /// Admit a call, or refuse it while the circuit is open.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Unavailable`] while open.
    pub async fn check(&self) -> Result<()> {
        let mut lock = self.state.lock().await;
        if let Some(until) = lock.open_until {
            if Instant::now() < until {
                return Err(GateError::unavailable("circuit breaker open"));
            }
            lock.open_until = None;
            lock.half_open = true;
            tracing::debug!("Circuit breaker half-open");
        }
        Ok(())
    }

    pub async fn record_success(&self) {
        let mut lock = self.state.lock().await;
        if lock.half_open {
            tracing::debug!("Circuit breaker closed");
        }
        *lock = BreakerState::default();
    }

    pub async fn record_failure(&self) {
        let mut lock = self.state.lock().await;
        lock.failure_count += 1;
        if lock.half_open || lock.failure_count >= self.config.failure_threshold {
            lock.open_until = Some(Instant::now() + self.config.recovery_timeout);
            lock.half_open = false;
            tracing::warn!(
                failures = lock.failure_count,
                recovery_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
    }
}

// ============================================================================
// Cached provider
// ============================================================================

/// Wraps a provider with a TTL cache and a circuit breaker.
///
/// When the inner provider fails, an expired cached value is served if one
/// exists.
pub struct CachedProvider<P> {
    inner: P,
    breaker: CircuitBreaker,
    ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, Value)>>,
}

impl<P: ContextProvider> CachedProvider<P> {
    pub fn new(inner: P, ttl: Duration) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::default(),
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn with_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker = CircuitBreaker::new(config);
        self
    }

    #[must_use]
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    async fn cached(&self, key: &str, fresh_only: bool) -> Option<Value> {
        let cache = self.cache.lock().await;
        cache.get(key).and_then(|(stored, value)| {
            (!fresh_only || stored.elapsed() < self.ttl).then(|| value.clone())
        })
    }
}

#[async_trait]
impl<P: ContextProvider> ContextProvider for CachedProvider<P> {
    async fn fetch(&self, key: &str) -> Result<Value> {
        if let Some(value) = self.cached(key, true).await {
            return Ok(value);
        }

        if let Err(refused) = self.breaker.check().await {
            return self.cached(key, false).await.ok_or(refused);
        }

        match self.inner.fetch(key).await {
            Ok(value) => {
                self.breaker.record_success().await;
                self.cache
                    .lock()
                    .await
                    .insert(key.to_string(), (Instant::now(), value.clone()));
                Ok(value)
            }
            Err(e) => {
                self.breaker.record_failure().await;
                match self.cached(key, false).await {
                    Some(stale) => {
                        tracing::debug!(key = key, error = %e, "Serving stale context value");
                        Ok(stale)
                    }
                    None => Err(e),
                }
            }
        }
    }
}
