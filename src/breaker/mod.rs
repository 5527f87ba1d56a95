/*
 * This file is part of the Tanoda LMS.
 *
 * Copyright (C) 2025 Kovács Dávid <kapcsolat@kovacsdavid.dev>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU Affero General Public License as published
 * by the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU Affero General Public License for more details.
 *
 * You should have received a copy of the GNU Affero General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use crate::app::config::BreakerConfig;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally; failures count against the trip policy.
    Closed,
    /// Requests fail fast without touching the dependency.
    Open,
    /// A bounded number of probe requests test whether the dependency
    /// recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Error returned by [`CircuitBreaker::execute`].
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("A(z) '{0}' szolgáltatás átmenetileg nem érhető el")]
    Open(String),
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug, Clone)]
struct WindowStats {
    total_requests: u32,
    failed_requests: u32,
    window_start: Instant,
}

impl WindowStats {
    fn new() -> Self {
        Self {
            total_requests: 0,
            failed_requests: 0,
            window_start: Instant::now(),
        }
    }

    fn reset(&mut self) {
        self.total_requests = 0;
        self.failed_requests = 0;
        self.window_start = Instant::now();
    }

    fn record_success(&mut self) {
        self.total_requests += 1;
    }

    fn record_failure(&mut self) {
        self.total_requests += 1;
        self.failed_requests += 1;
    }

    fn failure_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.failed_requests as f64 / self.total_requests as f64
    }

    fn should_reset(&self, window: Duration) -> bool {
        self.window_start.elapsed() >= window
    }
}

struct Inner {
    state: CircuitState,
    stats: WindowStats,
    opened_at: Option<Instant>,
    half_open_probes: u32,
}

/// Three-state guard that fails fast against a sick dependency.
///
/// Transitions between Closed -> Open -> HalfOpen -> Closed. The trip
/// policy and the half-open probe limit come from [`BreakerConfig`]. Every
/// state transition is emitted as a tracing event carrying
/// `(name, from, to)`.
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: RwLock<Inner>,
}

impl CircuitBreaker {
    pub fn new(name: &str, config: BreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                stats: WindowStats::new(),
                opened_at: None,
                half_open_probes: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner
            .read()
            .map(|inner| inner.state)
            .unwrap_or(CircuitState::Closed)
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        info!(
            name = %self.name,
            from = from.as_str(),
            to = to.as_str(),
            "circuit state transition"
        );
    }

    /// Checks whether a request may proceed, updating state as needed.
    fn admit(&self) -> Result<(), BreakerErrorKind> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| BreakerErrorKind::Poisoned)?;

        match inner.state {
            CircuitState::Closed => {
                if inner
                    .stats
                    .should_reset(Duration::from_secs(self.config.window_secs))
                {
                    inner.stats.reset();
                }
                Ok(())
            }
            CircuitState::Open => {
                let reopened = inner.opened_at.is_some_and(|opened_at| {
                    opened_at.elapsed() >= Duration::from_secs(self.config.reset_timeout_secs)
                });
                if reopened {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_probes = 1;
                    inner.stats.reset();
                    Ok(())
                } else {
                    Err(BreakerErrorKind::Open)
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_probes < self.config.half_open_max_probes {
                    inner.half_open_probes += 1;
                    Ok(())
                } else {
                    Err(BreakerErrorKind::Open)
                }
            }
        }
    }

    fn on_success(&self) {
        if let Ok(mut inner) = self.inner.write() {
            match inner.state {
                CircuitState::Closed => inner.stats.record_success(),
                CircuitState::HalfOpen => {
                    self.transition(&mut inner, CircuitState::Closed);
                    inner.opened_at = None;
                    inner.half_open_probes = 0;
                    inner.stats.reset();
                }
                CircuitState::Open => {}
            }
        }
    }

    fn on_failure(&self) {
        if let Ok(mut inner) = self.inner.write() {
            match inner.state {
                CircuitState::Closed => {
                    inner.stats.record_failure();
                    if inner.stats.total_requests >= self.config.min_requests
                        && inner.stats.failure_ratio() >= self.config.failure_ratio
                    {
                        self.transition(&mut inner, CircuitState::Open);
                        inner.opened_at = Some(Instant::now());
                        warn!(name = %self.name, "circuit tripped open");
                    }
                }
                CircuitState::HalfOpen => {
                    self.transition(&mut inner, CircuitState::Open);
                    inner.opened_at = Some(Instant::now());
                    inner.half_open_probes = 0;
                }
                CircuitState::Open => {}
            }
        }
    }

    /// Wraps a call to an external dependency.
    ///
    /// While Open, the operation is not invoked at all and
    /// [`BreakerError::Open`] is returned immediately.
    pub async fn execute<T, E, F, Fut>(&self, op: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.admit().is_err() {
            return Err(BreakerError::Open(self.name.clone()));
        }

        match op().await {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(e) => {
                self.on_failure();
                Err(BreakerError::Inner(e))
            }
        }
    }
}

enum BreakerErrorKind {
    Open,
    Poisoned,
}

/// Registry holding one breaker per named dependency.
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker guarding `name`, creating it on first use.
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Ok(guard) = self.breakers.read()
            && let Some(existing) = guard.get(name)
        {
            return existing.clone();
        }
        let created = Arc::new(CircuitBreaker::new(name, self.config.clone()));
        if let Ok(mut guard) = self.breakers.write() {
            return guard.entry(name.to_string()).or_insert(created).clone();
        }
        created
    }

    /// True when no registered breaker is currently Open. Feeds the uptime
    /// gauge of the alerting layer.
    pub fn all_closed(&self) -> bool {
        match self.breakers.read() {
            Ok(guard) => guard
                .values()
                .all(|b| b.state() != CircuitState::Open),
            Err(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            min_requests: 3,
            failure_ratio: 0.6,
            window_secs: 60,
            reset_timeout_secs: 1,
            half_open_max_probes: 3,
        }
    }

    async fn fail(breaker: &CircuitBreaker) {
        let _ = breaker
            .execute::<(), _, _, _>(|| async { Err::<(), _>("boom") })
            .await;
    }

    #[tokio::test]
    async fn trips_open_after_failure_ratio_reached() {
        let breaker = CircuitBreaker::new("identity", test_config());
        fail(&breaker).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_does_not_touch_the_dependency() {
        let breaker = CircuitBreaker::new("identity", test_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        let calls = AtomicU32::new(0);
        let res = breaker
            .execute::<(), &str, _, _>(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(res, Err(BreakerError::Open(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn recovers_through_half_open_probe() {
        let breaker = CircuitBreaker::new("identity", test_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        let res = breaker
            .execute::<_, &str, _, _>(|| async { Ok(42) })
            .await;
        assert!(res.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("mail", test_config());
        for _ in 0..3 {
            fail(&breaker).await;
        }
        tokio::time::sleep(Duration::from_millis(1100)).await;
        fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn closed_successes_keep_ratio_below_threshold() {
        let breaker = CircuitBreaker::new("identity", test_config());
        for _ in 0..4 {
            let _ = breaker
                .execute::<_, &str, _, _>(|| async { Ok(()) })
                .await;
        }
        fail(&breaker).await;
        fail(&breaker).await;
        // 2 failures out of 6 stays under the 60% trip ratio
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn registry_returns_the_same_breaker_per_name() {
        let registry = BreakerRegistry::new(test_config());
        let a = registry.get("identity");
        let b = registry.get("identity");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(registry.all_closed());
    }
}
