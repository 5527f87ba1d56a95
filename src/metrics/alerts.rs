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

use crate::app::config::AlertsConfig;
use crate::breaker::BreakerRegistry;
use crate::common::TemplatedMailer;
use crate::metrics::{
    API_REQUEST_ERRORS_TOTAL, API_REQUESTS_PER_MINUTE, API_REQUESTS_TOTAL, ERROR_RATE_PERCENTAGE,
    MetricsRegistry, PROVISIONING_DURATION_SECONDS, UPTIME_PERCENTAGE,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, warn};

pub const ALERT_HIGH_ERROR_RATE: &str = "high_error_rate";
pub const ALERT_LOW_UPTIME: &str = "low_uptime";
pub const ALERT_SLOW_PROVISIONING: &str = "slow_provisioning";

#[derive(Debug, Default)]
struct RuleState {
    breached_since: Option<Instant>,
    firing: bool,
}

#[derive(Default)]
struct EngineState {
    rules: HashMap<&'static str, RuleState>,
    last_requests: u64,
    last_errors: u64,
    breaker_health: VecDeque<bool>,
}

/// Threshold based alert rule engine.
///
/// Every evaluation interval the engine refreshes the derived gauges from
/// the raw request counters and the breaker registry, then checks the alert
/// rules. A rule with a sustain window only fires once its condition held
/// for the whole window; every fired alert is logged and the administrator
/// is notified by email.
pub struct AlertEngine {
    config: AlertsConfig,
    metrics: Arc<MetricsRegistry>,
    breakers: Arc<BreakerRegistry>,
    mailer: Arc<dyn TemplatedMailer>,
    state: Mutex<EngineState>,
}

impl AlertEngine {
    pub fn new(
        config: AlertsConfig,
        metrics: Arc<MetricsRegistry>,
        breakers: Arc<BreakerRegistry>,
        mailer: Arc<dyn TemplatedMailer>,
    ) -> Self {
        Self {
            config,
            metrics,
            breakers,
            mailer,
            state: Mutex::new(EngineState::default()),
        }
    }

    /// Runs the engine on a fixed interval until the process shuts down.
    pub fn spawn(engine: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(engine.config.eval_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                engine.collect();
                engine.evaluate(Instant::now()).await;
            }
        })
    }

    /// Refreshes the derived gauges from the raw counters.
    pub fn collect(&self) {
        let requests = self.metrics.counter(API_REQUESTS_TOTAL).get();
        let errors = self.metrics.counter(API_REQUEST_ERRORS_TOTAL).get();

        let Ok(mut state) = self.state.lock() else {
            return;
        };

        let request_delta = requests.saturating_sub(state.last_requests);
        let error_delta = errors.saturating_sub(state.last_errors);
        state.last_requests = requests;
        state.last_errors = errors;

        let interval_secs = self.config.eval_interval_secs.max(1);
        self.metrics
            .gauge(API_REQUESTS_PER_MINUTE)
            .set(request_delta as f64 * 60.0 / interval_secs as f64);

        let error_rate = if request_delta == 0 {
            0.0
        } else {
            error_delta as f64 / request_delta as f64 * 100.0
        };
        self.metrics.gauge(ERROR_RATE_PERCENTAGE).set(error_rate);

        // Uptime is approximated as the share of recent evaluation ticks in
        // which no dependency circuit was open.
        let window_ticks =
            (self.config.sustain_secs / interval_secs).max(1) as usize * 2;
        state.breaker_health.push_back(self.breakers.all_closed());
        while state.breaker_health.len() > window_ticks {
            state.breaker_health.pop_front();
        }
        let healthy = state.breaker_health.iter().filter(|h| **h).count();
        let uptime = if state.breaker_health.is_empty() {
            100.0
        } else {
            healthy as f64 / state.breaker_health.len() as f64 * 100.0
        };
        self.metrics.gauge(UPTIME_PERCENTAGE).set(uptime);
    }

    /// Evaluates every alert rule at the given instant and returns the names
    /// of the alerts that fired in this round.
    pub async fn evaluate(&self, now: Instant) -> Vec<&'static str> {
        let error_rate = self.metrics.gauge(ERROR_RATE_PERCENTAGE).get();
        let uptime = self.metrics.gauge(UPTIME_PERCENTAGE).get();
        let provisioning_p99 = self
            .metrics
            .histogram(PROVISIONING_DURATION_SECONDS)
            .value_at_quantile(0.99);
        let has_provisioning_samples = self
            .metrics
            .histogram(PROVISIONING_DURATION_SECONDS)
            .count()
            > 0;

        let mut fired = Vec::new();
        {
            let Ok(mut state) = self.state.lock() else {
                return fired;
            };
            let sustain = self.config.sustain();

            if Self::check_rule(
                &mut state.rules,
                ALERT_HIGH_ERROR_RATE,
                error_rate > self.config.error_rate_threshold,
                sustain,
                now,
            ) {
                fired.push(ALERT_HIGH_ERROR_RATE);
            }
            if Self::check_rule(
                &mut state.rules,
                ALERT_LOW_UPTIME,
                uptime < self.config.uptime_threshold,
                sustain,
                now,
            ) {
                fired.push(ALERT_LOW_UPTIME);
            }
            if Self::check_rule(
                &mut state.rules,
                ALERT_SLOW_PROVISIONING,
                has_provisioning_samples
                    && provisioning_p99
                        > Duration::from_secs(self.config.provisioning_p99_threshold_secs),
                Duration::ZERO,
                now,
            ) {
                fired.push(ALERT_SLOW_PROVISIONING);
            }
        }

        for alert in &fired {
            warn!(alert, "alert fired");
            if let Err(e) = self
                .mailer
                .send_admin_notification(
                    "Riasztás a vezérlősíkon",
                    &json!({
                        "alert": alert,
                        "error_rate_percentage": error_rate,
                        "uptime_percentage": uptime,
                        "provisioning_p99_ms": provisioning_p99.as_millis() as u64,
                    }),
                )
                .await
            {
                error!("Could not notify admin about alert {alert}: {e}");
            }
        }

        fired
    }

    /// Returns true when the rule transitions into the firing state.
    fn check_rule(
        rules: &mut HashMap<&'static str, RuleState>,
        name: &'static str,
        breached: bool,
        sustain: Duration,
        now: Instant,
    ) -> bool {
        let rule = rules.entry(name).or_default();

        if !breached {
            rule.breached_since = None;
            rule.firing = false;
            return false;
        }

        let since = *rule.breached_since.get_or_insert(now);
        if now.duration_since(since) >= sustain && !rule.firing {
            rule.firing = true;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::BreakerConfig;
    use crate::common::MockTemplatedMailer;

    fn engine_with(config: AlertsConfig) -> AlertEngine {
        let mut mailer = MockTemplatedMailer::new();
        mailer
            .expect_send_admin_notification()
            .returning(|_, _| Ok(()));
        AlertEngine::new(
            config,
            Arc::new(MetricsRegistry::new()),
            Arc::new(BreakerRegistry::new(BreakerConfig::default())),
            Arc::new(mailer),
        )
    }

    #[tokio::test]
    async fn high_error_rate_fires_only_after_sustain_window() {
        let engine = engine_with(AlertsConfig::default());
        engine.metrics.gauge(ERROR_RATE_PERCENTAGE).set(2.5);
        engine.metrics.gauge(UPTIME_PERCENTAGE).set(100.0);

        let start = Instant::now();
        assert!(engine.evaluate(start).await.is_empty());
        assert!(
            engine
                .evaluate(start + Duration::from_secs(60))
                .await
                .is_empty()
        );
        let fired = engine.evaluate(start + Duration::from_secs(301)).await;
        assert_eq!(fired, vec![ALERT_HIGH_ERROR_RATE]);
        // already firing, no re-notification
        assert!(
            engine
                .evaluate(start + Duration::from_secs(400))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn recovery_resets_the_sustain_window() {
        let engine = engine_with(AlertsConfig::default());
        engine.metrics.gauge(UPTIME_PERCENTAGE).set(98.0);

        let start = Instant::now();
        assert!(engine.evaluate(start).await.is_empty());
        engine.metrics.gauge(UPTIME_PERCENTAGE).set(100.0);
        assert!(
            engine
                .evaluate(start + Duration::from_secs(200))
                .await
                .is_empty()
        );
        engine.metrics.gauge(UPTIME_PERCENTAGE).set(98.0);
        // the earlier breach no longer counts toward the sustain window
        assert!(
            engine
                .evaluate(start + Duration::from_secs(400))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn slow_provisioning_fires_without_sustain() {
        let engine = engine_with(AlertsConfig::default());
        engine.metrics.gauge(UPTIME_PERCENTAGE).set(100.0);
        engine
            .metrics
            .histogram(PROVISIONING_DURATION_SECONDS)
            .record(Duration::from_secs(150));

        let fired = engine.evaluate(Instant::now()).await;
        assert_eq!(fired, vec![ALERT_SLOW_PROVISIONING]);
    }
}
