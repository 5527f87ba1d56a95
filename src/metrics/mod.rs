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

pub(crate) mod alerts;

use hdrhistogram::Histogram;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

pub const PROVISIONING_TOTAL: &str = "provisioning_total";
pub const PROVISIONING_ERRORS_TOTAL: &str = "provisioning_errors_total";
pub const ONBOARDING_TASKS_PROCESSED_TOTAL: &str = "onboarding_tasks_processed_total";
pub const ONBOARDING_EMAIL_FAILURES_TOTAL: &str = "onboarding_email_failures_total";
pub const BUS_CONSUMER_LAG: &str = "bus_consumer_lag";
pub const RATE_LIMIT_FAIL_OPEN_TOTAL: &str = "rate_limit_fail_open_total";
pub const INTEGRITY_VIOLATIONS_TOTAL: &str = "integrity_violations_total";
pub const API_REQUESTS_TOTAL: &str = "api_requests_total";
pub const API_REQUEST_ERRORS_TOTAL: &str = "api_request_errors_total";

pub const PROVISIONING_DURATION_SECONDS: &str = "provisioning_duration_seconds";
pub const ONBOARDING_TASK_DURATION_SECONDS: &str = "onboarding_task_duration_seconds";

pub const TENANTS_ACTIVE: &str = "tenants_active";
pub const TENANT_STORAGE_USED_BYTES: &str = "tenant_storage_used_bytes";
pub const TENANT_STORAGE_QUOTA_BYTES: &str = "tenant_storage_quota_bytes";
pub const API_REQUESTS_PER_MINUTE: &str = "api_requests_per_minute";
pub const ERROR_RATE_PERCENTAGE: &str = "error_rate_percentage";
pub const UPTIME_PERCENTAGE: &str = "uptime_percentage";

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge that can go up or down. The f64 value is stored in an atomic as
/// its bit pattern, so reads and writes never block.
#[derive(Debug, Default)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// A histogram of durations, recorded with millisecond resolution.
pub struct DurationHistogram {
    inner: Mutex<Histogram<u64>>,
}

impl DurationHistogram {
    fn new() -> Self {
        Self {
            // up to one hour with two significant digits
            inner: Mutex::new(
                Histogram::new_with_bounds(1, 3_600_000, 2).expect("static histogram bounds"),
            ),
        }
    }

    pub fn record(&self, duration: Duration) {
        if let Ok(mut histogram) = self.inner.lock() {
            let millis = duration.as_millis().min(u128::from(u64::MAX)) as u64;
            histogram.saturating_record(millis.max(1));
        }
    }

    pub fn value_at_quantile(&self, quantile: f64) -> Duration {
        match self.inner.lock() {
            Ok(histogram) => Duration::from_millis(histogram.value_at_quantile(quantile)),
            Err(_) => Duration::ZERO,
        }
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().map(|h| h.len()).unwrap_or(0)
    }
}

type MetricKey = (String, Vec<(String, String)>);

fn metric_key(name: &str, labels: &[(&str, &str)]) -> MetricKey {
    let mut labels: Vec<(String, String)> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    labels.sort();
    (name.to_string(), labels)
}

/// Process-wide registry of counters, gauges and histograms.
///
/// Metrics are created lazily on first access; a `(name, labels)` pair
/// always resolves to the same instance.
#[derive(Default)]
pub struct MetricsRegistry {
    counters: RwLock<HashMap<MetricKey, Arc<Counter>>>,
    gauges: RwLock<HashMap<MetricKey, Arc<Gauge>>>,
    histograms: RwLock<HashMap<MetricKey, Arc<DurationHistogram>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, name: &str) -> Arc<Counter> {
        self.counter_with(name, &[])
    }

    pub fn counter_with(&self, name: &str, labels: &[(&str, &str)]) -> Arc<Counter> {
        let key = metric_key(name, labels);
        if let Ok(guard) = self.counters.read()
            && let Some(existing) = guard.get(&key)
        {
            return existing.clone();
        }
        let created = Arc::new(Counter::default());
        match self.counters.write() {
            Ok(mut guard) => guard.entry(key).or_insert(created).clone(),
            Err(_) => created,
        }
    }

    pub fn gauge(&self, name: &str) -> Arc<Gauge> {
        self.gauge_with(name, &[])
    }

    pub fn gauge_with(&self, name: &str, labels: &[(&str, &str)]) -> Arc<Gauge> {
        let key = metric_key(name, labels);
        if let Ok(guard) = self.gauges.read()
            && let Some(existing) = guard.get(&key)
        {
            return existing.clone();
        }
        let created = Arc::new(Gauge::default());
        match self.gauges.write() {
            Ok(mut guard) => guard.entry(key).or_insert(created).clone(),
            Err(_) => created,
        }
    }

    pub fn histogram(&self, name: &str) -> Arc<DurationHistogram> {
        let key = metric_key(name, &[]);
        if let Ok(guard) = self.histograms.read()
            && let Some(existing) = guard.get(&key)
        {
            return existing.clone();
        }
        let created = Arc::new(DurationHistogram::new());
        match self.histograms.write() {
            Ok(mut guard) => guard.entry(key).or_insert(created).clone(),
            Err(_) => created,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn counters_with_distinct_labels_do_not_share_state() {
        let registry = MetricsRegistry::new();
        registry
            .counter_with(PROVISIONING_TOTAL, &[("status", "completed")])
            .inc();
        registry
            .counter_with(PROVISIONING_TOTAL, &[("status", "failed")])
            .add(2);

        assert_eq!(
            registry
                .counter_with(PROVISIONING_TOTAL, &[("status", "completed")])
                .get(),
            1
        );
        assert_eq!(
            registry
                .counter_with(PROVISIONING_TOTAL, &[("status", "failed")])
                .get(),
            2
        );
    }

    #[test]
    fn gauge_stores_float_values() {
        let registry = MetricsRegistry::new();
        registry.gauge(ERROR_RATE_PERCENTAGE).set(1.25);
        assert_eq!(registry.gauge(ERROR_RATE_PERCENTAGE).get(), 1.25);
    }

    #[test]
    fn histogram_reports_percentiles() {
        let registry = MetricsRegistry::new();
        let histogram = registry.histogram(PROVISIONING_DURATION_SECONDS);
        for millis in [100u64, 200, 300, 400, 10_000] {
            histogram.record(Duration::from_millis(millis));
        }
        assert_eq!(histogram.count(), 5);
        assert!(histogram.value_at_quantile(0.99) >= Duration::from_millis(9_000));
        assert!(histogram.value_at_quantile(0.5) <= Duration::from_millis(400));
    }
}
