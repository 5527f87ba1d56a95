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

use crate::app::config::RateLimitConfig;
use crate::metrics::{MetricsRegistry, RATE_LIMIT_FAIL_OPEN_TOTAL};
use crate::ratelimit::model::{RateLimitAction, RateLimitDecision};
use crate::ratelimit::repository::RateLimitRepository;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Per-key request limiter over fixed windows in the shared store.
///
/// Counter rows expire with their window, so counts reset exactly when the
/// window elapses. When the backing store is unreachable the limiter fails
/// open: the request is admitted and the fail-open counter records that the
/// protection was skipped.
pub struct RateLimiter {
    repo: Arc<dyn RateLimitRepository>,
    config: RateLimitConfig,
    metrics: Arc<MetricsRegistry>,
}

impl RateLimiter {
    pub fn new(
        repo: Arc<dyn RateLimitRepository>,
        config: RateLimitConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            repo,
            config,
            metrics,
        }
    }

    pub async fn allow(&self, key: &str, action: RateLimitAction) -> RateLimitDecision {
        self.allow_at(key, action, Utc::now()).await
    }

    /// Checks the limit against an explicit clock value. Production code
    /// goes through [`RateLimiter::allow`]; tests advance the clock to
    /// verify the window semantics.
    pub async fn allow_at(
        &self,
        key: &str,
        action: RateLimitAction,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let (limit, window_secs) = if action.is_heavy() {
            (self.config.heavy_limit, self.config.heavy_window_secs)
        } else {
            (self.config.general_limit, self.config.general_window_secs)
        };

        let ts = now.timestamp();
        let window_start_ts = ts - ts.rem_euclid(window_secs);
        let Some(window_start) = DateTime::from_timestamp(window_start_ts, 0) else {
            return RateLimitDecision::allowed();
        };
        let window_end = window_start + TimeDelta::seconds(window_secs);

        match self
            .repo
            .increment(key, action.as_str(), window_start, window_end)
            .await
        {
            Ok(count) if count <= limit => RateLimitDecision::allowed(),
            Ok(_) => {
                let retry_after = (window_end - now)
                    .to_std()
                    .unwrap_or(Duration::from_secs(1))
                    .max(Duration::from_secs(1));
                RateLimitDecision::denied(retry_after)
            }
            Err(e) => {
                warn!(key, action = action.as_str(), "rate limiter failing open: {e}");
                self.metrics.counter(RATE_LIMIT_FAIL_OPEN_TOTAL).inc();
                RateLimitDecision::allowed()
            }
        }
    }

    /// Reclaims elapsed windows. Ran periodically from the background
    /// maintenance task.
    pub async fn purge_expired(&self) {
        if let Err(e) = self.repo.purge_expired(Utc::now()).await {
            warn!("rate limit window purge failed: {e}");
        }
    }
}
