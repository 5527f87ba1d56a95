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

use crate::common::error::RepositoryResult;
use crate::common::repository::PoolManagerWrapper;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;

/// Fixed-window counters in the shared store, one row per
/// `(key, action, window_start)`.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RateLimitRepository: Send + Sync {
    /// Atomically increments the counter of the window and returns the
    /// count after the increment.
    async fn increment(
        &self,
        key: &str,
        action: &str,
        window_start: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<i64>;

    /// Reclaims rows whose window has fully elapsed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> RepositoryResult<u64>;
}

#[async_trait]
impl RateLimitRepository for PoolManagerWrapper {
    async fn increment(
        &self,
        key: &str,
        action: &str,
        window_start: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> RepositoryResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO rate_limit_counters (key, action, window_start, expires_at, count)
            VALUES ($1, $2, $3, $4, 1)
            ON CONFLICT (key, action, window_start)
                DO UPDATE SET count = rate_limit_counters.count + 1
            RETURNING count
            "#,
        )
        .bind(key)
        .bind(action)
        .bind(window_start)
        .bind(expires_at)
        .fetch_one(&self.pool_manager.get_main_pool())
        .await?;
        Ok(count)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> RepositoryResult<u64> {
        let result = sqlx::query("DELETE FROM rate_limit_counters WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool_manager.get_main_pool())
            .await?;
        Ok(result.rows_affected())
    }
}
