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

use crate::audit::model::NewAuditEvent;
use crate::common::error::RepositoryError;
use crate::metrics::{
    INTEGRITY_VIOLATIONS_TOTAL, MetricsRegistry, TENANT_STORAGE_QUOTA_BYTES,
    TENANT_STORAGE_USED_BYTES,
};
use crate::tenants::model::Tenant;
use crate::tenants::repository::TenantsRepository;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum QuotaServiceError {
    #[error("QUOTA_EXCEEDED")]
    QuotaExceeded,

    #[error("storage accounting would go negative for tenant {0}")]
    Integrity(Uuid),

    #[error("A megadott szervezet nem található")]
    TenantNotFound,

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Atomic reservation and release of per-tenant storage against the tier
/// quota.
///
/// The check-and-update runs as a single conditional UPDATE in the store,
/// so for a single tenant the net effect of concurrent reserves is
/// consistent and no observer ever sees `used > quota`. A rejected reserve
/// mutates nothing.
pub struct QuotaService;

type QuotaServiceResult<T> = Result<T, QuotaServiceError>;

impl QuotaService {
    pub async fn reserve(
        repo: Arc<dyn TenantsRepository>,
        metrics: Arc<MetricsRegistry>,
        tenant_id: Uuid,
        bytes_delta: i64,
        file_delta: i64,
        event: Option<NewAuditEvent>,
    ) -> QuotaServiceResult<Tenant> {
        Self::adjust(repo, metrics, tenant_id, bytes_delta, file_delta, event).await
    }

    pub async fn release(
        repo: Arc<dyn TenantsRepository>,
        metrics: Arc<MetricsRegistry>,
        tenant_id: Uuid,
        bytes_delta: i64,
        file_delta: i64,
        event: Option<NewAuditEvent>,
    ) -> QuotaServiceResult<Tenant> {
        Self::adjust(repo, metrics, tenant_id, -bytes_delta, -file_delta, event).await
    }

    async fn adjust(
        repo: Arc<dyn TenantsRepository>,
        metrics: Arc<MetricsRegistry>,
        tenant_id: Uuid,
        bytes_delta: i64,
        file_delta: i64,
        event: Option<NewAuditEvent>,
    ) -> QuotaServiceResult<Tenant> {
        if let Some(tenant) = repo
            .try_adjust_storage(tenant_id, bytes_delta, file_delta, event)
            .await?
        {
            Self::refresh_gauges(&metrics, &tenant);
            return Ok(tenant);
        }

        // the predicates refused the update; classify against the current row
        let tenant = repo.get_by_id(tenant_id).await.map_err(|e| {
            if e.is_row_not_found() {
                QuotaServiceError::TenantNotFound
            } else {
                QuotaServiceError::Repository(e)
            }
        })?;

        if bytes_delta > 0
            && tenant.storage_used_bytes + bytes_delta > tenant.storage_quota_bytes
        {
            return Err(QuotaServiceError::QuotaExceeded);
        }

        // dropping below zero is a bookkeeping bug, not a caller mistake
        error!(
            %tenant_id,
            bytes_delta,
            file_delta,
            "storage accounting integrity violation"
        );
        metrics.counter(INTEGRITY_VIOLATIONS_TOTAL).inc();
        Err(QuotaServiceError::Integrity(tenant_id))
    }

    pub(crate) fn refresh_gauges(metrics: &MetricsRegistry, tenant: &Tenant) {
        let tenant_id = tenant.id.to_string();
        metrics
            .gauge_with(TENANT_STORAGE_USED_BYTES, &[("tenant_id", &tenant_id)])
            .set(tenant.storage_used_bytes as f64);
        metrics
            .gauge_with(TENANT_STORAGE_QUOTA_BYTES, &[("tenant_id", &tenant_id)])
            .set(tenant.storage_quota_bytes as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenants::repository::MockTenantsRepository;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn tenant_with(used: i64, quota: i64, files: i64) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            name: String::from("Acme"),
            domain: String::from("acme"),
            tier: String::from("professional"),
            db_handle: None,
            db_host: None,
            db_port: None,
            db_user: None,
            db_password: None,
            storage_quota_bytes: quota,
            storage_used_bytes: used,
            file_count: files,
            user_count: 0,
            course_count: 0,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn rejected_reserve_at_the_quota_boundary() {
        let tenant = tenant_with(1_000_000_000, 1_073_741_824, 120);
        let tenant_id = tenant.id;

        let mut repo = MockTenantsRepository::new();
        repo.expect_try_adjust_storage()
            .withf(move |id, bytes, files, _| {
                *id == tenant_id && *bytes == 200_000_000 && *files == 10
            })
            .times(1)
            .returning(|_, _, _, _| Ok(None));
        let probe = tenant.clone();
        repo.expect_get_by_id()
            .times(1)
            .returning(move |_| Ok(probe.clone()));

        let result = QuotaService::reserve(
            Arc::new(repo),
            Arc::new(MetricsRegistry::new()),
            tenant_id,
            200_000_000,
            10,
            None,
        )
        .await;

        assert!(matches!(result, Err(QuotaServiceError::QuotaExceeded)));
    }

    #[tokio::test]
    async fn successful_reserve_updates_the_gauges() {
        let tenant = tenant_with(512, 1024, 1);
        let tenant_id = tenant.id;

        let mut repo = MockTenantsRepository::new();
        let updated = tenant.clone();
        repo.expect_try_adjust_storage()
            .times(1)
            .returning(move |_, _, _, _| Ok(Some(updated.clone())));

        let metrics = Arc::new(MetricsRegistry::new());
        QuotaService::reserve(Arc::new(repo), metrics.clone(), tenant_id, 256, 1, None)
            .await
            .unwrap();

        let id = tenant_id.to_string();
        assert_eq!(
            metrics
                .gauge_with(TENANT_STORAGE_USED_BYTES, &[("tenant_id", &id)])
                .get(),
            512.0
        );
        assert_eq!(
            metrics
                .gauge_with(TENANT_STORAGE_QUOTA_BYTES, &[("tenant_id", &id)])
                .get(),
            1024.0
        );
    }

    #[tokio::test]
    async fn going_negative_is_an_integrity_violation() {
        let tenant = tenant_with(100, 1024, 0);
        let tenant_id = tenant.id;

        let mut repo = MockTenantsRepository::new();
        repo.expect_try_adjust_storage()
            .times(1)
            .returning(|_, _, _, _| Ok(None));
        let probe = tenant.clone();
        repo.expect_get_by_id()
            .times(1)
            .returning(move |_| Ok(probe.clone()));

        let metrics = Arc::new(MetricsRegistry::new());
        let result = QuotaService::release(
            Arc::new(repo),
            metrics.clone(),
            tenant_id,
            500,
            0,
            None,
        )
        .await;

        assert!(matches!(result, Err(QuotaServiceError::Integrity(_))));
        assert_eq!(metrics.counter(INTEGRITY_VIOLATIONS_TOTAL).get(), 1);
    }
}
