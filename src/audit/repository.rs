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

use crate::audit::dto::AuditLogFilter;
use crate::audit::model::{AuditEvent, NewAuditEvent};
use crate::common::error::RepositoryResult;
use crate::common::repository::PoolManagerWrapper;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use sqlx::PgConnection;
use uuid::Uuid;

/// Appends an audit event on the given connection.
///
/// Repositories that mutate audited state call this inside their own
/// transaction, so the mutation and its audit row either both commit or
/// neither does.
pub(crate) async fn insert_event(
    conn: &mut PgConnection,
    event: &NewAuditEvent,
) -> RepositoryResult<AuditEvent> {
    Ok(sqlx::query_as::<_, AuditEvent>(
        r#"
        INSERT INTO audit_events (tenant_id, actor, ip, event_type, aggregate_id, data)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(event.tenant_id)
    .bind(&event.actor)
    .bind(event.ip)
    .bind(event.event_type.as_str())
    .bind(event.aggregate_id)
    .bind(&event.data)
    .fetch_one(conn)
    .await?)
}

/// The append-only audit store. There is deliberately no update or delete
/// on this interface; the storage layer additionally rejects both.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn append(&self, event: NewAuditEvent) -> RepositoryResult<AuditEvent>;

    async fn list(
        &self,
        tenant_id: Uuid,
        filter: AuditLogFilter,
    ) -> RepositoryResult<Vec<AuditEvent>>;
}

#[async_trait]
impl AuditRepository for PoolManagerWrapper {
    async fn append(&self, event: NewAuditEvent) -> RepositoryResult<AuditEvent> {
        let pool = self.pool_manager.get_main_pool();
        let mut conn = pool.acquire().await?;
        insert_event(&mut *conn, &event).await
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        filter: AuditLogFilter,
    ) -> RepositoryResult<Vec<AuditEvent>> {
        Ok(sqlx::query_as::<_, AuditEvent>(
            r#"
            SELECT *
            FROM audit_events
            WHERE tenant_id = $1
                AND ($2::text IS NULL OR event_type = $2)
                AND ($3::timestamptz IS NULL OR occurred_at >= $3)
                AND ($4::timestamptz IS NULL OR occurred_at <= $4)
            ORDER BY occurred_at DESC
            LIMIT $5
            "#,
        )
        .bind(tenant_id)
        .bind(filter.event_type)
        .bind(filter.from)
        .bind(filter.to)
        .bind(filter.limit)
        .fetch_all(&self.pool_manager.get_main_pool())
        .await?)
    }
}
