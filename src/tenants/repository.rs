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

use crate::app::config::BasicDatabaseConfig;
use crate::audit::model::NewAuditEvent;
use crate::audit::repository::insert_event;
use crate::common::error::{RepositoryError, RepositoryResult};
use crate::common::repository::PoolManagerWrapper;
use crate::common::types::value_object::{ValueObject, ValueObjectable};
use crate::common::types::DdlParameter;
use crate::provisioning::model::{ProvisioningStatus, SetupToken, TenantProvisioning};
use crate::tenants::model::{SubscriptionTier, Tenant, TenantAdmin};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

/// The tenant store: tenant, tier, admin, provisioning-state, setup-token
/// and storage-quota records.
///
/// Mutations that are externally observable take the audit event describing
/// them and write it in the same transaction, so the mutation and its audit
/// row either both commit or neither does.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantsRepository: Send + Sync {
    /// Inserts the tenant and its pending provisioning record, together
    /// with the `tenant_created` audit row, in one transaction.
    async fn create_with_provisioning(
        &self,
        name: &str,
        domain: &str,
        tier: &str,
        event: NewAuditEvent,
    ) -> RepositoryResult<(Tenant, TenantProvisioning)>;

    async fn get_by_id(&self, tenant_id: Uuid) -> RepositoryResult<Tenant>;

    async fn get_tier_by_name(&self, name: &str) -> RepositoryResult<Option<SubscriptionTier>>;

    /// Runs the DDL that creates the role and database of a dedicated
    /// tenant database on the default tenant instance. Identifiers are
    /// restricted through [`DdlParameter`] before interpolation.
    async fn allocate_dedicated_database(
        &self,
        config: &BasicDatabaseConfig,
    ) -> RepositoryResult<()>;

    /// Records the handle of the allocated dedicated database on the
    /// tenant row.
    async fn set_db_handle(
        &self,
        tenant_id: Uuid,
        config: &BasicDatabaseConfig,
    ) -> RepositoryResult<Tenant>;

    async fn insert_admin(
        &self,
        tenant_id: Uuid,
        identity_user_id: Uuid,
        email: &str,
        first_name: &str,
        last_name: &str,
        is_primary: bool,
    ) -> RepositoryResult<TenantAdmin>;

    async fn get_primary_admin(&self, tenant_id: Uuid) -> RepositoryResult<Option<TenantAdmin>>;

    async fn set_quota(&self, tenant_id: Uuid, quota_bytes: i64) -> RepositoryResult<Tenant>;

    /// Applies a storage delta if and only if the quota and non-negativity
    /// predicates hold after the change. Returns `None` without mutating
    /// anything when they do not. When an audit event is supplied it
    /// commits with the successful adjustment.
    async fn try_adjust_storage(
        &self,
        tenant_id: Uuid,
        bytes_delta: i64,
        file_delta: i64,
        event: Option<NewAuditEvent>,
    ) -> RepositoryResult<Option<Tenant>>;

    async fn get_provisioning(
        &self,
        provisioning_id: Uuid,
    ) -> RepositoryResult<Option<TenantProvisioning>>;

    /// Moves a non-terminal provisioning record to the given stage. The
    /// progress percentage never decreases.
    async fn advance_provisioning(
        &self,
        provisioning_id: Uuid,
        status: ProvisioningStatus,
    ) -> RepositoryResult<TenantProvisioning>;

    /// Moves a provisioning record to a terminal state, stamping
    /// `completed_at` and `duration_seconds`.
    async fn complete_provisioning(
        &self,
        provisioning_id: Uuid,
        status: ProvisioningStatus,
        error_message: Option<String>,
    ) -> RepositoryResult<TenantProvisioning>;

    async fn insert_setup_token(
        &self,
        tenant_id: Uuid,
        admin_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        event: Option<NewAuditEvent>,
    ) -> RepositoryResult<SetupToken>;

    /// Consumes an unused, unexpired token, setting `used_at` exactly
    /// once. Returns `None` for unknown, used or expired tokens.
    async fn consume_setup_token(
        &self,
        token: &str,
        event: NewAuditEvent,
    ) -> RepositoryResult<Option<SetupToken>>;

    async fn soft_delete(&self, tenant_id: Uuid, event: NewAuditEvent) -> RepositoryResult<Tenant>;

    /// Deletes the tenant row for good, but only while it owns no users
    /// and no courses. Returns false when the precondition fails.
    async fn force_delete(&self, tenant_id: Uuid, event: NewAuditEvent)
    -> RepositoryResult<bool>;

    async fn count_active(&self) -> RepositoryResult<i64>;

    async fn list_dedicated(&self) -> RepositoryResult<Vec<Tenant>>;
}

#[async_trait]
impl TenantsRepository for PoolManagerWrapper {
    async fn create_with_provisioning(
        &self,
        name: &str,
        domain: &str,
        tier: &str,
        event: NewAuditEvent,
    ) -> RepositoryResult<(Tenant, TenantProvisioning)> {
        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (name, domain, tier)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(domain)
        .bind(tier)
        .fetch_one(&mut *tx)
        .await?;

        let provisioning = sqlx::query_as::<_, TenantProvisioning>(
            r#"
            INSERT INTO tenant_provisioning (tenant_id, status, progress_percentage)
            VALUES ($1, 'pending', 0)
            RETURNING *
            "#,
        )
        .bind(tenant.id)
        .fetch_one(&mut *tx)
        .await?;

        let mut event = event;
        event.tenant_id = Some(tenant.id);
        event.aggregate_id = Some(tenant.id);
        insert_event(&mut *tx, &event).await?;

        tx.commit().await?;
        Ok((tenant, provisioning))
    }

    async fn get_by_id(&self, tenant_id: Uuid) -> RepositoryResult<Tenant> {
        Ok(sqlx::query_as::<_, Tenant>(
            r#"
            SELECT *
            FROM tenants
            WHERE deleted_at IS NULL
                AND id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool_manager.get_main_pool())
        .await?)
    }

    async fn get_tier_by_name(&self, name: &str) -> RepositoryResult<Option<SubscriptionTier>> {
        Ok(
            sqlx::query_as::<_, SubscriptionTier>(
                "SELECT * FROM subscription_tiers WHERE name = $1",
            )
            .bind(name)
            .fetch_optional(&self.pool_manager.get_main_pool())
            .await?,
        )
    }

    async fn allocate_dedicated_database(
        &self,
        config: &BasicDatabaseConfig,
    ) -> RepositoryResult<()> {
        let username = ValueObject::new(DdlParameter(config.username.clone()))
            .map_err(RepositoryError::InvalidInput)?;
        let database = ValueObject::new(DdlParameter(config.database.clone()))
            .map_err(RepositoryError::InvalidInput)?;
        // generated alphanumeric password, escaped anyway
        let password = config.password.replace('\'', "''");

        let pool = self.pool_manager.get_default_tenant_pool();
        sqlx::query(&format!(
            "CREATE ROLE \"{}\" LOGIN PASSWORD '{}'",
            username.extract().get_value(),
            password
        ))
        .execute(&pool)
        .await?;
        sqlx::query(&format!(
            "CREATE DATABASE \"{}\" OWNER \"{}\"",
            database.extract().get_value(),
            username.extract().get_value()
        ))
        .execute(&pool)
        .await?;
        Ok(())
    }

    async fn set_db_handle(
        &self,
        tenant_id: Uuid,
        config: &BasicDatabaseConfig,
    ) -> RepositoryResult<Tenant> {
        Ok(sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants
            SET db_handle = $2,
                db_host = $3,
                db_port = $4,
                db_user = $5,
                db_password = $6,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(&config.database)
        .bind(&config.host)
        .bind(config.port as i32)
        .bind(&config.username)
        .bind(&config.password)
        .fetch_one(&self.pool_manager.get_main_pool())
        .await?)
    }

    async fn insert_admin(
        &self,
        tenant_id: Uuid,
        identity_user_id: Uuid,
        email: &str,
        first_name: &str,
        last_name: &str,
        is_primary: bool,
    ) -> RepositoryResult<TenantAdmin> {
        Ok(sqlx::query_as::<_, TenantAdmin>(
            r#"
            INSERT INTO tenant_admins (tenant_id, identity_user_id, email, first_name, last_name, is_primary)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(identity_user_id)
        .bind(email)
        .bind(first_name)
        .bind(last_name)
        .bind(is_primary)
        .fetch_one(&self.pool_manager.get_main_pool())
        .await?)
    }

    async fn get_primary_admin(&self, tenant_id: Uuid) -> RepositoryResult<Option<TenantAdmin>> {
        Ok(sqlx::query_as::<_, TenantAdmin>(
            r#"
            SELECT *
            FROM tenant_admins
            WHERE tenant_id = $1
                AND is_primary
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool_manager.get_main_pool())
        .await?)
    }

    async fn set_quota(&self, tenant_id: Uuid, quota_bytes: i64) -> RepositoryResult<Tenant> {
        Ok(sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants
            SET storage_quota_bytes = $2,
                updated_at = now()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(quota_bytes)
        .fetch_one(&self.pool_manager.get_main_pool())
        .await?)
    }

    async fn try_adjust_storage(
        &self,
        tenant_id: Uuid,
        bytes_delta: i64,
        file_delta: i64,
        event: Option<NewAuditEvent>,
    ) -> RepositoryResult<Option<Tenant>> {
        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        // the quota predicate rides in the WHERE clause, so concurrent
        // reserves serialize on the row and a rejected reserve mutates
        // nothing
        let adjusted = sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants
            SET storage_used_bytes = storage_used_bytes + $2,
                file_count = file_count + $3,
                updated_at = now()
            WHERE id = $1
                AND deleted_at IS NULL
                AND storage_used_bytes + $2 >= 0
                AND storage_used_bytes + $2 <= storage_quota_bytes
                AND file_count + $3 >= 0
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(bytes_delta)
        .bind(file_delta)
        .fetch_optional(&mut *tx)
        .await?;

        if adjusted.is_some()
            && let Some(event) = event
        {
            insert_event(&mut *tx, &event).await?;
        }

        tx.commit().await?;
        Ok(adjusted)
    }

    async fn get_provisioning(
        &self,
        provisioning_id: Uuid,
    ) -> RepositoryResult<Option<TenantProvisioning>> {
        Ok(
            sqlx::query_as::<_, TenantProvisioning>(
                "SELECT * FROM tenant_provisioning WHERE id = $1",
            )
            .bind(provisioning_id)
            .fetch_optional(&self.pool_manager.get_main_pool())
            .await?,
        )
    }

    async fn advance_provisioning(
        &self,
        provisioning_id: Uuid,
        status: ProvisioningStatus,
    ) -> RepositoryResult<TenantProvisioning> {
        Ok(sqlx::query_as::<_, TenantProvisioning>(
            r#"
            UPDATE tenant_provisioning
            SET status = $2,
                progress_percentage = GREATEST(progress_percentage, $3)
            WHERE id = $1
                AND completed_at IS NULL
            RETURNING *
            "#,
        )
        .bind(provisioning_id)
        .bind(status.as_str())
        .bind(status.progress())
        .fetch_one(&self.pool_manager.get_main_pool())
        .await?)
    }

    async fn complete_provisioning(
        &self,
        provisioning_id: Uuid,
        status: ProvisioningStatus,
        error_message: Option<String>,
    ) -> RepositoryResult<TenantProvisioning> {
        Ok(sqlx::query_as::<_, TenantProvisioning>(
            r#"
            UPDATE tenant_provisioning
            SET status = $2,
                progress_percentage = GREATEST(progress_percentage, $3),
                completed_at = now(),
                duration_seconds = EXTRACT(EPOCH FROM now() - started_at)::int,
                error_message = $4
            WHERE id = $1
                AND completed_at IS NULL
            RETURNING *
            "#,
        )
        .bind(provisioning_id)
        .bind(status.as_str())
        .bind(status.progress())
        .bind(error_message)
        .fetch_one(&self.pool_manager.get_main_pool())
        .await?)
    }

    async fn insert_setup_token(
        &self,
        tenant_id: Uuid,
        admin_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
        event: Option<NewAuditEvent>,
    ) -> RepositoryResult<SetupToken> {
        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        let inserted = sqlx::query_as::<_, SetupToken>(
            r#"
            INSERT INTO setup_tokens (tenant_id, admin_id, token, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(admin_id)
        .bind(token)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        if let Some(event) = event {
            insert_event(&mut *tx, &event).await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn consume_setup_token(
        &self,
        token: &str,
        event: NewAuditEvent,
    ) -> RepositoryResult<Option<SetupToken>> {
        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        let consumed = sqlx::query_as::<_, SetupToken>(
            r#"
            UPDATE setup_tokens
            SET used_at = now()
            WHERE token = $1
                AND used_at IS NULL
                AND expires_at > now()
            RETURNING *
            "#,
        )
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(consumed) = &consumed {
            let mut event = event;
            event.tenant_id = Some(consumed.tenant_id);
            event.aggregate_id = Some(consumed.id);
            insert_event(&mut *tx, &event).await?;
        }

        tx.commit().await?;
        Ok(consumed)
    }

    async fn soft_delete(&self, tenant_id: Uuid, event: NewAuditEvent) -> RepositoryResult<Tenant> {
        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants
            SET active = false,
                deleted_at = now(),
                updated_at = now()
            WHERE id = $1
                AND deleted_at IS NULL
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&mut *tx)
        .await?;

        insert_event(&mut *tx, &event).await?;
        tx.commit().await?;
        Ok(tenant)
    }

    async fn force_delete(
        &self,
        tenant_id: Uuid,
        event: NewAuditEvent,
    ) -> RepositoryResult<bool> {
        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        let result = sqlx::query(
            r#"
            DELETE FROM tenants
            WHERE id = $1
                AND user_count = 0
                AND course_count = 0
            "#,
        )
        .bind(tenant_id)
        .execute(&mut *tx)
        .await?;

        let deleted = result.rows_affected() > 0;
        if deleted {
            insert_event(&mut *tx, &event).await?;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn count_active(&self) -> RepositoryResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tenants WHERE active AND deleted_at IS NULL",
        )
        .fetch_one(&self.pool_manager.get_main_pool())
        .await?;
        Ok(count)
    }

    async fn list_dedicated(&self) -> RepositoryResult<Vec<Tenant>> {
        Ok(sqlx::query_as::<_, Tenant>(
            r#"
            SELECT *
            FROM tenants
            WHERE deleted_at IS NULL
                AND db_handle IS NOT NULL
            "#,
        )
        .fetch_all(&self.pool_manager.get_main_pool())
        .await?)
    }
}
