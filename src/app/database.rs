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
use crate::common::error::{RepositoryError, RepositoryResult};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uuid::Uuid;

/// Trait defining the behavior for managing PostgreSQL connection pools.
///
/// This trait provides a contract for interacting with the different
/// PostgreSQL databases of the control plane: the main pool, the default
/// tenant instance pool (where dedicated tenant databases get created) and
/// the dynamically added per-tenant pools.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PoolManager: Send + Sync {
    /// Retrieves the main control-plane connection pool.
    fn get_main_pool(&self) -> PgPool;

    /// Retrieves the pool of the default tenant instance. Its main purpose
    /// is to run the DDL that allocates or drops dedicated tenant databases.
    fn get_default_tenant_pool(&self) -> PgPool;

    /// Retrieves the connection pool of a tenant with a dedicated database.
    ///
    /// # Returns
    /// * `Ok(PgPool)` - The tenant's database connection pool.
    /// * `Err(RepositoryError::TenantPoolNotFound)` - No pool has been added
    ///   for the given tenant id.
    fn get_tenant_pool(&self, tenant_id: Uuid) -> Result<PgPool, RepositoryError>;

    /// Asynchronously connects and registers the pool of a dedicated tenant
    /// database.
    async fn add_tenant_pool(
        &self,
        tenant_id: Uuid,
        config: &BasicDatabaseConfig,
    ) -> Result<Uuid, RepositoryError>;

    /// Removes a tenant-specific connection pool, if present.
    fn remove_tenant_pool(&self, tenant_id: Uuid) -> Result<(), RepositoryError>;
}

/// Database schema migrations, embedded at compile time.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DatabaseMigrator: Send + Sync {
    async fn migrate_main_db(&self) -> RepositoryResult<()>;
    async fn migrate_tenant_db(&self, tenant_id: Uuid) -> RepositoryResult<()>;
}

/// `PgPoolManager` provides centralized storage and access to the different
/// PostgreSQL connection pools of the control plane.
///
/// # Fields
///
/// * `main_pool`: the main control-plane database connection pool.
/// * `default_tenant_pool`: the pool of the postgres instance where managed
///   tenant databases are created.
/// * `tenant_pools`: dynamically created pools for tenants with a dedicated
///   database, keyed by tenant id, behind an `RwLock` for thread-safe read
///   and write access.
pub struct PgPoolManager {
    main_pool: PgPool,
    default_tenant_pool: PgPool,
    tenant_pools: Arc<RwLock<HashMap<Uuid, PgPool>>>,
}

impl PgPoolManager {
    /// Creates a new instance of `PgPoolManager` with the specified database
    /// configurations.
    ///
    /// # Errors
    ///
    /// This function will return an error if either the `main_pool` or the
    /// `default_tenant_pool` connection fails to initialize.
    pub async fn new(
        main_database_config: &BasicDatabaseConfig,
        default_tenant_database_config: &BasicDatabaseConfig,
    ) -> RepositoryResult<PgPoolManager> {
        let main_pool = PgPoolOptions::new()
            .min_connections(5)
            .max_connections(main_database_config.pool_size())
            .acquire_timeout(Duration::from_secs(3))
            .connect(&main_database_config.url())
            .await?;
        let default_tenant_pool = PgPoolOptions::new()
            .max_connections(default_tenant_database_config.pool_size())
            .acquire_timeout(Duration::from_secs(3))
            .connect(&default_tenant_database_config.url())
            .await?;
        Ok(Self {
            main_pool,
            default_tenant_pool,
            tenant_pools: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    fn connect_options(config: &BasicDatabaseConfig) -> RepositoryResult<PgConnectOptions> {
        let ssl_mode = match config.ssl_mode.as_deref() {
            Some(raw) => PgSslMode::from_str(raw)
                .map_err(|e| RepositoryError::InvalidInput(e.to_string()))?,
            None => PgSslMode::Prefer,
        };
        Ok(PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .password(&config.password)
            .database(&config.database)
            .ssl_mode(ssl_mode))
    }
}

#[async_trait]
impl PoolManager for PgPoolManager {
    fn get_main_pool(&self) -> PgPool {
        self.main_pool.clone()
    }

    fn get_default_tenant_pool(&self) -> PgPool {
        self.default_tenant_pool.clone()
    }

    fn get_tenant_pool(&self, tenant_id: Uuid) -> Result<PgPool, RepositoryError> {
        let guard = self
            .tenant_pools
            .read()
            .map_err(|e| RepositoryError::RwLockReadGuard(e.to_string()))?;
        guard
            .get(&tenant_id)
            .cloned()
            .ok_or(RepositoryError::TenantPoolNotFound)
    }

    async fn add_tenant_pool(
        &self,
        tenant_id: Uuid,
        config: &BasicDatabaseConfig,
    ) -> Result<Uuid, RepositoryError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size())
            .acquire_timeout(Duration::from_secs(3))
            .connect_with(Self::connect_options(config)?)
            .await?;

        {
            let mut pools = self
                .tenant_pools
                .write()
                .map_err(|e| RepositoryError::RwLockWriteGuard(e.to_string()))?;
            pools.insert(tenant_id, pool);
        }

        Ok(tenant_id)
    }

    fn remove_tenant_pool(&self, tenant_id: Uuid) -> Result<(), RepositoryError> {
        let mut pools = self
            .tenant_pools
            .write()
            .map_err(|e| RepositoryError::RwLockWriteGuard(e.to_string()))?;
        pools.remove(&tenant_id);
        Ok(())
    }
}

#[async_trait]
impl DatabaseMigrator for PgPoolManager {
    async fn migrate_main_db(&self) -> RepositoryResult<()> {
        sqlx::migrate!("migrations/main")
            .run(&self.main_pool)
            .await?;
        Ok(())
    }

    async fn migrate_tenant_db(&self, tenant_id: Uuid) -> RepositoryResult<()> {
        let pool = self.get_tenant_pool(tenant_id)?;
        sqlx::migrate!("migrations/tenant").run(&pool).await?;
        Ok(())
    }
}
