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

use std::sync::Arc;

use crate::app::config::{AppConfig, BasicDatabaseConfig};
use crate::app::database::{DatabaseMigrator, PgPoolManager, PoolManager};
use crate::breaker::BreakerRegistry;
use crate::bus::{EventBus, InMemoryEventBus};
use crate::clients::{
    DependencyError, EnrollmentClient, HttpEnrollmentClient, HttpIdentityClient,
    HttpStorageClient, IdentityClient, SmtpMailer, StorageClient,
};
use crate::common::repository::PoolManagerWrapper;
use crate::metrics::MetricsRegistry;
use crate::progress::ProgressHub;
use crate::ratelimit::RateLimiter;
use crate::tenants::repository::TenantsRepository;
use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    transport::smtp::{Error, authentication::Credentials, response::Response},
};
#[cfg(test)]
use mockall::automock;
use tracing::{error, info};

pub(crate) mod dto;
pub(crate) mod error;
pub(crate) mod extractors;
pub(crate) mod repository;
pub(crate) mod services;
pub(crate) mod types;

pub trait ConfigProvider: Send + Sync {
    fn config(&self) -> Arc<AppConfig>;
}

/// The raw SMTP seam: everything that can push a finished [`Message`] out.
#[async_trait]
pub trait MailTransporter: Send + Sync {
    async fn send(&self, message: Message) -> Result<Response, Error>;
}

#[async_trait]
impl MailTransporter for AsyncSmtpTransport<Tokio1Executor> {
    async fn send(&self, message: Message) -> Result<Response, Error> {
        AsyncTransport::send(self, message).await
    }
}

/// The application-level email capability: render a template and deliver
/// it. Production wraps the SMTP transport in the email circuit breaker;
/// tests inject a double.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TemplatedMailer: Send + Sync {
    async fn send_templated(
        &self,
        to: &str,
        subject: &str,
        template: &str,
        data: &serde_json::Value,
    ) -> Result<(), DependencyError>;

    async fn send_admin_notification(
        &self,
        subject: &str,
        data: &serde_json::Value,
    ) -> Result<(), DependencyError>;
}

/// The process-wide application state: configuration, the connection pool
/// manager, the shared singletons (bus, progress hub, metrics, breakers)
/// and the dependency clients.
///
/// Generic over the pool manager and the SMTP transport so tests can build
/// a state around doubles; production uses [`DefaultAppState`].
pub struct AppState<P, T>
where
    P: Send + Sync,
    T: Send + Sync,
{
    pub config: Arc<AppConfig>,
    pub default_smtp_transport: Arc<T>,
    pub pool_manager: Arc<P>,
    pub migrator: Arc<dyn DatabaseMigrator>,
    pub bus: Arc<dyn EventBus>,
    pub progress_hub: Arc<ProgressHub>,
    pub metrics: Arc<MetricsRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub rate_limiter: Arc<RateLimiter>,
    pub mailer: Arc<dyn TemplatedMailer>,
    pub identity_client: Arc<dyn IdentityClient>,
    pub enrollment_client: Arc<dyn EnrollmentClient>,
    pub storage_client: Arc<dyn StorageClient>,
}

impl<P, T> Clone for AppState<P, T>
where
    P: Send + Sync,
    T: Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            default_smtp_transport: self.default_smtp_transport.clone(),
            pool_manager: self.pool_manager.clone(),
            migrator: self.migrator.clone(),
            bus: self.bus.clone(),
            progress_hub: self.progress_hub.clone(),
            metrics: self.metrics.clone(),
            breakers: self.breakers.clone(),
            rate_limiter: self.rate_limiter.clone(),
            mailer: self.mailer.clone(),
            identity_client: self.identity_client.clone(),
            enrollment_client: self.enrollment_client.clone(),
            storage_client: self.storage_client.clone(),
        }
    }
}

pub type DefaultSmtpTransport = AsyncSmtpTransport<Tokio1Executor>;
pub type DefaultAppState = AppState<PgPoolManager, DefaultSmtpTransport>;

impl DefaultAppState {
    fn init_config() -> anyhow::Result<AppConfig> {
        Ok(AppConfig::from_env()?)
    }

    async fn init_pool_manager(config: Arc<AppConfig>) -> anyhow::Result<PgPoolManager> {
        Ok(PgPoolManager::new(config.main_database(), config.default_tenant_database()).await?)
    }

    fn init_smtp_transport(config: Arc<AppConfig>) -> anyhow::Result<DefaultSmtpTransport> {
        Ok(
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(config.mail().smtp_host())?
                .credentials(Credentials::new(
                    config.mail().smtp_user().to_owned(),
                    config.mail().smtp_passwd().to_owned(),
                ))
                .build(),
        )
    }

    pub async fn new() -> anyhow::Result<DefaultAppState> {
        let config = Arc::new(Self::init_config()?);
        let pool_manager = Arc::new(Self::init_pool_manager(config.clone()).await?);
        let default_smtp_transport = Arc::new(Self::init_smtp_transport(config.clone())?);

        let metrics = Arc::new(MetricsRegistry::new());
        let breakers = Arc::new(BreakerRegistry::new(config.breaker().clone()));
        let bus: Arc<dyn EventBus> = Arc::new(InMemoryEventBus::new(
            config.onboarding().partitions.max(3),
        ));
        let progress_hub = ProgressHub::new();

        let rate_limiter = Arc::new(RateLimiter::new(
            Arc::new(PoolManagerWrapper::new(pool_manager.clone())),
            config.rate_limit().clone(),
            metrics.clone(),
        ));
        let mailer: Arc<dyn TemplatedMailer> = Arc::new(SmtpMailer::new(
            config.mail(),
            default_smtp_transport.clone(),
            breakers.get("email"),
        ));
        let identity_client: Arc<dyn IdentityClient> = Arc::new(HttpIdentityClient::new(
            config.identity(),
            breakers.get("identity"),
        )?);
        let enrollment_client: Arc<dyn EnrollmentClient> = Arc::new(HttpEnrollmentClient::new(
            config.enrollment(),
            breakers.get("enrollment"),
        )?);
        let storage_client: Arc<dyn StorageClient> = Arc::new(HttpStorageClient::new(
            config.storage(),
            breakers.get("storage"),
        )?);

        Ok(Self {
            config,
            default_smtp_transport,
            pool_manager: pool_manager.clone(),
            migrator: pool_manager,
            bus,
            progress_hub,
            metrics,
            breakers,
            rate_limiter,
            mailer,
            identity_client,
            enrollment_client,
            storage_client,
        })
    }

    /// Re-adds the pools of every tenant with a dedicated database after a
    /// restart.
    pub async fn init_tenant_pools(&self) -> anyhow::Result<()> {
        let repo = PoolManagerWrapper::new(self.pool_manager.clone());
        for tenant in TenantsRepository::list_dedicated(&repo).await? {
            match BasicDatabaseConfig::try_from(&tenant) {
                Ok(db_config) => {
                    match self.pool_manager.add_tenant_pool(tenant.id, &db_config).await {
                        Ok(tenant_id) => {
                            info!("Tenant pool initialization is successful: {}", &tenant_id)
                        }
                        Err(e) => error!("Tenant pool initialization failed: {}", e),
                    }
                }
                Err(e) => error!("Error parsing tenant: {}", e),
            }
        }
        Ok(())
    }
}

impl<P, T> ConfigProvider for AppState<P, T>
where
    P: Send + Sync,
    T: Send + Sync,
{
    fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }
}
