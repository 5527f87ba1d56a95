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

use crate::app::database::{DatabaseMigrator, PoolManager};
use crate::bus::EventBus;
use crate::clients::IdentityClient;
use crate::common::repository::PoolManagerWrapper;
use crate::common::{ConfigProvider, DefaultAppState, TemplatedMailer};
use crate::metrics::MetricsRegistry;
use crate::progress::ProgressHub;
use crate::tenants::repository::TenantsRepository;
use std::sync::Arc;

pub(crate) mod model;
pub(crate) mod service;

pub trait ProvisioningModule: ConfigProvider + Send + Sync {
    fn tenants_repo(&self) -> Arc<dyn TenantsRepository>;
    fn pool_manager(&self) -> Arc<dyn PoolManager>;
    fn migrator(&self) -> Arc<dyn DatabaseMigrator>;
    fn identity_client(&self) -> Arc<dyn IdentityClient>;
    fn mailer(&self) -> Arc<dyn TemplatedMailer>;
    fn progress_hub(&self) -> Arc<ProgressHub>;
    fn bus(&self) -> Arc<dyn EventBus>;
    fn metrics(&self) -> Arc<MetricsRegistry>;
}

impl ProvisioningModule for DefaultAppState {
    fn tenants_repo(&self) -> Arc<dyn TenantsRepository> {
        Arc::new(PoolManagerWrapper::new(self.pool_manager.clone()))
    }
    fn pool_manager(&self) -> Arc<dyn PoolManager> {
        self.pool_manager.clone()
    }
    fn migrator(&self) -> Arc<dyn DatabaseMigrator> {
        self.migrator.clone()
    }
    fn identity_client(&self) -> Arc<dyn IdentityClient> {
        self.identity_client.clone()
    }
    fn mailer(&self) -> Arc<dyn TemplatedMailer> {
        self.mailer.clone()
    }
    fn progress_hub(&self) -> Arc<ProgressHub> {
        self.progress_hub.clone()
    }
    fn bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }
    fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::app::config::AppConfig;
    use mockall::mock;

    mock!(
        pub ProvisioningModule {}
        impl ConfigProvider for ProvisioningModule {
            fn config(&self) -> Arc<AppConfig>;
        }
        impl ProvisioningModule for ProvisioningModule {
            fn tenants_repo(&self) -> Arc<dyn TenantsRepository>;
            fn pool_manager(&self) -> Arc<dyn PoolManager>;
            fn migrator(&self) -> Arc<dyn DatabaseMigrator>;
            fn identity_client(&self) -> Arc<dyn IdentityClient>;
            fn mailer(&self) -> Arc<dyn TemplatedMailer>;
            fn progress_hub(&self) -> Arc<ProgressHub>;
            fn bus(&self) -> Arc<dyn EventBus>;
            fn metrics(&self) -> Arc<MetricsRegistry>;
        }
    );
}
