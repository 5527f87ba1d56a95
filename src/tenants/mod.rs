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

use crate::app::database::PoolManager;
use crate::common::repository::PoolManagerWrapper;
use crate::common::{ConfigProvider, DefaultAppState, TemplatedMailer};
use crate::metrics::MetricsRegistry;
use crate::provisioning::ProvisioningModule;
use crate::ratelimit::RateLimiter;
use crate::tenants::repository::TenantsRepository;
use std::sync::Arc;

pub(crate) mod dto;
mod handler;
pub(crate) mod model;
pub(crate) mod repository;
pub(crate) mod routes;
pub(crate) mod service;
pub(crate) mod types;

pub trait TenantsModule: ConfigProvider + Send + Sync {
    fn tenants_repo(&self) -> Arc<dyn TenantsRepository>;
    fn rate_limiter(&self) -> Arc<RateLimiter>;
    fn mailer(&self) -> Arc<dyn TemplatedMailer>;
    fn metrics(&self) -> Arc<MetricsRegistry>;
    fn pool_manager(&self) -> Arc<dyn PoolManager>;
    fn provisioning_module(&self) -> Arc<dyn ProvisioningModule>;
}

impl TenantsModule for DefaultAppState {
    fn tenants_repo(&self) -> Arc<dyn TenantsRepository> {
        Arc::new(PoolManagerWrapper::new(self.pool_manager.clone()))
    }
    fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter.clone()
    }
    fn mailer(&self) -> Arc<dyn TemplatedMailer> {
        self.mailer.clone()
    }
    fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }
    fn pool_manager(&self) -> Arc<dyn PoolManager> {
        self.pool_manager.clone()
    }
    fn provisioning_module(&self) -> Arc<dyn ProvisioningModule> {
        Arc::new(self.clone())
    }
}
