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

use crate::bus::EventBus;
use crate::clients::{EnrollmentClient, IdentityClient, StorageClient};
use crate::common::repository::PoolManagerWrapper;
use crate::common::{ConfigProvider, DefaultAppState, TemplatedMailer};
use crate::metrics::MetricsRegistry;
use crate::onboarding::repository::JobsRepository;
use crate::progress::ProgressHub;
use crate::ratelimit::RateLimiter;
use crate::tenants::repository::TenantsRepository;
use std::sync::Arc;

pub(crate) mod csv;
pub(crate) mod dto;
mod handler;
pub(crate) mod model;
pub(crate) mod repository;
pub(crate) mod routes;
pub(crate) mod service;
pub(crate) mod types;
pub(crate) mod worker;

pub trait OnboardingModule: ConfigProvider + Send + Sync {
    fn jobs_repo(&self) -> Arc<dyn JobsRepository>;
    fn tenants_repo(&self) -> Arc<dyn TenantsRepository>;
    fn rate_limiter(&self) -> Arc<RateLimiter>;
    fn identity_client(&self) -> Arc<dyn IdentityClient>;
    fn enrollment_client(&self) -> Arc<dyn EnrollmentClient>;
    fn storage_client(&self) -> Arc<dyn StorageClient>;
    fn mailer(&self) -> Arc<dyn TemplatedMailer>;
    fn bus(&self) -> Arc<dyn EventBus>;
    fn progress_hub(&self) -> Arc<ProgressHub>;
    fn metrics(&self) -> Arc<MetricsRegistry>;
}

impl OnboardingModule for DefaultAppState {
    fn jobs_repo(&self) -> Arc<dyn JobsRepository> {
        Arc::new(PoolManagerWrapper::new(self.pool_manager.clone()))
    }
    fn tenants_repo(&self) -> Arc<dyn TenantsRepository> {
        Arc::new(PoolManagerWrapper::new(self.pool_manager.clone()))
    }
    fn rate_limiter(&self) -> Arc<RateLimiter> {
        self.rate_limiter.clone()
    }
    fn identity_client(&self) -> Arc<dyn IdentityClient> {
        self.identity_client.clone()
    }
    fn enrollment_client(&self) -> Arc<dyn EnrollmentClient> {
        self.enrollment_client.clone()
    }
    fn storage_client(&self) -> Arc<dyn StorageClient> {
        self.storage_client.clone()
    }
    fn mailer(&self) -> Arc<dyn TemplatedMailer> {
        self.mailer.clone()
    }
    fn bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }
    fn progress_hub(&self) -> Arc<ProgressHub> {
        self.progress_hub.clone()
    }
    fn metrics(&self) -> Arc<MetricsRegistry> {
        self.metrics.clone()
    }
}
