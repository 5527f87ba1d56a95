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
use crate::common::{ConfigProvider, DefaultAppState, TemplatedMailer};
use crate::audit::repository::AuditRepository;
use crate::common::repository::PoolManagerWrapper;
use std::sync::Arc;

pub(crate) mod dto;
mod handler;
pub(crate) mod model;
pub(crate) mod repository;
pub(crate) mod routes;
pub(crate) mod service;

pub trait AuditModule: ConfigProvider + Send + Sync {
    fn audit_repo(&self) -> Arc<dyn AuditRepository>;
    fn bus(&self) -> Arc<dyn EventBus>;
    fn mailer(&self) -> Arc<dyn TemplatedMailer>;
}

impl AuditModule for DefaultAppState {
    fn audit_repo(&self) -> Arc<dyn AuditRepository> {
        Arc::new(PoolManagerWrapper::new(self.pool_manager.clone()))
    }
    fn bus(&self) -> Arc<dyn EventBus> {
        self.bus.clone()
    }
    fn mailer(&self) -> Arc<dyn TemplatedMailer> {
        self.mailer.clone()
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::app::config::AppConfig;
    use mockall::mock;

    mock!(
        pub AuditModule {}
        impl ConfigProvider for AuditModule {
            fn config(&self) -> Arc<AppConfig>;
        }
        impl AuditModule for AuditModule {
            fn audit_repo(&self) -> Arc<dyn AuditRepository>;
            fn bus(&self) -> Arc<dyn EventBus>;
            fn mailer(&self) -> Arc<dyn TemplatedMailer>;
        }
    );
}
