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

pub(crate) mod email;
pub(crate) mod enrollment;
pub(crate) mod identity;
pub(crate) mod storage;

pub use email::SmtpMailer;
pub use enrollment::HttpEnrollmentClient;
pub use identity::HttpIdentityClient;
pub use storage::HttpStorageClient;

use crate::breaker::BreakerError;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;
use uuid::Uuid;

/// Classified failure of a consumed dependency service.
///
/// The classification drives retry decisions in the pipelines: transient
/// kinds are retried with backoff, `Rejected` is terminal for the unit of
/// work it failed.
#[derive(Debug, Error, Clone)]
pub enum DependencyError {
    #[error("A(z) {service} szolgáltatás nem válaszolt időben")]
    Timeout { service: &'static str },

    #[error("{service} returned server error {status}")]
    Server { service: &'static str, status: u16 },

    #[error("{service} rejected the request ({status}): {message}")]
    Rejected {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("A(z) '{0}' szolgáltatás átmenetileg nem érhető el")]
    CircuitOpen(String),

    #[error("transport error while calling {service}: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },
}

impl DependencyError {
    /// Timeouts, server errors, open circuits and transport failures are
    /// worth retrying; an explicit rejection is not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, DependencyError::Rejected { .. })
    }
}

impl From<BreakerError<DependencyError>> for DependencyError {
    fn from(value: BreakerError<DependencyError>) -> Self {
        match value {
            BreakerError::Open(name) => DependencyError::CircuitOpen(name),
            BreakerError::Inner(e) => e,
        }
    }
}

pub(crate) fn classify_transport(service: &'static str, e: reqwest::Error) -> DependencyError {
    if e.is_timeout() {
        DependencyError::Timeout { service }
    } else {
        DependencyError::Transport {
            service,
            message: e.to_string(),
        }
    }
}

/// A user record to be created in the remote identity service.
#[derive(Debug, Clone)]
pub struct NewIdentityUser {
    pub tenant_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub password: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Creates the user with role-appropriate claims and returns the id
    /// assigned by the identity service.
    async fn create_user(&self, user: &NewIdentityUser) -> Result<Uuid, DependencyError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait EnrollmentClient: Send + Sync {
    async fn enroll_in_courses(
        &self,
        tenant_id: Uuid,
        identity_user_id: Uuid,
        course_codes: &[String],
    ) -> Result<(), DependencyError>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn provision_user_storage(
        &self,
        tenant_id: Uuid,
        identity_user_id: Uuid,
        quota_bytes: i64,
    ) -> Result<(), DependencyError>;
}
