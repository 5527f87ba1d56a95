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

use crate::common::dto::FormError;
use crate::common::error::FriendlyError;
use crate::common::types::{Email, ValueObject};
use crate::provisioning::model::TenantProvisioning;
use crate::tenants::model::Tenant;
use crate::tenants::types::{DomainLabel, TenantName, TierName};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use tracing::Level;
use uuid::Uuid;

/// The raw, untyped shape of a tenant creation request.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTenantHelper {
    pub name: String,
    pub domain: String,
    pub tier: String,
    pub admin_email: String,
    pub admin_first_name: String,
    pub admin_last_name: String,
    pub admin_password: String,
}

/// The validated tenant creation request.
#[derive(Debug, Clone)]
pub struct CreateTenantRequest {
    pub name: ValueObject<TenantName>,
    pub domain: ValueObject<DomainLabel>,
    pub tier: ValueObject<TierName>,
    pub admin_email: Email,
    pub admin_first_name: String,
    pub admin_last_name: String,
    pub admin_password: String,
}

/// Per-field validation errors of [`CreateTenantHelper`].
#[derive(Debug, Default, Clone, Serialize)]
pub struct CreateTenantError {
    pub name: Option<String>,
    pub domain: Option<String>,
    pub tier: Option<String>,
    pub admin_email: Option<String>,
    pub admin_first_name: Option<String>,
    pub admin_last_name: Option<String>,
    pub admin_password: Option<String>,
}

impl CreateTenantError {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.domain.is_none()
            && self.tier.is_none()
            && self.admin_email.is_none()
            && self.admin_first_name.is_none()
            && self.admin_last_name.is_none()
            && self.admin_password.is_none()
    }
}

impl Display for CreateTenantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Kérjük ellenőrizze a hibás mezőket!")
    }
}

impl IntoResponse for CreateTenantError {
    fn into_response(self) -> Response {
        FriendlyError::user_facing(
            Level::DEBUG,
            StatusCode::UNPROCESSABLE_ENTITY,
            file!(),
            FormError {
                message: self.to_string(),
                fields: self,
            },
        )
        .into_response()
    }
}

impl TryFrom<CreateTenantHelper> for CreateTenantRequest {
    type Error = CreateTenantError;

    fn try_from(value: CreateTenantHelper) -> Result<Self, Self::Error> {
        let mut error = CreateTenantError::default();

        let name = ValueObject::new(TenantName(value.name))
            .inspect_err(|e| error.name = Some(e.clone()))
            .ok();
        let domain = ValueObject::new(DomainLabel(value.domain))
            .inspect_err(|e| error.domain = Some(e.clone()))
            .ok();
        let tier = ValueObject::new(TierName(value.tier.to_lowercase()))
            .inspect_err(|e| error.tier = Some(e.clone()))
            .ok();
        let admin_email = value
            .admin_email
            .parse::<Email>()
            .inspect_err(|e| error.admin_email = Some(e.clone()))
            .ok();
        if value.admin_first_name.trim().is_empty() {
            error.admin_first_name = Some(String::from("A keresztnév nem lehet üres!"));
        }
        if value.admin_last_name.trim().is_empty() {
            error.admin_last_name = Some(String::from("A vezetéknév nem lehet üres!"));
        }
        if value.admin_password.chars().count() < 12 {
            error.admin_password =
                Some(String::from("A jelszónak legalább 12 karakternek kell lennie!"));
        }

        if !error.is_empty() {
            return Err(error);
        }

        Ok(CreateTenantRequest {
            name: name.ok_or_else(CreateTenantError::default)?,
            domain: domain.ok_or_else(CreateTenantError::default)?,
            tier: tier.ok_or_else(CreateTenantError::default)?,
            admin_email: admin_email.ok_or_else(CreateTenantError::default)?,
            admin_first_name: value.admin_first_name.trim().to_string(),
            admin_last_name: value.admin_last_name.trim().to_string(),
            admin_password: value.admin_password,
        })
    }
}

/// Response of a successful tenant creation request: the ids to poll with.
#[derive(Debug, Serialize)]
pub struct CreatedTenantResponse {
    pub tenant_id: Uuid,
    pub provisioning_id: Uuid,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct ProvisioningStatusResponse {
    pub status: String,
    pub progress_percentage: i32,
    pub duration_seconds: Option<i32>,
    pub error_message: Option<String>,
}

impl From<TenantProvisioning> for ProvisioningStatusResponse {
    fn from(value: TenantProvisioning) -> Self {
        Self {
            status: value.status,
            progress_percentage: value.progress_percentage,
            duration_seconds: value.duration_seconds,
            error_message: value.error_message,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ProvisioningStatusQuery {
    pub provisioning_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct StorageUsageUpdateRequest {
    pub tenant_id: Uuid,
    pub bytes_delta: i64,
    pub file_delta: i64,
}

#[derive(Debug, Deserialize)]
pub struct StorageQuotaQuery {
    pub tenant_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StorageQuotaResponse {
    pub quota_bytes: i64,
    pub used_bytes: i64,
    pub file_count: i64,
}

impl From<&Tenant> for StorageQuotaResponse {
    fn from(tenant: &Tenant) -> Self {
        Self {
            quota_bytes: tenant.storage_quota_bytes,
            used_bytes: tenant.storage_used_bytes,
            file_count: tenant.file_count,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConsumeSetupTokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct ConsumedSetupTokenResponse {
    pub tenant_id: Uuid,
    pub admin_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct ResendSetupEmailRequest {
    pub tenant_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct DeleteTenantRequest {
    pub tenant_id: Uuid,
    #[serde(default)]
    pub force: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::value_object::ValueObjectable;
    use pretty_assertions::assert_eq;

    fn helper() -> CreateTenantHelper {
        CreateTenantHelper {
            name: String::from("Acme Egyetem"),
            domain: String::from("acme"),
            tier: String::from("professional"),
            admin_email: String::from("a@acme.x"),
            admin_first_name: String::from("Anna"),
            admin_last_name: String::from("Kovács"),
            admin_password: String::from("nagyon-titkos-jelszo"),
        }
    }

    #[test]
    fn valid_helper_converts() {
        let request = CreateTenantRequest::try_from(helper()).unwrap();
        assert_eq!(request.domain.extract().get_value(), "acme");
        assert_eq!(request.admin_email.as_str(), "a@acme.x");
    }

    #[test]
    fn invalid_fields_are_collected_per_field() {
        let mut broken = helper();
        broken.domain = String::from("Not Safe!");
        broken.admin_email = String::from("not-an-email");
        broken.admin_password = String::from("short");

        let error = CreateTenantRequest::try_from(broken).unwrap_err();
        assert!(error.domain.is_some());
        assert!(error.admin_email.is_some());
        assert!(error.admin_password.is_some());
        assert!(error.name.is_none());
    }
}
