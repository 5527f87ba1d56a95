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

use crate::common::dto::{HandlerResult, OkResponse, SimpleMessageResponse};
use crate::common::error::IntoFriendlyError;
use crate::common::extractors::{ClientContext, UserInput, ValidJson};
use crate::tenants::TenantsModule;
use crate::tenants::dto::{
    ConsumeSetupTokenRequest, CreateTenantHelper, CreateTenantRequest, DeleteTenantRequest,
    ProvisioningStatusQuery, ResendSetupEmailRequest, StorageQuotaQuery,
    StorageUsageUpdateRequest,
};
use crate::tenants::service::TenantsService;
use axum::debug_handler;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use std::sync::Arc;

#[debug_handler]
pub async fn create(
    State(tenants_module): State<Arc<dyn TenantsModule>>,
    client_context: ClientContext,
    UserInput(user_input, _): UserInput<CreateTenantRequest, CreateTenantHelper>,
) -> HandlerResult {
    match TenantsService::try_create(&client_context, user_input, tenants_module.clone()).await {
        Ok(created) => Ok((StatusCode::CREATED, OkResponse::new(created).into_response())
            .into_response()),
        Err(e) => Err(e
            .into_friendly_error(tenants_module.mailer())
            .await
            .into_response()),
    }
}

pub async fn provisioning_status(
    State(tenants_module): State<Arc<dyn TenantsModule>>,
    Query(query): Query<ProvisioningStatusQuery>,
) -> HandlerResult {
    match TenantsService::provisioning_status(query.provisioning_id, tenants_module.clone()).await
    {
        Ok(status) => Ok(OkResponse::new(status).into_response()),
        Err(e) => Err(e
            .into_friendly_error(tenants_module.mailer())
            .await
            .into_response()),
    }
}

pub async fn storage_update(
    State(tenants_module): State<Arc<dyn TenantsModule>>,
    client_context: ClientContext,
    ValidJson(payload): ValidJson<StorageUsageUpdateRequest>,
) -> HandlerResult {
    match TenantsService::update_storage_usage(&client_context, &payload, tenants_module.clone())
        .await
    {
        Ok(quota) => Ok(OkResponse::new(quota).into_response()),
        Err(e) => Err(e
            .into_friendly_error(tenants_module.mailer())
            .await
            .into_response()),
    }
}

pub async fn storage_get(
    State(tenants_module): State<Arc<dyn TenantsModule>>,
    Query(query): Query<StorageQuotaQuery>,
) -> HandlerResult {
    match TenantsService::get_storage_quota(query.tenant_id, tenants_module.clone()).await {
        Ok(quota) => Ok(OkResponse::new(quota).into_response()),
        Err(e) => Err(e
            .into_friendly_error(tenants_module.mailer())
            .await
            .into_response()),
    }
}

pub async fn setup_consume(
    State(tenants_module): State<Arc<dyn TenantsModule>>,
    client_context: ClientContext,
    ValidJson(payload): ValidJson<ConsumeSetupTokenRequest>,
) -> HandlerResult {
    match TenantsService::consume_setup_token(
        &client_context,
        &payload.token,
        tenants_module.clone(),
    )
    .await
    {
        Ok(consumed) => Ok(OkResponse::new(consumed).into_response()),
        Err(e) => Err(e
            .into_friendly_error(tenants_module.mailer())
            .await
            .into_response()),
    }
}

pub async fn setup_resend(
    State(tenants_module): State<Arc<dyn TenantsModule>>,
    client_context: ClientContext,
    ValidJson(payload): ValidJson<ResendSetupEmailRequest>,
) -> HandlerResult {
    match TenantsService::resend_setup_email(
        &client_context,
        payload.tenant_id,
        tenants_module.clone(),
    )
    .await
    {
        Ok(()) => Ok(OkResponse::new(SimpleMessageResponse {
            message: String::from("A beállító e-mailt újra elküldtük!"),
        })
        .into_response()),
        Err(e) => Err(e
            .into_friendly_error(tenants_module.mailer())
            .await
            .into_response()),
    }
}

pub async fn delete(
    State(tenants_module): State<Arc<dyn TenantsModule>>,
    client_context: ClientContext,
    ValidJson(payload): ValidJson<DeleteTenantRequest>,
) -> HandlerResult {
    match TenantsService::delete(&client_context, &payload, tenants_module.clone()).await {
        Ok(()) => Ok(OkResponse::new(SimpleMessageResponse {
            message: String::from("A szervezet törlése megtörtént!"),
        })
        .into_response()),
        Err(e) => Err(e
            .into_friendly_error(tenants_module.mailer())
            .await
            .into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenants::model::Tenant;
    use crate::tenants::repository::{MockTenantsRepository, TenantsRepository};
    use crate::tenants::routes::routes;
    use crate::tenants::tests::MockTenantsModule;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn create_rejects_invalid_payload_with_field_errors() {
        let module: Arc<dyn TenantsModule> = Arc::new(MockTenantsModule::new());
        let app = routes(module);

        let payload = r#"{
            "name": "Acme",
            "domain": "Not Safe!",
            "tier": "professional",
            "admin_email": "not-an-email",
            "admin_first_name": "Anna",
            "admin_last_name": "K",
            "admin_password": "short"
        }"#;
        let request = Request::builder()
            .method("POST")
            .uri("/tenants/create")
            .header("Content-Type", "application/json")
            .body(Body::from(payload))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["success"], false);
        assert!(json["error"]["fields"]["domain"].is_string());
        assert!(json["error"]["fields"]["admin_email"].is_string());
        assert!(json["error"]["fields"]["name"].is_null());
    }

    #[tokio::test]
    async fn storage_get_returns_the_quota_of_the_tenant() {
        let tenant_id = Uuid::new_v4();
        let mut repo = MockTenantsRepository::new();
        repo.expect_get_by_id().times(1).returning(move |id| {
            Ok(Tenant {
                id,
                name: String::from("Acme"),
                domain: String::from("acme"),
                tier: String::from("professional"),
                db_handle: None,
                db_host: None,
                db_port: None,
                db_user: None,
                db_password: None,
                storage_quota_bytes: 1_073_741_824,
                storage_used_bytes: 1_000_000_000,
                file_count: 120,
                user_count: 4,
                course_count: 2,
                active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                deleted_at: None,
            })
        });

        let mut module = MockTenantsModule::new();
        let repo: Arc<dyn TenantsRepository> = Arc::new(repo);
        module.expect_tenants_repo().returning(move || repo.clone());
        let module: Arc<dyn TenantsModule> = Arc::new(module);
        let app = routes(module);

        let request = Request::builder()
            .method("GET")
            .uri(format!("/tenants/storage/get?tenant_id={tenant_id}"))
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["data"]["quota_bytes"], 1_073_741_824i64);
        assert_eq!(json["data"]["used_bytes"], 1_000_000_000i64);
        assert_eq!(json["data"]["file_count"], 120);
    }
}
