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

use crate::audit::model::{AuditEventType, NewAuditEvent};
use crate::common::{ConfigProvider, TemplatedMailer};
use crate::common::dto::GeneralError;
use crate::common::error::{FriendlyError, IntoFriendlyError, RepositoryError};
use crate::common::extractors::ClientContext;
use crate::common::services::generate_hex_token_csprng;
use crate::common::types::value_object::ValueObjectable;
use crate::metrics::{PROVISIONING_ERRORS_TOTAL, TENANTS_ACTIVE};
use crate::provisioning::service::{AdminSpec, ProvisioningService, WELCOME_EMAIL_TEMPLATE};
use crate::quota::{QuotaService, QuotaServiceError};
use crate::ratelimit::RateLimitAction;
use crate::tenants::TenantsModule;
use crate::tenants::dto::{
    ConsumedSetupTokenResponse, CreateTenantRequest, CreatedTenantResponse, DeleteTenantRequest,
    ProvisioningStatusResponse, StorageQuotaResponse, StorageUsageUpdateRequest,
};
use axum::http::StatusCode;
use chrono::{TimeDelta, Utc};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::Level;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum TenantsServiceError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Túl sok próbálkozás! Próbáld újra {0} másodperc múlva.")]
    TooManyAttempts(u64),

    #[error("Ismeretlen előfizetési csomag: {0}")]
    UnknownTier(String),

    #[error("Ez a domain már foglalt!")]
    DomainTaken,

    #[error("A megadott szervezet nem található")]
    TenantNotFound,

    #[error("A megadott folyamat nem található")]
    ProvisioningNotFound,

    #[error("Érvénytelen vagy lejárt beállító hivatkozás")]
    InvalidSetupToken,

    #[error("A szervezethez nem tartozik elsődleges adminisztrátor")]
    AdminNotFound,

    #[error("A szervezet nem üres, végleges törlés nem lehetséges")]
    TenantNotEmpty,

    #[error(transparent)]
    Quota(#[from] QuotaServiceError),

    #[error("MailTransport error: {0}")]
    MailTransport(String),
}

#[async_trait::async_trait]
impl IntoFriendlyError<GeneralError> for TenantsServiceError {
    async fn into_friendly_error(
        self,
        mailer: Arc<dyn TemplatedMailer>,
    ) -> FriendlyError<GeneralError> {
        let body = GeneralError {
            message: self.to_string(),
        };
        match &self {
            Self::TooManyAttempts(_) => FriendlyError::user_facing(
                Level::DEBUG,
                StatusCode::TOO_MANY_REQUESTS,
                file!(),
                body,
            ),
            Self::UnknownTier(_) => FriendlyError::user_facing(
                Level::DEBUG,
                StatusCode::UNPROCESSABLE_ENTITY,
                file!(),
                body,
            ),
            Self::DomainTaken | Self::TenantNotEmpty => {
                FriendlyError::user_facing(Level::DEBUG, StatusCode::CONFLICT, file!(), body)
            }
            Self::TenantNotFound | Self::ProvisioningNotFound | Self::AdminNotFound => {
                FriendlyError::user_facing(Level::DEBUG, StatusCode::NOT_FOUND, file!(), body)
            }
            Self::InvalidSetupToken => {
                FriendlyError::user_facing(Level::DEBUG, StatusCode::UNAUTHORIZED, file!(), body)
            }
            Self::Quota(QuotaServiceError::QuotaExceeded) => {
                FriendlyError::user_facing(Level::DEBUG, StatusCode::CONFLICT, file!(), body)
            }
            Self::Quota(QuotaServiceError::TenantNotFound) => {
                FriendlyError::user_facing(Level::DEBUG, StatusCode::NOT_FOUND, file!(), body)
            }
            _ => FriendlyError::internal_with_admin_notify(file!(), body, mailer).await,
        }
    }
}

pub struct TenantsService;

type TenantsServiceResult<T> = Result<T, TenantsServiceError>;

impl TenantsService {
    /// Validates and persists a new tenant, then hands the rest of the
    /// work to the asynchronous provisioning run.
    ///
    /// The caller gets the tenant and provisioning ids back immediately;
    /// everything slow (database allocation, identity service, email)
    /// happens in the spawned run under its own deadline.
    pub async fn try_create(
        client_context: &ClientContext,
        payload: CreateTenantRequest,
        tenants_module: Arc<dyn TenantsModule>,
    ) -> TenantsServiceResult<CreatedTenantResponse> {
        let decision = tenants_module
            .rate_limiter()
            .allow(
                &client_context.ip.to_string(),
                RateLimitAction::TenantCreate,
            )
            .await;
        if !decision.allowed {
            return Err(TenantsServiceError::TooManyAttempts(
                decision.retry_after.as_secs().max(1),
            ));
        }

        let tier_name = payload.tier.extract().get_value().clone();
        let tier = tenants_module
            .tenants_repo()
            .get_tier_by_name(&tier_name)
            .await?
            .ok_or(TenantsServiceError::UnknownTier(tier_name))?;

        let event = NewAuditEvent::from_actor(
            &client_context.actor,
            client_context.ip,
            AuditEventType::TenantCreated,
            None,
            None,
            json!({
                "name": payload.name.extract().get_value(),
                "domain": payload.domain.extract().get_value(),
                "tier": tier.name,
            }),
        );

        let (tenant, provisioning) = tenants_module
            .tenants_repo()
            .create_with_provisioning(
                payload.name.extract().get_value(),
                payload.domain.extract().get_value(),
                &tier.name,
                event,
            )
            .await
            .map_err(|e| {
                if e.is_unique_violation() {
                    TenantsServiceError::DomainTaken
                } else {
                    tenants_module
                        .metrics()
                        .counter_with(
                            PROVISIONING_ERRORS_TOTAL,
                            &[("error_kind", "create_tenant_failed")],
                        )
                        .inc();
                    TenantsServiceError::Repository(e)
                }
            })?;

        Self::refresh_active_gauge(&tenants_module).await;

        let admin = AdminSpec {
            email: payload.admin_email.as_str().to_string(),
            first_name: payload.admin_first_name.clone(),
            last_name: payload.admin_last_name.clone(),
            password: payload.admin_password.clone(),
        };
        tokio::spawn(ProvisioningService::run(
            tenants_module.provisioning_module(),
            tenant.clone(),
            provisioning.id,
            admin,
        ));

        Ok(CreatedTenantResponse {
            tenant_id: tenant.id,
            provisioning_id: provisioning.id,
            status: provisioning.status,
        })
    }

    pub async fn provisioning_status(
        provisioning_id: Uuid,
        tenants_module: Arc<dyn TenantsModule>,
    ) -> TenantsServiceResult<ProvisioningStatusResponse> {
        let record = tenants_module
            .tenants_repo()
            .get_provisioning(provisioning_id)
            .await?
            .ok_or(TenantsServiceError::ProvisioningNotFound)?;
        Ok(ProvisioningStatusResponse::from(record))
    }

    pub async fn update_storage_usage(
        client_context: &ClientContext,
        payload: &StorageUsageUpdateRequest,
        tenants_module: Arc<dyn TenantsModule>,
    ) -> TenantsServiceResult<StorageQuotaResponse> {
        let event = NewAuditEvent::from_actor(
            &client_context.actor,
            client_context.ip,
            AuditEventType::TenantQuotaAdjusted,
            Some(payload.tenant_id),
            Some(payload.tenant_id),
            json!({
                "bytes_delta": payload.bytes_delta,
                "file_delta": payload.file_delta,
            }),
        );
        let tenant = QuotaService::reserve(
            tenants_module.tenants_repo(),
            tenants_module.metrics(),
            payload.tenant_id,
            payload.bytes_delta,
            payload.file_delta,
            Some(event),
        )
        .await?;
        Ok(StorageQuotaResponse::from(&tenant))
    }

    pub async fn get_storage_quota(
        tenant_id: Uuid,
        tenants_module: Arc<dyn TenantsModule>,
    ) -> TenantsServiceResult<StorageQuotaResponse> {
        let tenant = tenants_module
            .tenants_repo()
            .get_by_id(tenant_id)
            .await
            .map_err(|e| {
                if e.is_row_not_found() {
                    TenantsServiceError::TenantNotFound
                } else {
                    TenantsServiceError::Repository(e)
                }
            })?;
        Ok(StorageQuotaResponse::from(&tenant))
    }

    pub async fn consume_setup_token(
        client_context: &ClientContext,
        token: &str,
        tenants_module: Arc<dyn TenantsModule>,
    ) -> TenantsServiceResult<ConsumedSetupTokenResponse> {
        let event = NewAuditEvent::from_actor(
            &client_context.actor,
            client_context.ip,
            AuditEventType::SetupTokenConsumed,
            None,
            None,
            json!({}),
        );
        let consumed = tenants_module
            .tenants_repo()
            .consume_setup_token(token, event)
            .await?
            .ok_or(TenantsServiceError::InvalidSetupToken)?;
        Ok(ConsumedSetupTokenResponse {
            tenant_id: consumed.tenant_id,
            admin_id: consumed.admin_id,
        })
    }

    /// Issues a fresh setup token and re-sends the welcome email. The old
    /// token stays valid until it expires or gets consumed.
    pub async fn resend_setup_email(
        client_context: &ClientContext,
        tenant_id: Uuid,
        tenants_module: Arc<dyn TenantsModule>,
    ) -> TenantsServiceResult<()> {
        let tenant = tenants_module
            .tenants_repo()
            .get_by_id(tenant_id)
            .await
            .map_err(|e| {
                if e.is_row_not_found() {
                    TenantsServiceError::TenantNotFound
                } else {
                    TenantsServiceError::Repository(e)
                }
            })?;
        let admin = tenants_module
            .tenants_repo()
            .get_primary_admin(tenant_id)
            .await?
            .ok_or(TenantsServiceError::AdminNotFound)?;

        let token = generate_hex_token_csprng(32);
        let ttl_days = tenants_module.config().provisioning().setup_token_ttl_days;
        let event = NewAuditEvent::from_actor(
            &client_context.actor,
            client_context.ip,
            AuditEventType::SetupEmailResent,
            Some(tenant_id),
            Some(admin.id),
            json!({}),
        );
        tenants_module
            .tenants_repo()
            .insert_setup_token(
                tenant_id,
                admin.id,
                &token,
                Utc::now() + TimeDelta::days(ttl_days),
                Some(event),
            )
            .await?;

        let setup_url = format!(
            "https://{}/setup?token={}",
            tenants_module.config().server().hostname(),
            token
        );
        tenants_module
            .mailer()
            .send_templated(
                &admin.email,
                "Üdvözlünk a Tanoda rendszerében!",
                WELCOME_EMAIL_TEMPLATE,
                &json!({
                    "first_name": admin.first_name,
                    "last_name": admin.last_name,
                    "tenant_name": tenant.name,
                    "setup_url": setup_url,
                }),
            )
            .await
            .map_err(|e| TenantsServiceError::MailTransport(e.to_string()))?;
        Ok(())
    }

    /// Soft delete by default; force delete only removes tenants that own
    /// no users and no courses.
    pub async fn delete(
        client_context: &ClientContext,
        payload: &DeleteTenantRequest,
        tenants_module: Arc<dyn TenantsModule>,
    ) -> TenantsServiceResult<()> {
        let event = NewAuditEvent::from_actor(
            &client_context.actor,
            client_context.ip,
            AuditEventType::TenantDeleted,
            Some(payload.tenant_id),
            Some(payload.tenant_id),
            json!({ "force": payload.force }),
        );

        if payload.force {
            let deleted = tenants_module
                .tenants_repo()
                .force_delete(payload.tenant_id, event)
                .await?;
            if !deleted {
                return Err(TenantsServiceError::TenantNotEmpty);
            }
            tenants_module
                .pool_manager()
                .remove_tenant_pool(payload.tenant_id)?;
        } else {
            tenants_module
                .tenants_repo()
                .soft_delete(payload.tenant_id, event)
                .await
                .map_err(|e| {
                    if e.is_row_not_found() {
                        TenantsServiceError::TenantNotFound
                    } else {
                        TenantsServiceError::Repository(e)
                    }
                })?;
        }

        Self::refresh_active_gauge(&tenants_module).await;
        Ok(())
    }

    async fn refresh_active_gauge(tenants_module: &Arc<dyn TenantsModule>) {
        if let Ok(count) = tenants_module.tenants_repo().count_active().await {
            tenants_module
                .metrics()
                .gauge(TENANTS_ACTIVE)
                .set(count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::{AppConfig, RateLimitConfig};
    use crate::metrics::MetricsRegistry;
    use crate::provisioning::model::TenantProvisioning;
    use crate::ratelimit::RateLimiter;
    use crate::ratelimit::repository::MockRateLimitRepository;
    use crate::tenants::dto::CreateTenantHelper;
    use crate::tenants::model::{SubscriptionTier, Tenant};
    use crate::tenants::repository::{MockTenantsRepository, TenantsRepository};
    use crate::tenants::tests::MockTenantsModule;
    use pretty_assertions::assert_eq;

    fn request() -> CreateTenantRequest {
        CreateTenantRequest::try_from(CreateTenantHelper {
            name: String::from("Acme"),
            domain: String::from("acme"),
            tier: String::from("professional"),
            admin_email: String::from("a@acme.x"),
            admin_first_name: String::from("Anna"),
            admin_last_name: String::from("Kovács"),
            admin_password: String::from("nagyon-titkos-jelszo"),
        })
        .unwrap()
    }

    fn professional_tier() -> SubscriptionTier {
        SubscriptionTier {
            id: Uuid::new_v4(),
            name: String::from("professional"),
            level: 3,
            storage_quota_bytes: 107_374_182_400,
            max_users: 10_000,
            max_courses: 1_000,
            dedicated_database: false,
            custom_domain: true,
        }
    }

    fn pending_row(tenant_id: Uuid) -> TenantProvisioning {
        TenantProvisioning {
            id: Uuid::new_v4(),
            tenant_id,
            status: String::from("pending"),
            progress_percentage: 0,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            error_message: None,
        }
    }

    fn tenant_row() -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            name: String::from("Acme"),
            domain: String::from("acme"),
            tier: String::from("professional"),
            db_handle: None,
            db_host: None,
            db_port: None,
            db_user: None,
            db_password: None,
            storage_quota_bytes: 0,
            storage_used_bytes: 0,
            file_count: 0,
            user_count: 0,
            course_count: 0,
            active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn limiter_with(limit_state: Vec<i64>) -> Arc<RateLimiter> {
        let mut repo = MockRateLimitRepository::new();
        let mut counts = limit_state.into_iter();
        repo.expect_increment()
            .returning(move |_, _, _, _| Ok(counts.next().unwrap_or(1)));
        Arc::new(RateLimiter::new(
            Arc::new(repo),
            RateLimitConfig::default(),
            Arc::new(MetricsRegistry::new()),
        ))
    }

    fn module_with(
        repo: MockTenantsRepository,
        limiter: Arc<RateLimiter>,
    ) -> (Arc<MockTenantsModule>, Arc<MetricsRegistry>) {
        let mut module = MockTenantsModule::new();
        let repo: Arc<dyn TenantsRepository> = Arc::new(repo);
        module.expect_tenants_repo().returning(move || repo.clone());
        module.expect_rate_limiter().returning(move || limiter.clone());
        let metrics = Arc::new(MetricsRegistry::new());
        let shared = metrics.clone();
        module.expect_metrics().returning(move || shared.clone());
        let config = Arc::new(AppConfig::default());
        module.expect_config().returning(move || config.clone());
        module.expect_provisioning_module().returning(|| {
            let mut provisioning = crate::provisioning::tests::MockProvisioningModule::new();
            // the spawned run is not under test here
            provisioning
                .expect_config()
                .returning(|| Arc::new(AppConfig::default()));
            let repo: Arc<dyn TenantsRepository> = {
                let mut inner = MockTenantsRepository::new();
                inner.expect_get_tier_by_name().returning(|_| Ok(None));
                inner
                    .expect_complete_provisioning()
                    .returning(|id, status, error| {
                        let mut row = pending_row(Uuid::new_v4());
                        row.id = id;
                        row.status = status.as_str().to_string();
                        row.error_message = error;
                        Ok(row)
                    });
                Arc::new(inner)
            };
            provisioning
                .expect_tenants_repo()
                .returning(move || repo.clone());
            provisioning
                .expect_metrics()
                .returning(|| Arc::new(MetricsRegistry::new()));
            provisioning
                .expect_progress_hub()
                .returning(crate::progress::ProgressHub::new);
            provisioning.expect_bus().returning(|| {
                Arc::new(crate::bus::InMemoryEventBus::new(1))
            });
            Arc::new(provisioning)
        });
        (Arc::new(module), metrics)
    }

    #[tokio::test]
    async fn create_returns_pending_ids_immediately() {
        let mut repo = MockTenantsRepository::new();
        let tier = professional_tier();
        repo.expect_get_tier_by_name()
            .returning(move |_| Ok(Some(tier.clone())));
        repo.expect_create_with_provisioning()
            .times(1)
            .withf(|name, domain, tier, event| {
                name == "Acme"
                    && domain == "acme"
                    && tier == "professional"
                    && event.event_type == AuditEventType::TenantCreated
            })
            .returning(|_, _, _, _| {
                let tenant = tenant_row();
                let provisioning = pending_row(tenant.id);
                Ok((tenant, provisioning))
            });
        repo.expect_count_active().returning(|| Ok(1));

        let (module, _) = module_with(repo, limiter_with(vec![1]));
        let response =
            TenantsService::try_create(&ClientContext::test_default(), request(), module)
                .await
                .unwrap();

        assert_eq!(response.status, "pending");
    }

    #[tokio::test]
    async fn create_is_rate_limited_per_ip() {
        let repo = MockTenantsRepository::new();
        // the sixth heavy call in the window
        let (module, _) = module_with(repo, limiter_with(vec![6]));

        let result =
            TenantsService::try_create(&ClientContext::test_default(), request(), module).await;

        match result {
            Err(TenantsServiceError::TooManyAttempts(retry_after)) => {
                assert!(retry_after > 0)
            }
            other => panic!("expected rate limit rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn duplicate_domain_is_a_conflict() {
        let mut repo = MockTenantsRepository::new();
        let tier = professional_tier();
        repo.expect_get_tier_by_name()
            .returning(move |_| Ok(Some(tier.clone())));
        repo.expect_create_with_provisioning().returning(|_, _, _, _| {
            Err(RepositoryError::Database(sqlx::Error::RowNotFound))
        });

        let (module, _) = module_with(repo, limiter_with(vec![1]));
        let result =
            TenantsService::try_create(&ClientContext::test_default(), request(), module).await;

        // RowNotFound is not a unique violation: it surfaces as internal
        assert!(matches!(result, Err(TenantsServiceError::Repository(_))));
    }

    #[tokio::test]
    async fn consume_setup_token_rejects_unknown_tokens() {
        let mut repo = MockTenantsRepository::new();
        repo.expect_consume_setup_token()
            .times(1)
            .returning(|_, _| Ok(None));

        let (module, _) = module_with(repo, limiter_with(vec![]));
        let result = TenantsService::consume_setup_token(
            &ClientContext::test_default(),
            "deadbeef",
            module,
        )
        .await;

        assert!(matches!(
            result,
            Err(TenantsServiceError::InvalidSetupToken)
        ));
    }
}
