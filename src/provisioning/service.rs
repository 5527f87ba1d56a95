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
use crate::bus::{EventBus, TOPIC_ONBOARDING_PROGRESS};
use crate::clients::NewIdentityUser;
use crate::common::ConfigProvider;
use crate::common::services::{generate_hex_token_csprng, generate_string_csprng};
use crate::metrics::{
    PROVISIONING_DURATION_SECONDS, PROVISIONING_ERRORS_TOTAL, PROVISIONING_TOTAL,
};
use crate::progress::ProgressEvent;
use crate::provisioning::ProvisioningModule;
use crate::provisioning::model::ProvisioningStatus;
use crate::quota::QuotaService;
use crate::tenants::model::{SubscriptionTier, Tenant};
use chrono::{TimeDelta, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const WELCOME_EMAIL_TEMPLATE: &str = r##"
<p style="font-weight: bold; margin-bottom: 25px;">
    Kedves {{last_name}} {{first_name}}!
</p>
<p>
    A(z) <b>{{tenant_name}}</b> szervezet fiókja elkészült. A következő
    hivatkozásra kattintva állíthatod be a belépési adataidat:<br>
    <a href="{{setup_url}}">{{setup_url}}</a>
</p>
<p>
    A hivatkozás 7 napig érvényes és csak egyszer használható fel.
</p>
"##;

/// The administrator details carried from the create request into the
/// asynchronous provisioning run.
#[derive(Debug, Clone)]
pub struct AdminSpec {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
}

/// A stage failure of the provisioning workflow, mapped one-to-one onto
/// the error-kind counter labels.
#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("tenant store failure: {0}")]
    Store(String),

    #[error("database provisioning failed: {0}")]
    DatabaseProvisioning(String),

    #[error("admin creation failed: {0}")]
    AdminCreation(String),

    #[error("setup token issuance failed: {0}")]
    SetupToken(String),
}

impl ProvisioningError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "create_tenant_failed",
            Self::DatabaseProvisioning(_) => "database_provisioning_failed",
            Self::AdminCreation(_) => "admin_creation_failed",
            Self::SetupToken(_) => "setup_token_failed",
        }
    }
}

/// Staged state machine driving a tenant from `pending` to a terminal
/// state under the configured wall-clock deadline.
///
/// Partial effects (a created identity user, a sent email) are not rolled
/// back on failure; compensation is an operator task.
pub struct ProvisioningService;

impl ProvisioningService {
    /// Runs the whole workflow for one tenant. Spawned as its own task
    /// right after the pending records are committed.
    pub async fn run(
        module: Arc<dyn ProvisioningModule>,
        tenant: Tenant,
        provisioning_id: Uuid,
        admin: AdminSpec,
    ) {
        let deadline = module.config().provisioning().deadline();
        let started = Instant::now();

        let outcome = tokio::time::timeout(
            deadline,
            Self::drive(module.clone(), &tenant, provisioning_id, &admin),
        )
        .await;

        let metrics = module.metrics();
        metrics
            .histogram(PROVISIONING_DURATION_SECONDS)
            .record(started.elapsed());

        match outcome {
            Ok(Ok(email_note)) => {
                if let Some(note) = &email_note {
                    // the tenant is usable, the welcome link can be
                    // re-issued, so an email failure still completes
                    metrics
                        .counter_with(PROVISIONING_ERRORS_TOTAL, &[("error_kind", "email_send_failed")])
                        .inc();
                    warn!(%provisioning_id, "provisioning completed with email failure: {note}");
                }
                metrics
                    .counter_with(PROVISIONING_TOTAL, &[("status", "completed")])
                    .inc();
                Self::finish(
                    module,
                    &tenant,
                    provisioning_id,
                    ProvisioningStatus::Completed,
                    email_note.as_deref(),
                )
                .await;
                info!(%provisioning_id, tenant_id = %tenant.id, "tenant provisioning completed");
            }
            Ok(Err(stage_error)) => {
                metrics
                    .counter_with(PROVISIONING_ERRORS_TOTAL, &[("error_kind", stage_error.kind())])
                    .inc();
                metrics
                    .counter_with(PROVISIONING_TOTAL, &[("status", "failed")])
                    .inc();
                error!(%provisioning_id, "tenant provisioning failed: {stage_error}");
                Self::finish(
                    module,
                    &tenant,
                    provisioning_id,
                    ProvisioningStatus::Failed,
                    Some(&stage_error.to_string()),
                )
                .await;
            }
            Err(_elapsed) => {
                // pending steps are abandoned; partial effects stay
                metrics
                    .counter_with(PROVISIONING_ERRORS_TOTAL, &[("error_kind", "timeout_exceeded")])
                    .inc();
                metrics
                    .counter_with(PROVISIONING_TOTAL, &[("status", "failed")])
                    .inc();
                error!(%provisioning_id, "tenant provisioning exceeded its deadline");
                Self::finish(
                    module,
                    &tenant,
                    provisioning_id,
                    ProvisioningStatus::Failed,
                    Some("timeout_exceeded"),
                )
                .await;
            }
        }
    }

    /// The stage sequence. Returns the optional email-failure note of the
    /// final stage; any earlier failure aborts the run.
    async fn drive(
        module: Arc<dyn ProvisioningModule>,
        tenant: &Tenant,
        provisioning_id: Uuid,
        admin: &AdminSpec,
    ) -> Result<Option<String>, ProvisioningError> {
        let tier = module
            .tenants_repo()
            .get_tier_by_name(&tenant.tier)
            .await
            .map_err(|e| ProvisioningError::Store(e.to_string()))?
            .ok_or_else(|| {
                ProvisioningError::Store(format!("unknown tier: {}", tenant.tier))
            })?;

        if tier.dedicated_database {
            Self::advance(&module, tenant, provisioning_id, ProvisioningStatus::ProvisioningDb)
                .await?;
            Self::provision_database(&module, tenant).await?;
        }

        Self::advance(&module, tenant, provisioning_id, ProvisioningStatus::CreatingAdmin)
            .await?;
        let identity_user_id = module
            .identity_client()
            .create_user(&NewIdentityUser {
                tenant_id: tenant.id,
                email: admin.email.clone(),
                first_name: admin.first_name.clone(),
                last_name: admin.last_name.clone(),
                role: String::from("admin"),
                password: Some(admin.password.clone()),
            })
            .await
            .map_err(|e| ProvisioningError::AdminCreation(e.to_string()))?;
        let admin_row = module
            .tenants_repo()
            .insert_admin(
                tenant.id,
                identity_user_id,
                &admin.email,
                &admin.first_name,
                &admin.last_name,
                true,
            )
            .await
            .map_err(|e| ProvisioningError::AdminCreation(e.to_string()))?;

        Self::advance(&module, tenant, provisioning_id, ProvisioningStatus::SettingQuota)
            .await?;
        let updated = module
            .tenants_repo()
            .set_quota(tenant.id, tier.storage_quota_bytes)
            .await
            .map_err(|e| ProvisioningError::Store(e.to_string()))?;
        QuotaService::refresh_gauges(&module.metrics(), &updated);

        Self::advance(&module, tenant, provisioning_id, ProvisioningStatus::SendingEmail)
            .await?;
        let email_note = Self::send_welcome_email(&module, tenant, admin_row.id, admin).await?;

        Ok(email_note)
    }

    async fn provision_database(
        module: &Arc<dyn ProvisioningModule>,
        tenant: &Tenant,
    ) -> Result<(), ProvisioningError> {
        let defaults = module.config();
        let handle = format!("tenant_{}", tenant.id.simple());
        let db_config = BasicDatabaseConfig {
            host: defaults.default_tenant_database().host.clone(),
            port: defaults.default_tenant_database().port,
            username: handle.clone(),
            password: generate_string_csprng(40),
            database: handle,
            max_pool_size: None,
            ssl_mode: Some(String::from("disable")),
        };

        module
            .tenants_repo()
            .allocate_dedicated_database(&db_config)
            .await
            .map_err(|e| ProvisioningError::DatabaseProvisioning(e.to_string()))?;
        module
            .tenants_repo()
            .set_db_handle(tenant.id, &db_config)
            .await
            .map_err(|e| ProvisioningError::Store(e.to_string()))?;
        module
            .pool_manager()
            .add_tenant_pool(tenant.id, &db_config)
            .await
            .map_err(|e| ProvisioningError::DatabaseProvisioning(e.to_string()))?;
        module
            .migrator()
            .migrate_tenant_db(tenant.id)
            .await
            .map_err(|e| ProvisioningError::DatabaseProvisioning(e.to_string()))?;
        Ok(())
    }

    /// Issues the single-use setup token and sends the welcome email.
    ///
    /// An email failure after every preceding stage succeeded does not
    /// fail the run: the note is recorded on the otherwise completed
    /// record instead.
    async fn send_welcome_email(
        module: &Arc<dyn ProvisioningModule>,
        tenant: &Tenant,
        admin_id: Uuid,
        admin: &AdminSpec,
    ) -> Result<Option<String>, ProvisioningError> {
        let token = generate_hex_token_csprng(32);
        let ttl_days = module.config().provisioning().setup_token_ttl_days;
        let expires_at = Utc::now() + TimeDelta::days(ttl_days);

        module
            .tenants_repo()
            .insert_setup_token(tenant.id, admin_id, &token, expires_at, None)
            .await
            .map_err(|e| ProvisioningError::SetupToken(e.to_string()))?;

        let setup_url = format!(
            "https://{}/setup?token={}",
            module.config().server().hostname(),
            token
        );

        match module
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
        {
            Ok(()) => Ok(None),
            Err(e) => Ok(Some(format!("email_send_failed: {e}"))),
        }
    }

    async fn advance(
        module: &Arc<dyn ProvisioningModule>,
        tenant: &Tenant,
        provisioning_id: Uuid,
        status: ProvisioningStatus,
    ) -> Result<(), ProvisioningError> {
        module
            .tenants_repo()
            .advance_provisioning(provisioning_id, status)
            .await
            .map_err(|e| ProvisioningError::Store(e.to_string()))?;
        Self::emit_progress(module, tenant.id, provisioning_id, status, None).await;
        Ok(())
    }

    /// Progress goes to both the hub (live subscribers) and the bus
    /// (downstream consumers) after every transition.
    async fn emit_progress(
        module: &Arc<dyn ProvisioningModule>,
        tenant_id: Uuid,
        provisioning_id: Uuid,
        status: ProvisioningStatus,
        error_message: Option<&str>,
    ) {
        let event = match (status, error_message) {
            (ProvisioningStatus::Completed, _) => ProgressEvent::Completion {
                status: status.as_str().to_string(),
            },
            (ProvisioningStatus::Failed, message) => ProgressEvent::Error {
                message: message.unwrap_or("failed").to_string(),
            },
            (stage, _) => ProgressEvent::Progress {
                completed: 0,
                failed: 0,
                total: 0,
                percent: stage.progress() as u8,
            },
        };
        module.progress_hub().broadcast(provisioning_id, event);

        if let Err(e) = module
            .bus()
            .publish_with_retry(
                TOPIC_ONBOARDING_PROGRESS,
                &provisioning_id.to_string(),
                json!({
                    "provisioning_id": provisioning_id,
                    "tenant_id": tenant_id,
                    "status": status.as_str(),
                    "percent": status.progress(),
                    "error_message": error_message,
                }),
                3,
            )
            .await
        {
            warn!(%provisioning_id, "provisioning progress not shipped to bus: {e}");
        }
    }

    async fn finish(
        module: Arc<dyn ProvisioningModule>,
        tenant: &Tenant,
        provisioning_id: Uuid,
        status: ProvisioningStatus,
        error_message: Option<&str>,
    ) {
        if let Err(e) = module
            .tenants_repo()
            .complete_provisioning(provisioning_id, status, error_message.map(|m| m.to_string()))
            .await
        {
            error!(%provisioning_id, "could not persist terminal provisioning state: {e}");
        }
        Self::emit_progress(&module, tenant.id, provisioning_id, status, error_message).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::AppConfig;
    use crate::app::database::{MockDatabaseMigrator, MockPoolManager};
    use crate::bus::InMemoryEventBus;
    use crate::clients::{DependencyError, IdentityClient, MockIdentityClient};
    use crate::common::MockTemplatedMailer;
    use crate::metrics::MetricsRegistry;
    use crate::progress::ProgressHub;
    use crate::provisioning::model::TenantProvisioning;
    use crate::provisioning::tests::MockProvisioningModule;
    use crate::tenants::repository::MockTenantsRepository;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    fn tenant(tier: &str) -> Tenant {
        Tenant {
            id: Uuid::new_v4(),
            name: String::from("Acme"),
            domain: String::from("acme"),
            tier: tier.to_string(),
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

    fn provisioning_row(provisioning_id: Uuid, tenant_id: Uuid) -> TenantProvisioning {
        TenantProvisioning {
            id: provisioning_id,
            tenant_id,
            status: String::from("pending"),
            progress_percentage: 0,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            error_message: None,
        }
    }

    fn admin_spec() -> AdminSpec {
        AdminSpec {
            email: String::from("a@acme.x"),
            first_name: String::from("Anna"),
            last_name: String::from("Kovács"),
            password: String::from("nagyon-titkos-jelszo"),
        }
    }

    struct ModuleParts {
        repo: MockTenantsRepository,
        identity: MockIdentityClient,
        mailer: MockTemplatedMailer,
        metrics: Arc<MetricsRegistry>,
        config: Arc<AppConfig>,
    }

    impl ModuleParts {
        fn new() -> Self {
            Self {
                repo: MockTenantsRepository::new(),
                identity: MockIdentityClient::new(),
                mailer: MockTemplatedMailer::new(),
                metrics: Arc::new(MetricsRegistry::new()),
                config: Arc::new(AppConfig::default()),
            }
        }

        fn assemble(self) -> Arc<MockProvisioningModule> {
            let mut module = MockProvisioningModule::new();
            let repo: Arc<dyn crate::tenants::repository::TenantsRepository> =
                Arc::new(self.repo);
            module.expect_tenants_repo().returning(move || repo.clone());
            let identity: Arc<dyn IdentityClient> = Arc::new(self.identity);
            module
                .expect_identity_client()
                .returning(move || identity.clone());
            let mailer: Arc<dyn crate::common::TemplatedMailer> = Arc::new(self.mailer);
            module.expect_mailer().returning(move || mailer.clone());
            let metrics = self.metrics;
            module.expect_metrics().returning(move || metrics.clone());
            let config = self.config;
            module.expect_config().returning(move || config.clone());
            let hub = ProgressHub::new();
            module.expect_progress_hub().returning(move || hub.clone());
            let bus = InMemoryEventBus::new(3);
            module
                .expect_bus()
                .returning(move || Arc::new(bus.clone()));
            let pool_manager: Arc<dyn crate::app::database::PoolManager> =
                Arc::new(MockPoolManager::new());
            module
                .expect_pool_manager()
                .returning(move || pool_manager.clone());
            let migrator: Arc<dyn crate::app::database::DatabaseMigrator> =
                Arc::new(MockDatabaseMigrator::new());
            module.expect_migrator().returning(move || migrator.clone());
            Arc::new(module)
        }
    }

    fn expect_happy_stages(parts: &mut ModuleParts, tenant_id: Uuid, provisioning_id: Uuid) {
        let tier = professional_tier();
        parts
            .repo
            .expect_get_tier_by_name()
            .returning(move |_| Ok(Some(tier.clone())));
        parts
            .repo
            .expect_advance_provisioning()
            .returning(move |id, status| {
                let mut row = provisioning_row(id, tenant_id);
                row.status = status.as_str().to_string();
                row.progress_percentage = status.progress();
                Ok(row)
            });
        let identity_user_id = Uuid::new_v4();
        parts
            .identity
            .expect_create_user()
            .times(1)
            .returning(move |_| Ok(identity_user_id));
        parts
            .repo
            .expect_insert_admin()
            .times(1)
            .withf(|_, _, email, _, _, is_primary| email == "a@acme.x" && *is_primary)
            .returning(move |tenant_id, identity_user_id, email, first, last, is_primary| {
                Ok(crate::tenants::model::TenantAdmin {
                    id: Uuid::new_v4(),
                    tenant_id,
                    identity_user_id: Some(identity_user_id),
                    email: email.to_string(),
                    first_name: first.to_string(),
                    last_name: last.to_string(),
                    is_primary,
                    created_at: Utc::now(),
                })
            });
        parts
            .repo
            .expect_set_quota()
            .times(1)
            .withf(|_, quota| *quota == 107_374_182_400)
            .returning(move |id, quota| {
                let mut updated = tenant("professional");
                updated.id = id;
                updated.storage_quota_bytes = quota;
                Ok(updated)
            });
        parts
            .repo
            .expect_insert_setup_token()
            .times(1)
            .withf(|_, _, token, _, _| token.len() == 64)
            .returning(move |tenant_id, admin_id, token, expires_at, _| {
                Ok(crate::provisioning::model::SetupToken {
                    id: Uuid::new_v4(),
                    tenant_id,
                    admin_id,
                    token: token.to_string(),
                    expires_at,
                    used_at: None,
                    created_at: Utc::now(),
                })
            });
        let _ = provisioning_id;
    }

    #[tokio::test]
    async fn happy_path_completes_with_setup_link_in_the_email() {
        let tenant = tenant("professional");
        let provisioning_id = Uuid::new_v4();
        let mut parts = ModuleParts::new();
        expect_happy_stages(&mut parts, tenant.id, provisioning_id);

        let sent_urls: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let captured = sent_urls.clone();
        parts
            .mailer
            .expect_send_templated()
            .times(1)
            .withf(|to, _, _, _| to == "a@acme.x")
            .returning(move |_, _, _, data| {
                captured
                    .lock()
                    .unwrap()
                    .push(data["setup_url"].as_str().unwrap_or_default().to_string());
                Ok(())
            });
        parts
            .repo
            .expect_complete_provisioning()
            .times(1)
            .withf(|_, status, error| {
                *status == ProvisioningStatus::Completed && error.is_none()
            })
            .returning(move |id, status, _| {
                let mut row = provisioning_row(id, Uuid::new_v4());
                row.status = status.as_str().to_string();
                row.progress_percentage = 100;
                row.completed_at = Some(Utc::now());
                row.duration_seconds = Some(1);
                Ok(row)
            });

        let metrics = parts.metrics.clone();
        let module = parts.assemble();
        ProvisioningService::run(module, tenant, provisioning_id, admin_spec()).await;

        let urls = sent_urls.lock().unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].contains("/setup?token="));
        assert_eq!(
            metrics
                .counter_with(PROVISIONING_TOTAL, &[("status", "completed")])
                .get(),
            1
        );
        assert_eq!(metrics.histogram(PROVISIONING_DURATION_SECONDS).count(), 1);
    }

    #[tokio::test]
    async fn email_failure_still_completes_with_a_note() {
        let tenant = tenant("professional");
        let provisioning_id = Uuid::new_v4();
        let mut parts = ModuleParts::new();
        expect_happy_stages(&mut parts, tenant.id, provisioning_id);

        parts.mailer.expect_send_templated().times(1).returning(
            |_, _, _, _| {
                Err(DependencyError::Transport {
                    service: "email",
                    message: String::from("relay refused"),
                })
            },
        );
        parts
            .repo
            .expect_complete_provisioning()
            .times(1)
            .withf(|_, status, error| {
                *status == ProvisioningStatus::Completed
                    && error.as_deref().is_some_and(|e| e.contains("email"))
            })
            .returning(move |id, status, error| {
                let mut row = provisioning_row(id, Uuid::new_v4());
                row.status = status.as_str().to_string();
                row.progress_percentage = 100;
                row.completed_at = Some(Utc::now());
                row.duration_seconds = Some(1);
                row.error_message = error;
                Ok(row)
            });

        let metrics = parts.metrics.clone();
        let module = parts.assemble();
        ProvisioningService::run(module, tenant, provisioning_id, admin_spec()).await;

        assert_eq!(
            metrics
                .counter_with(PROVISIONING_ERRORS_TOTAL, &[("error_kind", "email_send_failed")])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .counter_with(PROVISIONING_TOTAL, &[("status", "completed")])
                .get(),
            1
        );
    }

    struct StallingIdentityClient;

    #[async_trait]
    impl IdentityClient for StallingIdentityClient {
        async fn create_user(&self, _user: &NewIdentityUser) -> Result<Uuid, DependencyError> {
            tokio::time::sleep(std::time::Duration::from_secs(200)).await;
            Ok(Uuid::new_v4())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_marks_the_record_failed_with_timeout_exceeded() {
        let tenant = tenant("professional");
        let tenant_id = tenant.id;
        let provisioning_id = Uuid::new_v4();

        let mut parts = ModuleParts::new();
        let tier = professional_tier();
        parts
            .repo
            .expect_get_tier_by_name()
            .returning(move |_| Ok(Some(tier.clone())));
        parts
            .repo
            .expect_advance_provisioning()
            .returning(move |id, status| {
                let mut row = provisioning_row(id, tenant_id);
                row.status = status.as_str().to_string();
                row.progress_percentage = status.progress();
                Ok(row)
            });
        parts
            .repo
            .expect_complete_provisioning()
            .times(1)
            .withf(|_, status, error| {
                *status == ProvisioningStatus::Failed
                    && error.as_deref() == Some("timeout_exceeded")
            })
            .returning(move |id, status, error| {
                let mut row = provisioning_row(id, tenant_id);
                row.status = status.as_str().to_string();
                row.progress_percentage = ProvisioningStatus::CreatingAdmin.progress();
                row.completed_at = Some(Utc::now());
                row.duration_seconds = Some(120);
                row.error_message = error;
                Ok(row)
            });

        let metrics = parts.metrics.clone();
        let mut module = MockProvisioningModule::new();
        let repo: Arc<dyn crate::tenants::repository::TenantsRepository> = Arc::new(parts.repo);
        module.expect_tenants_repo().returning(move || repo.clone());
        let identity: Arc<dyn IdentityClient> = Arc::new(StallingIdentityClient);
        module
            .expect_identity_client()
            .returning(move || identity.clone());
        let mailer: Arc<dyn crate::common::TemplatedMailer> = Arc::new(parts.mailer);
        module.expect_mailer().returning(move || mailer.clone());
        let engine_metrics = metrics.clone();
        module
            .expect_metrics()
            .returning(move || engine_metrics.clone());
        let config = parts.config.clone();
        module.expect_config().returning(move || config.clone());
        let hub = ProgressHub::new();
        module.expect_progress_hub().returning(move || hub.clone());
        let bus = InMemoryEventBus::new(3);
        module.expect_bus().returning(move || Arc::new(bus.clone()));

        ProvisioningService::run(Arc::new(module), tenant, provisioning_id, admin_spec())
            .await;

        assert_eq!(
            metrics
                .counter_with(PROVISIONING_ERRORS_TOTAL, &[("error_kind", "timeout_exceeded")])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .counter_with(PROVISIONING_TOTAL, &[("status", "failed")])
                .get(),
            1
        );
    }
}
