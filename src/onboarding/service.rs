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
use crate::bus::TOPIC_ONBOARDING_JOBS;
use crate::common::{ConfigProvider, TemplatedMailer};
use crate::common::dto::GeneralError;
use crate::common::error::{FriendlyError, IntoFriendlyError, RepositoryError};
use crate::common::extractors::ClientContext;
use crate::onboarding::OnboardingModule;
use crate::onboarding::csv::{CsvIngestError, RosterCsvIngestor};
use crate::onboarding::dto::{
    CreateJobRequest, CreatedJobResponse, PublicJob, UploadReport,
};
use crate::onboarding::model::{JobSource, JobStatus, OnboardingTask};
use crate::onboarding::worker::OnboardingWorker;
use crate::ratelimit::RateLimitAction;
use axum::http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::Level;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum OnboardingServiceError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Túl sok próbálkozás! Próbáld újra {0} másodperc múlva.")]
    TooManyAttempts(u64),

    #[error("A megadott feladat nem található")]
    JobNotFound,

    #[error("A feladathoz már történt feltöltés")]
    UploadConflict,

    #[error("Ismeretlen forrás: {0}")]
    InvalidSource(String),

    #[error("A fájl mérete meghaladja a megengedett {0} bájtot")]
    FileTooLarge(u64),

    #[error(transparent)]
    CsvIngest(#[from] CsvIngestError),

    #[error("Bus error: {0}")]
    Bus(String),
}

#[async_trait::async_trait]
impl IntoFriendlyError<GeneralError> for OnboardingServiceError {
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
            Self::JobNotFound => {
                FriendlyError::user_facing(Level::DEBUG, StatusCode::NOT_FOUND, file!(), body)
            }
            Self::UploadConflict => {
                FriendlyError::user_facing(Level::DEBUG, StatusCode::CONFLICT, file!(), body)
            }
            Self::InvalidSource(_) | Self::CsvIngest(_) => FriendlyError::user_facing(
                Level::DEBUG,
                StatusCode::UNPROCESSABLE_ENTITY,
                file!(),
                body,
            ),
            Self::FileTooLarge(_) => FriendlyError::user_facing(
                Level::DEBUG,
                StatusCode::PAYLOAD_TOO_LARGE,
                file!(),
                body,
            ),
            _ => FriendlyError::internal_with_admin_notify(file!(), body, mailer).await,
        }
    }
}

/// Keys messages of one job to one partition: tasks of a single job route
/// consistently.
pub(crate) fn job_routing_key(tenant_id: Uuid, job_id: Uuid) -> String {
    format!("{}{}", tenant_id.simple(), job_id.simple())
}

pub struct OnboardingService;

type OnboardingServiceResult<T> = Result<T, OnboardingServiceError>;

impl OnboardingService {
    pub async fn create_job(
        client_context: &ClientContext,
        payload: &CreateJobRequest,
        onboarding_module: Arc<dyn OnboardingModule>,
    ) -> OnboardingServiceResult<CreatedJobResponse> {
        let source: JobSource = payload
            .source
            .parse()
            .map_err(|_| OnboardingServiceError::InvalidSource(payload.source.clone()))?;

        let event = NewAuditEvent::from_actor(
            &client_context.actor,
            client_context.ip,
            AuditEventType::BulkJobCreated,
            Some(payload.tenant_id),
            None,
            json!({ "source": source.as_str() }),
        );
        let job = onboarding_module
            .jobs_repo()
            .insert_job(payload.tenant_id, source, event)
            .await?;

        Ok(CreatedJobResponse {
            job_id: job.id,
            status: job.status,
        })
    }

    /// Ingests and validates the roster, materializes tasks and fans them
    /// out through the bus. Only validation and materialization happen
    /// here; task processing continues asynchronously on the workers.
    pub async fn upload_csv(
        client_context: &ClientContext,
        job_id: Uuid,
        bytes: &[u8],
        onboarding_module: Arc<dyn OnboardingModule>,
    ) -> OnboardingServiceResult<UploadReport> {
        let decision = onboarding_module
            .rate_limiter()
            .allow(&client_context.ip.to_string(), RateLimitAction::BulkUpload)
            .await;
        if !decision.allowed {
            return Err(OnboardingServiceError::TooManyAttempts(
                decision.retry_after.as_secs().max(1),
            ));
        }

        let config = onboarding_module.config();
        if bytes.len() as u64 > config.onboarding().max_csv_bytes {
            return Err(OnboardingServiceError::FileTooLarge(
                config.onboarding().max_csv_bytes,
            ));
        }

        let job = onboarding_module
            .jobs_repo()
            .get_job(job_id)
            .await?
            .ok_or(OnboardingServiceError::JobNotFound)?;
        if job.status != JobStatus::Pending.as_str() {
            return Err(OnboardingServiceError::UploadConflict);
        }

        let report = RosterCsvIngestor::ingest(bytes, config.onboarding().max_csv_rows)?;

        let tasks = onboarding_module
            .jobs_repo()
            .materialize(job.id, job.tenant_id, report.accepted.clone())
            .await?;
        let running = onboarding_module.jobs_repo().mark_job_running(job.id).await?;

        Self::fan_out(&onboarding_module, &running.tenant_id, job.id, &tasks).await?;

        if tasks.is_empty() {
            // nothing to process: the job is terminal right away
            if let Some(finalized) = onboarding_module.jobs_repo().finalize_job(job.id).await? {
                OnboardingWorker::broadcast_completion(&onboarding_module, &finalized).await;
            }
        }

        Ok(UploadReport {
            accepted_count: report.accepted.len(),
            rejected_rows: report.rejected,
        })
    }

    async fn fan_out(
        onboarding_module: &Arc<dyn OnboardingModule>,
        tenant_id: &Uuid,
        job_id: Uuid,
        tasks: &[OnboardingTask],
    ) -> OnboardingServiceResult<()> {
        let key = job_routing_key(*tenant_id, job_id);
        for task in tasks {
            onboarding_module
                .bus()
                .publish_with_retry(
                    TOPIC_ONBOARDING_JOBS,
                    &key,
                    json!({
                        "task_id": task.id,
                        "job_id": job_id,
                        "tenant_id": tenant_id,
                    }),
                    5,
                )
                .await
                .map_err(|e| OnboardingServiceError::Bus(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn job_status(
        job_id: Uuid,
        onboarding_module: Arc<dyn OnboardingModule>,
    ) -> OnboardingServiceResult<PublicJob> {
        let job = onboarding_module
            .jobs_repo()
            .get_job(job_id)
            .await?
            .ok_or(OnboardingServiceError::JobNotFound)?;
        Ok(PublicJob::from(job))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::{AppConfig, RateLimitConfig};
    use crate::bus::{BusConsumer, EventBus, InMemoryEventBus};
    use crate::metrics::MetricsRegistry;
    use crate::onboarding::model::BulkJob;
    use crate::onboarding::repository::{JobsRepository, MockJobsRepository};
    use crate::onboarding::tests::MockOnboardingModule;
    use crate::ratelimit::RateLimiter;
    use crate::ratelimit::repository::MockRateLimitRepository;
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn pending_job(tenant_id: Uuid) -> BulkJob {
        BulkJob {
            id: Uuid::new_v4(),
            tenant_id,
            source: String::from("csv"),
            total_tasks: 0,
            completed_tasks: 0,
            failed_tasks: 0,
            status: String::from("pending"),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn task_row(job_id: Uuid, tenant_id: Uuid, email: &str) -> OnboardingTask {
        OnboardingTask {
            id: Uuid::new_v4(),
            job_id,
            tenant_id,
            email: email.to_string(),
            payload: json!({}),
            status: String::from("pending"),
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn permissive_limiter() -> Arc<RateLimiter> {
        let mut repo = MockRateLimitRepository::new();
        repo.expect_increment().returning(|_, _, _, _| Ok(1));
        Arc::new(RateLimiter::new(
            Arc::new(repo),
            RateLimitConfig::default(),
            Arc::new(MetricsRegistry::new()),
        ))
    }

    fn module_with(
        jobs_repo: MockJobsRepository,
        bus: InMemoryEventBus,
    ) -> Arc<MockOnboardingModule> {
        let mut module = MockOnboardingModule::new();
        let repo: Arc<dyn JobsRepository> = Arc::new(jobs_repo);
        module.expect_jobs_repo().returning(move || repo.clone());
        module
            .expect_bus()
            .returning(move || Arc::new(bus.clone()));
        let limiter = permissive_limiter();
        module
            .expect_rate_limiter()
            .returning(move || limiter.clone());
        let config = Arc::new(AppConfig::default());
        module.expect_config().returning(move || config.clone());
        Arc::new(module)
    }

    #[tokio::test]
    async fn upload_accepts_valid_rows_and_reports_rejects() {
        let tenant_id = Uuid::new_v4();
        let job = pending_job(tenant_id);
        let job_id = job.id;

        let mut csv = String::from("email,first_name,last_name,role\n");
        for i in 0..8 {
            csv.push_str(&format!("user{i}@example.com,A,B,student\n"));
        }
        csv.push_str("broken,A,B,student\n");
        csv.push_str("also-broken,A,B,student\n");

        let mut jobs_repo = MockJobsRepository::new();
        let probe = job.clone();
        jobs_repo
            .expect_get_job()
            .returning(move |_| Ok(Some(probe.clone())));
        jobs_repo
            .expect_materialize()
            .times(1)
            .withf(|_, _, rows| rows.len() == 8)
            .returning(move |job_id, tenant_id, rows| {
                Ok(rows
                    .iter()
                    .map(|row| task_row(job_id, tenant_id, &row.email))
                    .collect())
            });
        jobs_repo
            .expect_mark_job_running()
            .times(1)
            .returning(move |id| {
                let mut running = pending_job(tenant_id);
                running.id = id;
                running.status = String::from("running");
                running.total_tasks = 8;
                Ok(running)
            });

        let bus = InMemoryEventBus::new(3);
        let module = module_with(jobs_repo, bus.clone());

        let report = OnboardingService::upload_csv(
            &ClientContext::test_default(),
            job_id,
            csv.as_bytes(),
            module,
        )
        .await
        .unwrap();

        assert_eq!(report.accepted_count, 8);
        assert_eq!(report.rejected_rows.len(), 2);
        assert_eq!(report.rejected_rows[0].index, 9);

        // one bus message per accepted task, all on the same key
        let mut consumer = bus
            .subscribe(TOPIC_ONBOARDING_JOBS, "probe")
            .await
            .unwrap();
        let mut keys = std::collections::HashSet::new();
        for _ in 0..8 {
            let message = consumer.poll().await.unwrap();
            keys.insert(message.key.clone());
            bus.commit("probe", &message).await.unwrap();
        }
        assert_eq!(keys.len(), 1);
    }

    #[tokio::test]
    async fn upload_rejects_oversized_files_before_parsing() {
        let mut config = AppConfig::default();
        config.onboarding_mut().max_csv_bytes = 16;

        let mut module = MockOnboardingModule::new();
        let limiter = permissive_limiter();
        module
            .expect_rate_limiter()
            .returning(move || limiter.clone());
        let config = Arc::new(config);
        module.expect_config().returning(move || config.clone());

        let result = OnboardingService::upload_csv(
            &ClientContext::test_default(),
            Uuid::new_v4(),
            b"email,first_name,last_name,role\n",
            Arc::new(module),
        )
        .await;

        assert!(matches!(
            result,
            Err(OnboardingServiceError::FileTooLarge(16))
        ));
    }

    #[tokio::test]
    async fn upload_requires_a_pending_job() {
        let tenant_id = Uuid::new_v4();
        let mut job = pending_job(tenant_id);
        job.status = String::from("running");

        let mut jobs_repo = MockJobsRepository::new();
        let probe = job.clone();
        jobs_repo
            .expect_get_job()
            .returning(move |_| Ok(Some(probe.clone())));

        let module = module_with(jobs_repo, InMemoryEventBus::new(1));
        let result = OnboardingService::upload_csv(
            &ClientContext::test_default(),
            job.id,
            b"email,first_name,last_name,role\n",
            module,
        )
        .await;

        assert!(matches!(
            result,
            Err(OnboardingServiceError::UploadConflict)
        ));
    }

    #[tokio::test]
    async fn create_job_validates_the_source() {
        let module = MockOnboardingModule::new();
        let result = OnboardingService::create_job(
            &ClientContext::test_default(),
            &CreateJobRequest {
                tenant_id: Uuid::new_v4(),
                source: String::from("fax"),
            },
            Arc::new(module),
        )
        .await;

        assert!(matches!(
            result,
            Err(OnboardingServiceError::InvalidSource(_))
        ));
    }
}
