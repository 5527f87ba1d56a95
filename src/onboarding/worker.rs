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
use crate::bus::{BusMessage, EventBus, TOPIC_ONBOARDING_JOBS, TOPIC_ONBOARDING_PROGRESS};
use crate::clients::{DependencyError, NewIdentityUser};
use crate::common::ConfigProvider;
use crate::common::services::backoff_with_jitter;
use crate::metrics::{
    BUS_CONSUMER_LAG, ONBOARDING_EMAIL_FAILURES_TOTAL, ONBOARDING_TASK_DURATION_SECONDS,
    ONBOARDING_TASKS_PROCESSED_TOTAL,
};
use crate::onboarding::OnboardingModule;
use crate::onboarding::csv::RosterRow;
use crate::onboarding::model::{BulkJob, OnboardingTask};
use crate::onboarding::service::job_routing_key;
use crate::progress::ProgressEvent;
use crate::quota::{QuotaService, QuotaServiceError};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const CONSUMER_GROUP: &str = "onboarding-workers";

const WELCOME_USER_TEMPLATE: &str = r##"
<p style="font-weight: bold; margin-bottom: 25px;">
    Kedves {{last_name}} {{first_name}}!
</p>
<p>
    Fiókod elkészült a(z) <b>{{tenant_name}}</b> szervezetben. Az első
    belépéshez használd az e-mail címedet.
</p>
"##;

/// A per-task pipeline failure with the retry classification attached.
#[derive(Debug, Error)]
enum TaskError {
    #[error("{0}")]
    Dependency(#[from] DependencyError),

    #[error("{0}")]
    Permanent(String),
}

impl TaskError {
    fn is_retryable(&self) -> bool {
        match self {
            TaskError::Dependency(e) => e.is_retryable(),
            TaskError::Permanent(_) => false,
        }
    }
}

/// The consuming half of the onboarding pipeline.
///
/// Every worker joins the shared consumer group on the jobs topic and
/// processes its assigned partitions with bounded concurrency. Offsets are
/// committed only after the task row reached a terminal state, so a crash
/// redelivers the message and the idempotency gate makes the replay a
/// no-op.
pub struct OnboardingWorker;

impl OnboardingWorker {
    pub fn spawn_with_shutdown(
        onboarding_module: Arc<dyn OnboardingModule>,
        count: usize,
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        (0..count)
            .map(|worker_id| {
                let module = onboarding_module.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    Self::run(module, worker_id, shutdown).await;
                })
            })
            .collect()
    }

    async fn run(
        onboarding_module: Arc<dyn OnboardingModule>,
        worker_id: usize,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut consumer = match onboarding_module
            .bus()
            .subscribe(TOPIC_ONBOARDING_JOBS, CONSUMER_GROUP)
            .await
        {
            Ok(consumer) => consumer,
            Err(e) => {
                error!(worker_id, "onboarding worker could not subscribe: {e}");
                return;
            }
        };
        info!(worker_id, "onboarding worker started");

        let concurrency = onboarding_module
            .config()
            .onboarding()
            .worker_concurrency
            .max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));

        loop {
            tokio::select! {
                message = consumer.poll() => {
                    let Some(message) = message else { break };
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let module = onboarding_module.clone();
                    tokio::spawn(async move {
                        Self::handle_message(module, message).await;
                        drop(permit);
                    });
                }
                _ = shutdown.changed() => break,
            }
        }

        // drain in-flight tasks up to 30 seconds, then abandon them:
        // their offsets are uncommitted, so they get redelivered
        if tokio::time::timeout(
            Duration::from_secs(30),
            semaphore.acquire_many(concurrency as u32),
        )
        .await
        .is_err()
        {
            warn!(worker_id, "worker drain timed out, in-flight tasks will be redelivered");
        }
        info!(worker_id, "onboarding worker stopped");
    }

    /// Processes one delivered message end to end and commits its offset.
    pub(crate) async fn handle_message(
        onboarding_module: Arc<dyn OnboardingModule>,
        message: BusMessage,
    ) {
        onboarding_module.metrics().gauge(BUS_CONSUMER_LAG).set(
            onboarding_module
                .bus()
                .lag(TOPIC_ONBOARDING_JOBS, CONSUMER_GROUP) as f64,
        );

        let Some(task_id) = message.value["task_id"]
            .as_str()
            .and_then(|raw| Uuid::parse_str(raw).ok())
        else {
            warn!("dropping malformed onboarding message: {}", message.value);
            Self::commit(&onboarding_module, &message).await;
            return;
        };

        let claimed = match onboarding_module.jobs_repo().claim_task(task_id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                // leave the offset uncommitted, the message is redelivered
                error!(%task_id, "task claim failed: {e}");
                return;
            }
        };

        let Some(task) = claimed else {
            // replayed message for an already claimed or terminal task
            debug!(%task_id, "replay acknowledged with no effect");
            Self::commit(&onboarding_module, &message).await;
            return;
        };

        let started = Instant::now();
        let outcome = Self::process_task(&onboarding_module, &task).await;
        onboarding_module
            .metrics()
            .histogram(ONBOARDING_TASK_DURATION_SECONDS)
            .record(started.elapsed());

        match outcome {
            Ok(()) => Self::on_success(&onboarding_module, &task).await,
            Err(e) => Self::on_failure(&onboarding_module, &task, &message, e).await,
        }

        Self::commit(&onboarding_module, &message).await;
    }

    /// The per-user pipeline. Each step goes through the circuit breaker
    /// of the dependency it calls (the clients carry their breaker).
    async fn process_task(
        onboarding_module: &Arc<dyn OnboardingModule>,
        task: &OnboardingTask,
    ) -> Result<(), TaskError> {
        let row: RosterRow = serde_json::from_value(task.payload.clone())
            .map_err(|e| TaskError::Permanent(format!("invalid payload: {e}")))?;

        let identity_user_id = onboarding_module
            .identity_client()
            .create_user(&NewIdentityUser {
                tenant_id: task.tenant_id,
                email: row.email.clone(),
                first_name: row.first_name.clone(),
                last_name: row.last_name.clone(),
                role: row.role.as_str().to_string(),
                password: None,
            })
            .await?;

        if row.role.is_enrollable() && !row.course_codes.is_empty() {
            onboarding_module
                .enrollment_client()
                .enroll_in_courses(task.tenant_id, identity_user_id, &row.course_codes)
                .await?;
        }

        let storage_bytes = onboarding_module
            .config()
            .onboarding()
            .storage_bytes_for_role(&row.role);
        QuotaService::reserve(
            onboarding_module.tenants_repo(),
            onboarding_module.metrics(),
            task.tenant_id,
            storage_bytes,
            0,
            None,
        )
        .await
        .map_err(|e| match e {
            QuotaServiceError::Repository(inner) => {
                TaskError::Dependency(DependencyError::Transport {
                    service: "store",
                    message: inner.to_string(),
                })
            }
            other => TaskError::Permanent(other.to_string()),
        })?;

        onboarding_module
            .storage_client()
            .provision_user_storage(task.tenant_id, identity_user_id, storage_bytes)
            .await?;

        // a failed welcome email never fails the task
        if let Err(e) = onboarding_module
            .mailer()
            .send_templated(
                &row.email,
                "Fiókod elkészült!",
                WELCOME_USER_TEMPLATE,
                &json!({
                    "first_name": row.first_name,
                    "last_name": row.last_name,
                    "tenant_name": task.tenant_id,
                }),
            )
            .await
        {
            onboarding_module
                .metrics()
                .counter(ONBOARDING_EMAIL_FAILURES_TOTAL)
                .inc();
            warn!(task_id = %task.id, "welcome email failed: {e}");
        }

        Ok(())
    }

    async fn on_success(onboarding_module: &Arc<dyn OnboardingModule>, task: &OnboardingTask) {
        let event = NewAuditEvent::system(
            AuditEventType::UserCreated,
            Some(task.tenant_id),
            Some(task.id),
            json!({ "email": task.email, "job_id": task.job_id }),
        );
        match onboarding_module
            .jobs_repo()
            .complete_task(task.id, task.job_id, task.tenant_id, event)
            .await
        {
            Ok(job) => {
                onboarding_module
                    .metrics()
                    .counter_with(ONBOARDING_TASKS_PROCESSED_TOTAL, &[("status", "completed")])
                    .inc();
                Self::broadcast_progress(onboarding_module, &job).await;
                Self::try_finalize(onboarding_module, &job).await;
            }
            Err(e) => error!(task_id = %task.id, "terminal success transition failed: {e}"),
        }
    }

    async fn on_failure(
        onboarding_module: &Arc<dyn OnboardingModule>,
        task: &OnboardingTask,
        message: &BusMessage,
        task_error: TaskError,
    ) {
        let max_attempts = onboarding_module.config().onboarding().max_attempts;

        if task_error.is_retryable() && task.attempts < max_attempts {
            match onboarding_module
                .jobs_repo()
                .mark_task_retrying(task.id, task_error.to_string())
                .await
            {
                Ok(updated) => {
                    onboarding_module
                        .metrics()
                        .counter_with(ONBOARDING_TASKS_PROCESSED_TOTAL, &[("status", "retrying")])
                        .inc();
                    Self::requeue_with_backoff(onboarding_module, message, updated.attempts).await;
                }
                Err(e) => error!(task_id = %task.id, "retry transition failed: {e}"),
            }
            return;
        }

        let event = NewAuditEvent::system(
            AuditEventType::UserOnboardingFailed,
            Some(task.tenant_id),
            Some(task.id),
            json!({
                "email": task.email,
                "job_id": task.job_id,
                "error": task_error.to_string(),
            }),
        );
        match onboarding_module
            .jobs_repo()
            .fail_task(task.id, task.job_id, task_error.to_string(), event)
            .await
        {
            Ok(job) => {
                onboarding_module
                    .metrics()
                    .counter_with(ONBOARDING_TASKS_PROCESSED_TOTAL, &[("status", "failed")])
                    .inc();
                warn!(task_id = %task.id, "task failed terminally: {task_error}");
                Self::broadcast_progress(onboarding_module, &job).await;
                Self::try_finalize(onboarding_module, &job).await;
            }
            Err(e) => error!(task_id = %task.id, "terminal failure transition failed: {e}"),
        }
    }

    /// Republishes the message after `base * 2^attempts` with jitter.
    async fn requeue_with_backoff(
        onboarding_module: &Arc<dyn OnboardingModule>,
        message: &BusMessage,
        attempts: i32,
    ) {
        let config = onboarding_module.config();
        let delay = backoff_with_jitter(
            config.onboarding().retry_base(),
            attempts.max(0) as u32,
            config.onboarding().retry_cap(),
        );
        let bus = onboarding_module.bus();
        let topic = message.topic.clone();
        let key = message.key.clone();
        let value = message.value.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = bus.publish_with_retry(&topic, &key, value, 5).await {
                error!("requeue after backoff failed: {e}");
            }
        });
    }

    /// Broadcasts the counters of one job to the hub and the bus after a
    /// terminal per-task transition.
    async fn broadcast_progress(onboarding_module: &Arc<dyn OnboardingModule>, job: &BulkJob) {
        let event = ProgressEvent::Progress {
            completed: job.completed_tasks,
            failed: job.failed_tasks,
            total: job.total_tasks,
            percent: job.percent_done(),
        };
        onboarding_module.progress_hub().broadcast(job.id, event);

        if let Err(e) = onboarding_module
            .bus()
            .publish_with_retry(
                TOPIC_ONBOARDING_PROGRESS,
                &job_routing_key(job.tenant_id, job.id),
                json!({
                    "job_id": job.id,
                    "completed": job.completed_tasks,
                    "failed": job.failed_tasks,
                    "total": job.total_tasks,
                    "percent": job.percent_done(),
                }),
                3,
            )
            .await
        {
            warn!(job_id = %job.id, "progress event not shipped to bus: {e}");
        }
    }

    async fn try_finalize(onboarding_module: &Arc<dyn OnboardingModule>, job: &BulkJob) {
        if job.completed_tasks + job.failed_tasks < job.total_tasks {
            return;
        }
        match onboarding_module.jobs_repo().finalize_job(job.id).await {
            Ok(Some(finalized)) => {
                Self::broadcast_completion(onboarding_module, &finalized).await;
            }
            Ok(None) => {}
            Err(e) => error!(job_id = %job.id, "job finalization failed: {e}"),
        }
    }

    pub(crate) async fn broadcast_completion(
        onboarding_module: &Arc<dyn OnboardingModule>,
        job: &BulkJob,
    ) {
        info!(job_id = %job.id, status = %job.status, "bulk job finished");
        onboarding_module.progress_hub().broadcast(
            job.id,
            ProgressEvent::Completion {
                status: job.status.clone(),
            },
        );
        if let Err(e) = onboarding_module
            .bus()
            .publish_with_retry(
                TOPIC_ONBOARDING_PROGRESS,
                &job_routing_key(job.tenant_id, job.id),
                json!({
                    "job_id": job.id,
                    "status": job.status,
                }),
                3,
            )
            .await
        {
            warn!(job_id = %job.id, "completion event not shipped to bus: {e}");
        }
    }

    async fn commit(onboarding_module: &Arc<dyn OnboardingModule>, message: &BusMessage) {
        if let Err(e) = onboarding_module.bus().commit(CONSUMER_GROUP, message).await {
            error!("offset commit failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::config::AppConfig;
    use crate::bus::InMemoryEventBus;
    use crate::clients::{
        EnrollmentClient, IdentityClient, MockEnrollmentClient, MockIdentityClient,
        MockStorageClient, StorageClient,
    };
    use crate::common::{MockTemplatedMailer, TemplatedMailer};
    use crate::metrics::MetricsRegistry;
    use crate::onboarding::repository::{JobsRepository, MockJobsRepository};
    use crate::onboarding::tests::MockOnboardingModule;
    use crate::onboarding::types::UserRole;
    use crate::progress::ProgressHub;
    use crate::tenants::repository::{MockTenantsRepository, TenantsRepository};
    use chrono::Utc;
    use pretty_assertions::assert_eq;

    fn roster_row(email: &str, role: UserRole, courses: Vec<String>) -> RosterRow {
        RosterRow {
            email: email.to_string(),
            first_name: String::from("Anna"),
            last_name: String::from("Kovács"),
            role,
            student_id: None,
            department: None,
            course_codes: courses,
            graduation_year: None,
            phone: None,
            preferred_language: None,
        }
    }

    fn task_for(row: &RosterRow, attempts: i32) -> OnboardingTask {
        OnboardingTask {
            id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            email: row.email.clone(),
            payload: serde_json::to_value(row).unwrap(),
            status: String::from("processing"),
            attempts,
            last_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn message_for(task: &OnboardingTask) -> BusMessage {
        BusMessage {
            topic: TOPIC_ONBOARDING_JOBS.to_string(),
            partition: 0,
            offset: 0,
            key: job_routing_key(task.tenant_id, task.job_id),
            value: json!({
                "task_id": task.id,
                "job_id": task.job_id,
                "tenant_id": task.tenant_id,
            }),
        }
    }

    fn job_with(task: &OnboardingTask, total: i64, completed: i64, failed: i64) -> BulkJob {
        BulkJob {
            id: task.job_id,
            tenant_id: task.tenant_id,
            source: String::from("csv"),
            total_tasks: total,
            completed_tasks: completed,
            failed_tasks: failed,
            status: String::from("running"),
            created_at: Utc::now(),
            started_at: Some(Utc::now()),
            completed_at: None,
        }
    }

    struct Harness {
        module: MockOnboardingModule,
        metrics: Arc<MetricsRegistry>,
        hub: Arc<ProgressHub>,
        bus: InMemoryEventBus,
    }

    impl Harness {
        fn new(config: AppConfig) -> Self {
            let mut module = MockOnboardingModule::new();
            let metrics = Arc::new(MetricsRegistry::new());
            let shared = metrics.clone();
            module.expect_metrics().returning(move || shared.clone());
            let hub = ProgressHub::new();
            let shared_hub = hub.clone();
            module
                .expect_progress_hub()
                .returning(move || shared_hub.clone());
            let bus = InMemoryEventBus::new(3);
            let shared_bus = bus.clone();
            module
                .expect_bus()
                .returning(move || Arc::new(shared_bus.clone()));
            let config = Arc::new(config);
            module.expect_config().returning(move || config.clone());
            Self {
                module,
                metrics,
                hub,
                bus,
            }
        }

        fn with_jobs_repo(&mut self, repo: MockJobsRepository) {
            let repo: Arc<dyn JobsRepository> = Arc::new(repo);
            self.module
                .expect_jobs_repo()
                .returning(move || repo.clone());
        }

        fn with_clients(
            &mut self,
            identity: MockIdentityClient,
            enrollment: MockEnrollmentClient,
            storage: MockStorageClient,
            mailer: MockTemplatedMailer,
            tenants: MockTenantsRepository,
        ) {
            let identity: Arc<dyn IdentityClient> = Arc::new(identity);
            self.module
                .expect_identity_client()
                .returning(move || identity.clone());
            let enrollment: Arc<dyn EnrollmentClient> = Arc::new(enrollment);
            self.module
                .expect_enrollment_client()
                .returning(move || enrollment.clone());
            let storage: Arc<dyn StorageClient> = Arc::new(storage);
            self.module
                .expect_storage_client()
                .returning(move || storage.clone());
            let mailer: Arc<dyn TemplatedMailer> = Arc::new(mailer);
            self.module.expect_mailer().returning(move || mailer.clone());
            let tenants: Arc<dyn TenantsRepository> = Arc::new(tenants);
            self.module
                .expect_tenants_repo()
                .returning(move || tenants.clone());
        }
    }

    fn working_clients(row: &RosterRow) -> (
        MockIdentityClient,
        MockEnrollmentClient,
        MockStorageClient,
        MockTemplatedMailer,
        MockTenantsRepository,
    ) {
        let mut identity = MockIdentityClient::new();
        let identity_user_id = Uuid::new_v4();
        identity
            .expect_create_user()
            .returning(move |_| Ok(identity_user_id));

        let mut enrollment = MockEnrollmentClient::new();
        let expect_enrollment = row.role.is_enrollable() && !row.course_codes.is_empty();
        enrollment
            .expect_enroll_in_courses()
            .times(usize::from(expect_enrollment))
            .returning(|_, _, _| Ok(()));

        let mut storage = MockStorageClient::new();
        storage
            .expect_provision_user_storage()
            .returning(|_, _, _| Ok(()));

        let mut mailer = MockTemplatedMailer::new();
        mailer
            .expect_send_templated()
            .returning(|_, _, _, _| Ok(()));

        let mut tenants = MockTenantsRepository::new();
        tenants
            .expect_try_adjust_storage()
            .returning(|tenant_id, bytes, files, _| {
                let mut tenant = crate::tenants::model::Tenant {
                    id: tenant_id,
                    name: String::from("Acme"),
                    domain: String::from("acme"),
                    tier: String::from("professional"),
                    db_handle: None,
                    db_host: None,
                    db_port: None,
                    db_user: None,
                    db_password: None,
                    storage_quota_bytes: i64::MAX,
                    storage_used_bytes: 0,
                    file_count: 0,
                    user_count: 0,
                    course_count: 0,
                    active: true,
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                    deleted_at: None,
                };
                tenant.storage_used_bytes = bytes;
                tenant.file_count = files;
                Ok(Some(tenant))
            });

        (identity, enrollment, storage, mailer, tenants)
    }

    #[tokio::test]
    async fn replaying_a_completed_task_acknowledges_with_no_effect() {
        let row = roster_row("user@example.com", UserRole::Student, vec![]);
        let task = task_for(&row, 0);
        let message = message_for(&task);

        let mut jobs_repo = MockJobsRepository::new();
        jobs_repo
            .expect_claim_task()
            .times(1)
            .returning(|_| Ok(None));

        let mut harness = Harness::new(AppConfig::default());
        harness.with_jobs_repo(jobs_repo);
        // publish so the commit has an offset to move
        harness
            .bus
            .publish(TOPIC_ONBOARDING_JOBS, &message.key, message.value.clone())
            .await
            .unwrap();
        let _consumer = harness
            .bus
            .subscribe(TOPIC_ONBOARDING_JOBS, CONSUMER_GROUP)
            .await
            .unwrap();

        OnboardingWorker::handle_message(Arc::new(harness.module), message).await;

        assert_eq!(harness.bus.lag(TOPIC_ONBOARDING_JOBS, CONSUMER_GROUP), 0);
    }

    #[tokio::test]
    async fn successful_task_completes_and_finalizes_the_job() {
        let row = roster_row("user@example.com", UserRole::Student, vec![
            String::from("MATH-101"),
        ]);
        let task = task_for(&row, 0);
        let message = message_for(&task);

        let mut jobs_repo = MockJobsRepository::new();
        let claimed = task.clone();
        jobs_repo
            .expect_claim_task()
            .times(1)
            .returning(move |_| Ok(Some(claimed.clone())));
        let job = job_with(&task, 1, 1, 0);
        let completed = job.clone();
        jobs_repo
            .expect_complete_task()
            .times(1)
            .withf(|_, _, _, event| event.event_type == AuditEventType::UserCreated)
            .returning(move |_, _, _, _| Ok(completed.clone()));
        let finalized = {
            let mut finalized = job.clone();
            finalized.status = String::from("completed");
            finalized.completed_at = Some(Utc::now());
            finalized
        };
        jobs_repo
            .expect_finalize_job()
            .times(1)
            .returning(move |_| Ok(Some(finalized.clone())));

        let mut harness = Harness::new(AppConfig::default());
        harness.with_jobs_repo(jobs_repo);
        let clients = working_clients(&row);
        harness.with_clients(clients.0, clients.1, clients.2, clients.3, clients.4);

        let (_, mut events) = harness.hub.subscribe(task.job_id);
        let metrics = harness.metrics.clone();

        OnboardingWorker::handle_message(Arc::new(harness.module), message).await;

        assert_eq!(
            metrics
                .counter_with(ONBOARDING_TASKS_PROCESSED_TOTAL, &[("status", "completed")])
                .get(),
            1
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ProgressEvent::Progress {
                completed: 1,
                failed: 0,
                total: 1,
                percent: 100,
            }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            ProgressEvent::Completion {
                status: String::from("completed"),
            }
        );
    }

    #[tokio::test]
    async fn transient_failure_marks_retrying_and_requeues() {
        let row = roster_row("user@example.com", UserRole::Staff, vec![]);
        let task = task_for(&row, 0);
        let message = message_for(&task);

        let mut identity = MockIdentityClient::new();
        identity.expect_create_user().returning(|_| {
            Err(DependencyError::Server {
                service: "identity",
                status: 503,
            })
        });

        let mut jobs_repo = MockJobsRepository::new();
        let claimed = task.clone();
        jobs_repo
            .expect_claim_task()
            .times(1)
            .returning(move |_| Ok(Some(claimed.clone())));
        let retried = {
            let mut retried = task.clone();
            retried.status = String::from("retrying");
            retried.attempts = 1;
            retried
        };
        jobs_repo
            .expect_mark_task_retrying()
            .times(1)
            .returning(move |_, _| Ok(retried.clone()));

        let mut config = AppConfig::default();
        config.onboarding_mut().retry_base_ms = 1;
        config.onboarding_mut().retry_cap_ms = 2;

        let mut harness = Harness::new(config);
        harness.with_jobs_repo(jobs_repo);
        let identity: Arc<dyn IdentityClient> = Arc::new(identity);
        harness
            .module
            .expect_identity_client()
            .returning(move || identity.clone());

        let bus = harness.bus.clone();
        let metrics = harness.metrics.clone();
        OnboardingWorker::handle_message(Arc::new(harness.module), message).await;

        assert_eq!(
            metrics
                .counter_with(ONBOARDING_TASKS_PROCESSED_TOTAL, &[("status", "retrying")])
                .get(),
            1
        );
        // the requeued copy lands on the bus after the backoff
        let mut consumer = bus
            .subscribe(TOPIC_ONBOARDING_JOBS, "requeue-probe")
            .await
            .unwrap();
        let redelivered =
            tokio::time::timeout(std::time::Duration::from_secs(1), consumer.poll())
                .await
                .expect("requeue expected")
                .unwrap();
        assert_eq!(redelivered.value["task_id"], json!(task.id));
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_task_terminally() {
        let row = roster_row("user@example.com", UserRole::Staff, vec![]);
        let max_attempts = AppConfig::default().onboarding().max_attempts;
        let task = task_for(&row, max_attempts);
        let message = message_for(&task);

        let mut identity = MockIdentityClient::new();
        identity.expect_create_user().returning(|_| {
            Err(DependencyError::Timeout {
                service: "identity",
            })
        });

        let mut jobs_repo = MockJobsRepository::new();
        let claimed = task.clone();
        jobs_repo
            .expect_claim_task()
            .times(1)
            .returning(move |_| Ok(Some(claimed.clone())));
        let job = job_with(&task, 8, 5, 3);
        jobs_repo
            .expect_fail_task()
            .times(1)
            .withf(|_, _, _, event| event.event_type == AuditEventType::UserOnboardingFailed)
            .returning(move |_, _, _, _| Ok(job.clone()));

        let mut harness = Harness::new(AppConfig::default());
        harness.with_jobs_repo(jobs_repo);
        let identity: Arc<dyn IdentityClient> = Arc::new(identity);
        harness
            .module
            .expect_identity_client()
            .returning(move || identity.clone());

        let metrics = harness.metrics.clone();
        OnboardingWorker::handle_message(Arc::new(harness.module), message).await;

        assert_eq!(
            metrics
                .counter_with(ONBOARDING_TASKS_PROCESSED_TOTAL, &[("status", "failed")])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn permanent_rejection_fails_without_retry() {
        let row = roster_row("user@example.com", UserRole::Instructor, vec![]);
        let task = task_for(&row, 0);
        let message = message_for(&task);

        let mut identity = MockIdentityClient::new();
        identity.expect_create_user().returning(|_| {
            Err(DependencyError::Rejected {
                service: "identity",
                status: 409,
                message: String::from("duplicate email"),
            })
        });

        let mut jobs_repo = MockJobsRepository::new();
        let claimed = task.clone();
        jobs_repo
            .expect_claim_task()
            .times(1)
            .returning(move |_| Ok(Some(claimed.clone())));
        let job = job_with(&task, 8, 4, 1);
        jobs_repo
            .expect_fail_task()
            .times(1)
            .returning(move |_, _, _, _| Ok(job.clone()));

        let mut harness = Harness::new(AppConfig::default());
        harness.with_jobs_repo(jobs_repo);
        let identity: Arc<dyn IdentityClient> = Arc::new(identity);
        harness
            .module
            .expect_identity_client()
            .returning(move || identity.clone());

        let (_, mut events) = harness.hub.subscribe(task.job_id);
        OnboardingWorker::handle_message(Arc::new(harness.module), message).await;

        assert_eq!(
            events.recv().await.unwrap(),
            ProgressEvent::Progress {
                completed: 4,
                failed: 1,
                total: 8,
                percent: 62,
            }
        );
    }
}
