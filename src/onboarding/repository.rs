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

use crate::audit::model::NewAuditEvent;
use crate::audit::repository::insert_event;
use crate::common::error::{RepositoryError, RepositoryResult};
use crate::common::repository::PoolManagerWrapper;
use crate::onboarding::csv::RosterRow;
use crate::onboarding::model::{BulkJob, JobSource, OnboardingTask};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

/// Bulk insert batch size for task materialization.
const MATERIALIZE_CHUNK: usize = 1_000;

/// Bulk job and task rows.
///
/// Terminal task transitions bump the job counters, the tenant user count
/// and the audit log in the same transaction; the conditional status
/// updates make every transition single-winner, so a task row is only ever
/// mutated by one worker at a time.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobsRepository: Send + Sync {
    async fn insert_job(
        &self,
        tenant_id: Uuid,
        source: JobSource,
        event: NewAuditEvent,
    ) -> RepositoryResult<BulkJob>;

    async fn get_job(&self, job_id: Uuid) -> RepositoryResult<Option<BulkJob>>;

    /// Inserts every task row and sets the job total in one transaction.
    async fn materialize(
        &self,
        job_id: Uuid,
        tenant_id: Uuid,
        rows: Vec<RosterRow>,
    ) -> RepositoryResult<Vec<OnboardingTask>>;

    async fn mark_job_running(&self, job_id: Uuid) -> RepositoryResult<BulkJob>;

    /// The idempotency gate: moves the task to `processing` only from
    /// `pending` or `retrying`. Returns `None` when the task is already
    /// claimed or terminal, in which case a redelivered message must be
    /// acknowledged with no effect.
    async fn claim_task(&self, task_id: Uuid) -> RepositoryResult<Option<OnboardingTask>>;

    /// Terminal success: task to `completed`, job counter and tenant user
    /// count bumped, audit row written, all in one transaction. Returns
    /// the job with updated counters.
    async fn complete_task(
        &self,
        task_id: Uuid,
        job_id: Uuid,
        tenant_id: Uuid,
        event: NewAuditEvent,
    ) -> RepositoryResult<BulkJob>;

    /// Terminal failure: task to `failed` with its last error, job
    /// counter bumped, audit row written, in one transaction.
    async fn fail_task(
        &self,
        task_id: Uuid,
        job_id: Uuid,
        error: String,
        event: NewAuditEvent,
    ) -> RepositoryResult<BulkJob>;

    async fn mark_task_retrying(
        &self,
        task_id: Uuid,
        error: String,
    ) -> RepositoryResult<OnboardingTask>;

    /// Finalizes the job once every task is terminal: `completed` when
    /// nothing failed, `completed_with_errors` otherwise. Returns `None`
    /// while tasks are still outstanding (or when another worker already
    /// finalized), so exactly one caller observes the transition.
    async fn finalize_job(&self, job_id: Uuid) -> RepositoryResult<Option<BulkJob>>;
}

#[async_trait]
impl JobsRepository for PoolManagerWrapper {
    async fn insert_job(
        &self,
        tenant_id: Uuid,
        source: JobSource,
        event: NewAuditEvent,
    ) -> RepositoryResult<BulkJob> {
        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        let job = sqlx::query_as::<_, BulkJob>(
            r#"
            INSERT INTO bulk_jobs (tenant_id, source, status)
            VALUES ($1, $2, 'pending')
            RETURNING *
            "#,
        )
        .bind(tenant_id)
        .bind(source.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut event = event;
        event.aggregate_id = Some(job.id);
        insert_event(&mut *tx, &event).await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> RepositoryResult<Option<BulkJob>> {
        Ok(
            sqlx::query_as::<_, BulkJob>("SELECT * FROM bulk_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_optional(&self.pool_manager.get_main_pool())
                .await?,
        )
    }

    async fn materialize(
        &self,
        job_id: Uuid,
        tenant_id: Uuid,
        rows: Vec<RosterRow>,
    ) -> RepositoryResult<Vec<OnboardingTask>> {
        let payloads: Vec<serde_json::Value> = rows
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()
            .map_err(|e| RepositoryError::InvalidInput(e.to_string()))?;

        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE bulk_jobs
            SET total_tasks = $2
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(rows.len() as i64)
        .execute(&mut *tx)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for chunk in rows
            .iter()
            .zip(payloads.iter())
            .collect::<Vec<_>>()
            .chunks(MATERIALIZE_CHUNK)
        {
            let mut builder = sqlx::QueryBuilder::new(
                "INSERT INTO onboarding_tasks (job_id, tenant_id, email, payload, status) ",
            );
            builder.push_values(chunk, |mut b, (row, payload)| {
                b.push_bind(job_id)
                    .push_bind(tenant_id)
                    .push_bind(&row.email)
                    .push_bind(*payload)
                    .push_bind("pending");
            });
            builder.push(" RETURNING *");
            tasks.extend(
                builder
                    .build_query_as::<OnboardingTask>()
                    .fetch_all(&mut *tx)
                    .await?,
            );
        }

        tx.commit().await?;
        Ok(tasks)
    }

    async fn mark_job_running(&self, job_id: Uuid) -> RepositoryResult<BulkJob> {
        Ok(sqlx::query_as::<_, BulkJob>(
            r#"
            UPDATE bulk_jobs
            SET status = 'running',
                started_at = COALESCE(started_at, now())
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool_manager.get_main_pool())
        .await?)
    }

    async fn claim_task(&self, task_id: Uuid) -> RepositoryResult<Option<OnboardingTask>> {
        Ok(sqlx::query_as::<_, OnboardingTask>(
            r#"
            UPDATE onboarding_tasks
            SET status = 'processing',
                updated_at = now()
            WHERE id = $1
                AND status IN ('pending', 'retrying')
            RETURNING *
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool_manager.get_main_pool())
        .await?)
    }

    async fn complete_task(
        &self,
        task_id: Uuid,
        job_id: Uuid,
        tenant_id: Uuid,
        event: NewAuditEvent,
    ) -> RepositoryResult<BulkJob> {
        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        let transitioned = sqlx::query(
            r#"
            UPDATE onboarding_tasks
            SET status = 'completed',
                last_error = NULL,
                updated_at = now()
            WHERE id = $1
                AND status = 'processing'
            "#,
        )
        .bind(task_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        let job = if transitioned {
            sqlx::query(
                r#"
                UPDATE tenants
                SET user_count = user_count + 1,
                    updated_at = now()
                WHERE id = $1
                "#,
            )
            .bind(tenant_id)
            .execute(&mut *tx)
            .await?;

            insert_event(&mut *tx, &event).await?;

            sqlx::query_as::<_, BulkJob>(
                r#"
                UPDATE bulk_jobs
                SET completed_tasks = completed_tasks + 1
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as::<_, BulkJob>("SELECT * FROM bulk_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await?
        };

        tx.commit().await?;
        Ok(job)
    }

    async fn fail_task(
        &self,
        task_id: Uuid,
        job_id: Uuid,
        error: String,
        event: NewAuditEvent,
    ) -> RepositoryResult<BulkJob> {
        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        let transitioned = sqlx::query(
            r#"
            UPDATE onboarding_tasks
            SET status = 'failed',
                last_error = $2,
                updated_at = now()
            WHERE id = $1
                AND status = 'processing'
            "#,
        )
        .bind(task_id)
        .bind(&error)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        let job = if transitioned {
            insert_event(&mut *tx, &event).await?;
            sqlx::query_as::<_, BulkJob>(
                r#"
                UPDATE bulk_jobs
                SET failed_tasks = failed_tasks + 1
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?
        } else {
            sqlx::query_as::<_, BulkJob>("SELECT * FROM bulk_jobs WHERE id = $1")
                .bind(job_id)
                .fetch_one(&mut *tx)
                .await?
        };

        tx.commit().await?;
        Ok(job)
    }

    async fn mark_task_retrying(
        &self,
        task_id: Uuid,
        error: String,
    ) -> RepositoryResult<OnboardingTask> {
        Ok(sqlx::query_as::<_, OnboardingTask>(
            r#"
            UPDATE onboarding_tasks
            SET status = 'retrying',
                attempts = attempts + 1,
                last_error = $2,
                updated_at = now()
            WHERE id = $1
                AND status = 'processing'
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(error)
        .fetch_one(&self.pool_manager.get_main_pool())
        .await?)
    }

    async fn finalize_job(&self, job_id: Uuid) -> RepositoryResult<Option<BulkJob>> {
        let pool = self.pool_manager.get_main_pool();
        let mut tx = pool.begin().await?;

        let finalized = sqlx::query_as::<_, BulkJob>(
            r#"
            UPDATE bulk_jobs
            SET status = CASE WHEN failed_tasks = 0 THEN 'completed' ELSE 'completed_with_errors' END,
                completed_at = now()
            WHERE id = $1
                AND status = 'running'
                AND completed_tasks + failed_tasks = total_tasks
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(job) = &finalized {
            insert_event(
                &mut tx,
                &NewAuditEvent::system(
                    crate::audit::model::AuditEventType::BulkJobFinished,
                    Some(job.tenant_id),
                    Some(job.id),
                    serde_json::json!({
                        "status": job.status,
                        "total": job.total_tasks,
                        "completed": job.completed_tasks,
                        "failed": job.failed_tasks,
                    }),
                ),
            )
            .await?;
        }

        tx.commit().await?;
        Ok(finalized)
    }
}
