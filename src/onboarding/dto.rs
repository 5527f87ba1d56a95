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

use crate::onboarding::csv::RejectedRow;
use crate::onboarding::model::BulkJob;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub tenant_id: Uuid,
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct CreatedJobResponse {
    pub job_id: Uuid,
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadCsvQuery {
    pub job_id: Uuid,
}

/// The synchronous part of an upload: how many rows became tasks and which
/// rows were refused, by index and reason. Task processing itself is
/// asynchronous.
#[derive(Debug, Serialize)]
pub struct UploadReport {
    pub accepted_count: usize,
    pub rejected_rows: Vec<RejectedRow>,
}

#[derive(Debug, Deserialize)]
pub struct JobStatusQuery {
    pub job_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct PublicJob {
    pub job_id: Uuid,
    pub status: String,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<BulkJob> for PublicJob {
    fn from(job: BulkJob) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            total: job.total_tasks,
            completed: job.completed_tasks,
            failed: job.failed_tasks,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}
