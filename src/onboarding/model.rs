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

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use std::fmt::Display;
use std::str::FromStr;
use uuid::Uuid;

/// Where a bulk job's roster came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobSource {
    Csv,
    Ldap,
    SamlJit,
    Google,
    Microsoft,
    Api,
}

impl JobSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Ldap => "ldap",
            Self::SamlJit => "saml_jit",
            Self::Google => "google",
            Self::Microsoft => "microsoft",
            Self::Api => "api",
        }
    }
}

impl Display for JobSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "ldap" => Ok(Self::Ldap),
            "saml_jit" => Ok(Self::SamlJit),
            "google" => Ok(Self::Google),
            "microsoft" => Ok(Self::Microsoft),
            "api" => Ok(Self::Api),
            other => Err(format!("Ismeretlen forrás: '{other}'")),
        }
    }
}

/// Lifecycle of a bulk job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::CompletedWithErrors => "completed_with_errors",
            Self::Failed => "failed",
        }
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle of a single onboarding task. `completed` and `failed` are
/// terminal; a terminal row is never mutated again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user-initiated batch of onboarding tasks sharing one correlation id.
#[derive(Debug, Clone, FromRow)]
pub struct BulkJob {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub source: String,
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BulkJob {
    pub fn percent_done(&self) -> u8 {
        if self.total_tasks == 0 {
            return 0;
        }
        (((self.completed_tasks + self.failed_tasks) * 100) / self.total_tasks)
            .clamp(0, 100) as u8
    }
}

/// The unit of work processed by a single worker for a single user record.
///
/// `(job_id, email)` is unique within a job; the payload is the validated
/// roster row.
#[derive(Debug, Clone, FromRow)]
pub struct OnboardingTask {
    pub id: Uuid,
    pub job_id: Uuid,
    pub tenant_id: Uuid,
    pub email: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn job_sources_round_trip() {
        for source in [
            JobSource::Csv,
            JobSource::Ldap,
            JobSource::SamlJit,
            JobSource::Google,
            JobSource::Microsoft,
            JobSource::Api,
        ] {
            assert_eq!(JobSource::from_str(source.as_str()).unwrap(), source);
        }
    }

    #[test]
    fn percent_done_is_bounded() {
        let mut job = BulkJob {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            source: String::from("csv"),
            total_tasks: 8,
            completed_tasks: 6,
            failed_tasks: 1,
            status: String::from("running"),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        assert_eq!(job.percent_done(), 87);
        job.total_tasks = 0;
        assert_eq!(job.percent_done(), 0);
    }
}
