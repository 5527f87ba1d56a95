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
use ipnetwork::IpNetwork;
use serde::Serialize;
use sqlx::FromRow;
use std::fmt::Display;
use std::net::IpAddr;
use uuid::Uuid;

/// Immutable record of a significant state change.
///
/// Rows are append-only: the storage layer rejects UPDATE and DELETE, and
/// no code path in this crate ever issues one. Retention is at least seven
/// years; no purge job exists in this repository.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditEvent {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub actor: String,
    pub ip: Option<IpNetwork>,
    pub event_type: String,
    pub aggregate_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditEventType {
    TenantCreated,
    TenantDeleted,
    TenantQuotaAdjusted,
    SetupTokenConsumed,
    SetupEmailResent,
    BulkJobCreated,
    BulkJobFinished,
    UserCreated,
    UserOnboardingFailed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TenantCreated => "tenant_created",
            Self::TenantDeleted => "tenant_deleted",
            Self::TenantQuotaAdjusted => "tenant_quota_adjusted",
            Self::SetupTokenConsumed => "setup_token_consumed",
            Self::SetupEmailResent => "setup_email_resent",
            Self::BulkJobCreated => "bulk_job_created",
            Self::BulkJobFinished => "bulk_job_finished",
            Self::UserCreated => "user_created",
            Self::UserOnboardingFailed => "user_onboarding_failed",
        }
    }
}

impl Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An audit event before it is persisted.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub tenant_id: Option<Uuid>,
    pub actor: String,
    pub ip: Option<IpNetwork>,
    pub event_type: AuditEventType,
    pub aggregate_id: Option<Uuid>,
    pub data: serde_json::Value,
}

impl NewAuditEvent {
    /// An event performed by the platform itself rather than a caller.
    pub fn system(
        event_type: AuditEventType,
        tenant_id: Option<Uuid>,
        aggregate_id: Option<Uuid>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id,
            actor: String::from("system"),
            ip: None,
            event_type,
            aggregate_id,
            data,
        }
    }

    /// An event attributed to an authenticated caller.
    pub fn from_actor(
        actor: &str,
        ip: IpAddr,
        event_type: AuditEventType,
        tenant_id: Option<Uuid>,
        aggregate_id: Option<Uuid>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            tenant_id,
            actor: actor.to_string(),
            ip: Some(IpNetwork::from(ip)),
            event_type,
            aggregate_id,
            data,
        }
    }
}
