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

use crate::audit::model::AuditEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

/// Query parameters accepted by the audit log listing endpoint.
#[derive(Debug, Deserialize)]
pub struct AuditLogQuery {
    pub tenant_id: Uuid,
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

/// Normalized filter handed to the repository.
#[derive(Debug, Clone)]
pub struct AuditLogFilter {
    pub event_type: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: i64,
}

impl From<&AuditLogQuery> for AuditLogFilter {
    fn from(query: &AuditLogQuery) -> Self {
        Self {
            event_type: query.event_type.clone(),
            from: query.from,
            to: query.to,
            limit: query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }
}

/// The caller-visible shape of an audit event.
#[derive(Debug, Serialize)]
pub struct PublicAuditEvent {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub actor: String,
    pub ip: Option<String>,
    pub event_type: String,
    pub aggregate_id: Option<Uuid>,
    pub data: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl From<AuditEvent> for PublicAuditEvent {
    fn from(event: AuditEvent) -> Self {
        Self {
            id: event.id,
            tenant_id: event.tenant_id,
            actor: event.actor,
            ip: event.ip.map(|ip| ip.ip().to_string()),
            event_type: event.event_type,
            aggregate_id: event.aggregate_id,
            data: event.data,
            occurred_at: event.occurred_at,
        }
    }
}
