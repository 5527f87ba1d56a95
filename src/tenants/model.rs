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
use uuid::Uuid;

/// An isolated organization within the platform.
///
/// The storage counters are guarded by check constraints in the schema:
/// `0 <= storage_used_bytes <= storage_quota_bytes` holds at all times.
/// The `db_*` columns carry the handle of the dedicated database of
/// tenants whose tier includes one; they stay NULL otherwise.
#[derive(Debug, Clone, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub domain: String,
    pub tier: String,
    pub db_handle: Option<String>,
    pub db_host: Option<String>,
    pub db_port: Option<i32>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub storage_quota_bytes: i64,
    pub storage_used_bytes: i64,
    pub file_count: i64,
    pub user_count: i64,
    pub course_count: i64,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A named bundle of limits and capabilities. Reference data, never
/// mutated by runtime flows.
#[derive(Debug, Clone, FromRow)]
pub struct SubscriptionTier {
    pub id: Uuid,
    pub name: String,
    pub level: i32,
    pub storage_quota_bytes: i64,
    pub max_users: i64,
    pub max_courses: i64,
    pub dedicated_database: bool,
    pub custom_domain: bool,
}

/// The administrator account of a tenant. At most one row per tenant is
/// primary, enforced by a partial unique index.
#[derive(Debug, Clone, FromRow)]
pub struct TenantAdmin {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub identity_user_id: Option<Uuid>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}
