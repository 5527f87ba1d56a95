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

/// The stage a tenant provisioning run is in.
///
/// Progress percentages are fixed per stage and monotonically
/// nondecreasing over the run; a failed run keeps the percentage of the
/// stage it failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningStatus {
    Pending,
    ProvisioningDb,
    CreatingAdmin,
    SettingQuota,
    SendingEmail,
    Completed,
    Failed,
}

impl ProvisioningStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::ProvisioningDb => "provisioning_db",
            Self::CreatingAdmin => "creating_admin",
            Self::SettingQuota => "setting_quota",
            Self::SendingEmail => "sending_email",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn progress(&self) -> i32 {
        match self {
            Self::Pending => 0,
            Self::ProvisioningDb => 20,
            Self::CreatingAdmin => 40,
            Self::SettingQuota => 60,
            Self::SendingEmail => 80,
            Self::Completed => 100,
            Self::Failed => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl Display for ProvisioningStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProvisioningStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "provisioning_db" => Ok(Self::ProvisioningDb),
            "creating_admin" => Ok(Self::CreatingAdmin),
            "setting_quota" => Ok(Self::SettingQuota),
            "sending_email" => Ok(Self::SendingEmail),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown provisioning status: {other}")),
        }
    }
}

/// One provisioning run of one tenant.
///
/// Terminal rows always carry `completed_at` and `duration_seconds`.
#[derive(Debug, Clone, FromRow)]
pub struct TenantProvisioning {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub status: String,
    pub progress_percentage: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i32>,
    pub error_message: Option<String>,
}

/// Single-use bearer value letting a freshly provisioned administrator
/// bootstrap their credentials. Consumable only while unused and
/// unexpired; consumption sets `used_at` exactly once.
#[derive(Debug, Clone, FromRow)]
pub struct SetupToken {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub admin_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
