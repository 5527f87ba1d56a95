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

use crate::audit::AuditModule;
use crate::audit::dto::{AuditLogFilter, PublicAuditEvent};
use crate::audit::model::NewAuditEvent;
use crate::bus::TOPIC_ONBOARDING_AUDIT;
use crate::common::TemplatedMailer;
use crate::common::dto::GeneralError;
use crate::common::error::{FriendlyError, IntoFriendlyError, RepositoryError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuditServiceError {
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

#[async_trait]
impl IntoFriendlyError<GeneralError> for AuditServiceError {
    async fn into_friendly_error(
        self,
        mailer: Arc<dyn TemplatedMailer>,
    ) -> FriendlyError<GeneralError> {
        FriendlyError::internal_with_admin_notify(
            file!(),
            GeneralError {
                message: self.to_string(),
            },
            mailer,
        )
        .await
    }
}

pub struct AuditService;

type AuditServiceResult<T> = Result<T, AuditServiceError>;

impl AuditService {
    /// Appends an audit event that stands on its own (not coupled to a
    /// store mutation) and ships a copy to the bus for downstream indexing.
    ///
    /// The bus copy is redundant with the synchronous write, so a publish
    /// failure is only logged.
    pub async fn record(
        audit_module: Arc<dyn AuditModule>,
        event: NewAuditEvent,
    ) -> AuditServiceResult<()> {
        let stored = audit_module.audit_repo().append(event).await?;

        let key = stored
            .tenant_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| String::from("system"));
        if let Err(e) = audit_module
            .bus()
            .publish_with_retry(
                TOPIC_ONBOARDING_AUDIT,
                &key,
                serde_json::to_value(&stored).unwrap_or_default(),
                3,
            )
            .await
        {
            warn!("audit event {} not shipped to bus: {e}", stored.id);
        }
        Ok(())
    }

    pub async fn get_list(
        audit_module: Arc<dyn AuditModule>,
        tenant_id: Uuid,
        filter: AuditLogFilter,
    ) -> AuditServiceResult<Vec<PublicAuditEvent>> {
        let events = audit_module.audit_repo().list(tenant_id, filter).await?;
        Ok(events.into_iter().map(PublicAuditEvent::from).collect())
    }
}
