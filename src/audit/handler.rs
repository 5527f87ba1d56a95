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
use crate::audit::dto::{AuditLogFilter, AuditLogQuery};
use crate::audit::service::AuditService;
use crate::common::dto::{HandlerResult, OkResponse};
use crate::common::error::IntoFriendlyError;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use std::sync::Arc;

pub async fn list(
    State(audit_module): State<Arc<dyn AuditModule>>,
    Query(query): Query<AuditLogQuery>,
) -> HandlerResult {
    match AuditService::get_list(
        audit_module.clone(),
        query.tenant_id,
        AuditLogFilter::from(&query),
    )
    .await
    {
        Ok(events) => Ok(OkResponse::new(events).into_response()),
        Err(e) => Err(e
            .into_friendly_error(audit_module.mailer())
            .await
            .into_response()),
    }
}
