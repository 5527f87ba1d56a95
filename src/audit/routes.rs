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
use crate::audit::handler::list as audit_list;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;

pub fn routes(audit_module: Arc<dyn AuditModule>) -> Router {
    Router::new().nest(
        "/audit",
        Router::new()
            .route("/list", get(audit_list))
            .with_state(audit_module),
    )
}
