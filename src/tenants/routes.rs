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

use crate::tenants::TenantsModule;
use crate::tenants::handler::{
    create as tenants_create, delete as tenants_delete, provisioning_status, setup_consume,
    setup_resend, storage_get, storage_update,
};
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

pub fn routes(tenants_module: Arc<dyn TenantsModule>) -> Router {
    Router::new().nest(
        "/tenants",
        Router::new()
            .route("/create", post(tenants_create))
            .route("/provisioning_status", get(provisioning_status))
            .route("/storage/update", post(storage_update))
            .route("/storage/get", get(storage_get))
            .route("/setup/consume", post(setup_consume))
            .route("/setup/resend", post(setup_resend))
            .route("/delete", post(tenants_delete))
            .with_state(tenants_module),
    )
}
