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

use crate::common::ConfigProvider;
use crate::onboarding::OnboardingModule;
use crate::onboarding::handler::{create_job, get_job, upload_csv};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use std::sync::Arc;

pub fn routes(onboarding_module: Arc<dyn OnboardingModule>) -> Router {
    let max_csv_bytes = onboarding_module.config().onboarding().max_csv_bytes as usize;
    Router::new().nest(
        "/onboarding",
        Router::new()
            .route("/jobs/create", post(create_job))
            .route(
                "/jobs/upload_csv",
                post(upload_csv).layer(DefaultBodyLimit::max(max_csv_bytes)),
            )
            .route("/jobs/get", get(get_job))
            .with_state(onboarding_module),
    )
}
