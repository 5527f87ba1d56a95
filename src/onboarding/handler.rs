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
use crate::common::dto::{GeneralError, HandlerResult, OkResponse};
use crate::common::error::{FriendlyError, IntoFriendlyError};
use crate::common::extractors::{ClientContext, ValidJson};
use crate::onboarding::OnboardingModule;
use crate::onboarding::dto::{CreateJobRequest, JobStatusQuery, UploadCsvQuery};
use crate::onboarding::service::OnboardingService;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use std::sync::Arc;
use tracing::Level;

pub async fn create_job(
    State(onboarding_module): State<Arc<dyn OnboardingModule>>,
    client_context: ClientContext,
    ValidJson(payload): ValidJson<CreateJobRequest>,
) -> HandlerResult {
    match OnboardingService::create_job(&client_context, &payload, onboarding_module.clone())
        .await
    {
        Ok(created) => Ok((StatusCode::CREATED, OkResponse::new(created).into_response())
            .into_response()),
        Err(e) => Err(e
            .into_friendly_error(onboarding_module.mailer())
            .await
            .into_response()),
    }
}

pub async fn upload_csv(
    State(onboarding_module): State<Arc<dyn OnboardingModule>>,
    client_context: ClientContext,
    Query(query): Query<UploadCsvQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult {
    let config = onboarding_module.config();

    // a file whose declared size exceeds the cap is refused before any
    // parsing happens
    let declared = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if declared.is_some_and(|size| size > config.onboarding().max_csv_bytes) {
        return Err(FriendlyError::user_facing(
            Level::DEBUG,
            StatusCode::PAYLOAD_TOO_LARGE,
            file!(),
            GeneralError {
                message: format!(
                    "A fájl mérete meghaladja a megengedett {} bájtot",
                    config.onboarding().max_csv_bytes
                ),
            },
        )
        .into_response());
    }

    // the request timeout covers validation and materialization only,
    // task processing continues asynchronously
    let upload = tokio::time::timeout(
        config.onboarding().upload_timeout(),
        OnboardingService::upload_csv(
            &client_context,
            query.job_id,
            &body,
            onboarding_module.clone(),
        ),
    )
    .await;

    match upload {
        Ok(Ok(report)) => Ok(OkResponse::new(report).into_response()),
        Ok(Err(e)) => Err(e
            .into_friendly_error(onboarding_module.mailer())
            .await
            .into_response()),
        Err(_elapsed) => Err(FriendlyError::user_facing(
            Level::WARN,
            StatusCode::REQUEST_TIMEOUT,
            file!(),
            GeneralError {
                message: String::from("A feltöltés feldolgozása túllépte az időkorlátot"),
            },
        )
        .into_response()),
    }
}

pub async fn get_job(
    State(onboarding_module): State<Arc<dyn OnboardingModule>>,
    Query(query): Query<JobStatusQuery>,
) -> HandlerResult {
    match OnboardingService::job_status(query.job_id, onboarding_module.clone()).await {
        Ok(job) => Ok(OkResponse::new(job).into_response()),
        Err(e) => Err(e
            .into_friendly_error(onboarding_module.mailer())
            .await
            .into_response()),
    }
}
