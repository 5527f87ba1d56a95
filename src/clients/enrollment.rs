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

use crate::app::config::DependencyConfig;
use crate::breaker::CircuitBreaker;
use crate::clients::{DependencyError, EnrollmentClient, classify_transport};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const SERVICE: &str = "enrollment";

/// Production course-enrollment adapter.
pub struct HttpEnrollmentClient {
    http: reqwest::Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl HttpEnrollmentClient {
    pub fn new(
        config: &DependencyConfig,
        breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(config.timeout())
                .build()?,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            breaker,
        })
    }
}

#[async_trait]
impl EnrollmentClient for HttpEnrollmentClient {
    async fn enroll_in_courses(
        &self,
        tenant_id: Uuid,
        identity_user_id: Uuid,
        course_codes: &[String],
    ) -> Result<(), DependencyError> {
        let url = format!("{}/enrollments", self.base_url);
        self.breaker
            .execute(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(&json!({
                        "tenant_id": tenant_id,
                        "user_id": identity_user_id,
                        "course_codes": course_codes,
                    }))
                    .send()
                    .await
                    .map_err(|e| classify_transport(SERVICE, e))?;

                let status = response.status();
                if status.is_success() {
                    Ok(())
                } else if status.is_server_error() {
                    Err(DependencyError::Server {
                        service: SERVICE,
                        status: status.as_u16(),
                    })
                } else {
                    let message = response.text().await.unwrap_or_default();
                    Err(DependencyError::Rejected {
                        service: SERVICE,
                        status: status.as_u16(),
                        message,
                    })
                }
            })
            .await
            .map_err(DependencyError::from)
    }
}
