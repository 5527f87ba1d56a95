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
use crate::clients::{DependencyError, IdentityClient, NewIdentityUser, classify_transport};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const SERVICE: &str = "identity";

/// Production identity adapter: JSON over HTTP, request timeout from the
/// dependency config, every call admitted through the identity circuit
/// breaker.
pub struct HttpIdentityClient {
    http: reqwest::Client,
    base_url: String,
    breaker: Arc<CircuitBreaker>,
}

impl HttpIdentityClient {
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

#[derive(Debug, Deserialize)]
struct CreatedUser {
    user_id: Uuid,
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn create_user(&self, user: &NewIdentityUser) -> Result<Uuid, DependencyError> {
        let url = format!("{}/users", self.base_url);
        self.breaker
            .execute(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(&json!({
                        "tenant_id": user.tenant_id,
                        "email": user.email,
                        "first_name": user.first_name,
                        "last_name": user.last_name,
                        "role": user.role,
                        "password": user.password,
                    }))
                    .send()
                    .await
                    .map_err(|e| classify_transport(SERVICE, e))?;

                let status = response.status();
                if status.is_success() {
                    let created: CreatedUser = response
                        .json()
                        .await
                        .map_err(|e| classify_transport(SERVICE, e))?;
                    Ok(created.user_id)
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
