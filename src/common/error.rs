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
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

use crate::common::TemplatedMailer;
use crate::common::dto::{ErrorResponse, GeneralError};
use async_trait::async_trait;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use sqlx::Error;
use sqlx::migrate::MigrateError;
use tracing::Level;
use tracing::event;

/// An enumeration representing the two shapes an error can take on its way
/// out of a handler.
///
/// # Variants
///
/// * `UserFacing(StatusCode, String, T)`:
///   Errors that are intended to be displayed to the user. It contains the
///   HTTP status code, an error location for the logs and the serializable
///   body shown to the caller.
///
/// * `Internal(String, T)`:
///   Errors that are not meant to be user-facing. The caller only ever sees
///   a generic Hungarian message: "Váratlan hiba történt a feldolgozás során!"
#[derive(Debug, Error, Clone)]
pub enum FriendlyError<T>
where
    T: Serialize + Display,
{
    #[error("{0}")]
    UserFacing(StatusCode, String, T),
    #[error("Váratlan hiba történt a feldolgozás során!")]
    Internal(String, T),
}

impl<T> FriendlyError<T>
where
    T: Serialize + Display,
{
    pub fn user_facing(severity: Level, status: StatusCode, loc: &str, body: T) -> Self {
        Self::UserFacing(status, loc.to_string(), body).trace(severity)
    }

    pub fn internal(loc: &str, body: T) -> Self {
        Self::Internal(loc.to_string(), body).trace(Level::ERROR)
    }

    /// Same as [`FriendlyError::internal`] but additionally sends a plain
    /// notification email to the configured administrator address, so that
    /// unexpected failures do not rely on somebody watching the logs.
    pub async fn internal_with_admin_notify(
        loc: &str,
        body: T,
        mailer: Arc<dyn TemplatedMailer>,
    ) -> Self {
        let fe = Self::Internal(loc.to_string(), body).trace(Level::ERROR);

        if let Err(e) = fe.notify_admin(mailer).await {
            event!(Level::ERROR, "Could not notify admin: {e}")
        }

        fe
    }

    async fn notify_admin(&self, mailer: Arc<dyn TemplatedMailer>) -> Result<(), String> {
        let body = match self {
            FriendlyError::UserFacing(_, loc, body) | FriendlyError::Internal(loc, body) => {
                json!({ "location": loc, "message": body.to_string() })
            }
        };
        mailer
            .send_admin_notification("Váratlan rendszerhiba", &body)
            .await
            .map_err(|e| e.to_string())
    }

    /// Logs the error information associated with the current `FriendlyError`
    /// instance at the specified severity level using the `tracing` crate.
    ///
    /// # Returns
    /// - `Self`: Returns the current instance unchanged so that further
    ///   method chaining can be performed if necessary.
    fn trace(self, severity: Level) -> Self {
        match &self {
            FriendlyError::UserFacing(status, loc, body) => match severity {
                Level::ERROR => {
                    event!(
                        Level::ERROR,
                        "User-facing error: http-status={status} location={loc}, message={body}",
                    );
                }
                Level::WARN => {
                    event!(
                        Level::WARN,
                        "User-facing error: http-status={status} location={loc}, message={body}",
                    );
                }
                Level::INFO => {
                    event!(
                        Level::INFO,
                        "User-facing error: http-status={status} location={loc}, message={body}",
                    );
                }
                Level::DEBUG => {
                    event!(
                        Level::DEBUG,
                        "User-facing error: http-status={status} location={loc}, message={body}",
                    );
                }
                Level::TRACE => {
                    event!(
                        Level::TRACE,
                        "User-facing error: http-status={status} location={loc}, message={body}",
                    );
                }
            },
            FriendlyError::Internal(loc, body) => match severity {
                Level::ERROR => {
                    event!(Level::ERROR, "Internal error: location={loc} message={body}");
                }
                Level::WARN => {
                    event!(Level::WARN, "Internal error: location={loc} message={body}");
                }
                Level::INFO => {
                    event!(Level::INFO, "Internal error: location={loc} message={body}");
                }
                Level::DEBUG => {
                    event!(Level::DEBUG, "Internal error: location={loc} message={body}");
                }
                Level::TRACE => {
                    event!(Level::TRACE, "Internal error: location={loc} message={body}");
                }
            },
        }
        self
    }
}

impl<T> IntoResponse for FriendlyError<T>
where
    T: Serialize + Display,
{
    fn into_response(self) -> Response {
        match self {
            FriendlyError::UserFacing(status, _, body) => ErrorResponse {
                status_code: status,
                error: body,
            }
            .into_response(),
            FriendlyError::Internal(_, _) => ErrorResponse {
                status_code: StatusCode::INTERNAL_SERVER_ERROR,
                error: GeneralError {
                    message: String::from("Váratlan hiba történt a feldolgozás során"),
                },
            }
            .into_response(),
        }
    }
}

/// Conversion from a service error into the rendered [`FriendlyError`].
///
/// Service error enums decide per variant whether the caller may see the
/// message or only the generic internal one; variants that indicate an
/// unexpected system condition additionally notify the administrator.
#[async_trait]
pub trait IntoFriendlyError<T>
where
    T: Serialize + Display,
{
    async fn into_friendly_error(self, mailer: Arc<dyn TemplatedMailer>) -> FriendlyError<T>;
}

/// Represents errors that can occur while interacting with the database.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migrate error: {0}")]
    Migrate(#[from] MigrateError),

    #[error("InvalidInput error: {0}")]
    InvalidInput(String),

    #[error("Custom error: {0}")]
    Custom(String),

    #[error("RwLockReadGuard error: {0}")]
    RwLockReadGuard(String),

    #[error("RwLockWriteGuard error: {0}")]
    RwLockWriteGuard(String),

    #[error("Tenant pool not found")]
    TenantPoolNotFound,
}

impl RepositoryError {
    pub fn is_unique_violation(&self) -> bool {
        if let RepositoryError::Database(sqlxe) = self
            && let Error::Database(database_error) = sqlxe
            && database_error.is_unique_violation()
        {
            return true;
        }
        false
    }

    pub fn is_row_not_found(&self) -> bool {
        matches!(self, RepositoryError::Database(Error::RowNotFound))
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;
