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
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::json;
use std::fmt::Display;

/// A generic response struct used to represent a successful response,
/// containing a success flag and some associated data.
///
/// # Fields
/// * `success` - Always true for this struct.
/// * `data` - The actual data payload of the response.
#[derive(Serialize)]
pub struct OkResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> OkResponse<T> {
    /// Creates a new instance of the struct with the given data
    /// and the `success` field set to `true`.
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for OkResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// A generic struct representing an error response, used to convey error
/// details in API responses together with the HTTP status to answer with.
pub struct ErrorResponse<T: Serialize> {
    pub status_code: StatusCode,
    pub error: T,
}

impl<T: Serialize> IntoResponse for ErrorResponse<T> {
    fn into_response(self) -> Response {
        (
            self.status_code,
            Json(json!({
                "success": false,
                "error": self.error,
            })),
        )
            .into_response()
    }
}

/// A single global error message without field level details.
#[derive(Debug, Clone, Serialize)]
pub struct GeneralError {
    pub message: String,
}

impl Display for GeneralError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A global message paired with per-field validation errors.
#[derive(Debug, Clone, Serialize)]
pub struct FormError<T: Serialize> {
    pub message: String,
    pub fields: T,
}

impl<T: Serialize> Display for FormError<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A struct representing a simple message response.
#[derive(Serialize)]
pub struct SimpleMessageResponse {
    pub message: String,
}

/// The common result type of axum handlers in this crate: either a ready
/// success response or an already rendered error response.
pub type HandlerResult = Result<Response, Response>;
