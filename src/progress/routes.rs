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

use crate::progress::ProgressModule;
use crate::progress::handler::progress_stream;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;

pub fn routes(progress_module: Arc<dyn ProgressModule>) -> Router {
    Router::new().nest(
        "/ws",
        Router::new()
            .route("/progress/{job_id}", get(progress_stream))
            .with_state(progress_module),
    )
}
