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

use crate::app::database::PoolManager;
use std::sync::Arc;

/// A thin wrapper around the [`PoolManager`] that the repository traits are
/// implemented on.
///
/// Repositories never hold a pool directly; they resolve the main pool or a
/// tenant pool through the manager on every call, so pools added at runtime
/// (a freshly provisioned dedicated tenant database) are picked up without
/// any coordination.
pub struct PoolManagerWrapper {
    pub pool_manager: Arc<dyn PoolManager>,
}

impl PoolManagerWrapper {
    pub fn new(pool_manager: Arc<dyn PoolManager>) -> Self {
        Self { pool_manager }
    }
}
