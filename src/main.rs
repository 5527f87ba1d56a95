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

#![forbid(unsafe_code)]
mod app;
mod audit;
mod breaker;
mod bus;
mod clients;
mod common;
mod metrics;
mod onboarding;
mod progress;
mod provisioning;
mod quota;
mod ratelimit;
mod tenants;

use crate::app::init::{InitializedApp, init_default_app, init_subscriber};
use futures_util::future::join_all;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tracing::error;

#[tokio::main]
async fn main() {
    init_subscriber();

    let initialized = match init_default_app().await {
        Ok(initialized) => initialized,
        Err(e) => {
            error!("fatal startup error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = serve(initialized).await {
        error!("server error: {e}");
        std::process::exit(1);
    }

    // only reached after a signal-driven graceful shutdown
    std::process::exit(2);
}

async fn serve(initialized: InitializedApp) -> anyhow::Result<()> {
    let InitializedApp {
        config,
        router,
        worker_shutdown,
        worker_handles,
    } = initialized;

    let addr = config.server().host().to_string() + ":" + &config.server().port().to_string();
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // the workers drain their in-flight tasks for up to 30 seconds each
    let _ = worker_shutdown.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(35), join_all(worker_handles)).await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
            _ = terminate => {},
    }
}
