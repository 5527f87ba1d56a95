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

use crate::app::config::AppConfig;
use crate::audit;
use crate::common::DefaultAppState;
use crate::common::dto::{ErrorResponse, GeneralError};
use crate::common::extractors::ClientContext;
use crate::metrics::alerts::AlertEngine;
use crate::metrics::{API_REQUEST_ERRORS_TOTAL, API_REQUESTS_TOTAL, MetricsRegistry};
use crate::onboarding::{self, worker::OnboardingWorker};
use crate::progress;
use crate::ratelimit::{RateLimitAction, RateLimiter};
use crate::tenants;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Everything `main` needs to serve and later shut down the application.
pub struct InitializedApp {
    pub config: Arc<AppConfig>,
    pub router: Router,
    pub worker_shutdown: watch::Sender<bool>,
    pub worker_handles: Vec<JoinHandle<()>>,
}

/// Sets up the global tracing subscriber.
///
/// # Panics
/// - If a global subscriber is already set.
pub fn init_subscriber() {
    tracing::subscriber::set_global_default(
        FmtSubscriber::builder()
            .with_max_level(Level::TRACE) //TODO: make configurable
            .finish(),
    )
    .expect("setting default subscriber failed");
}

/// Builds the application state, runs the control-plane migrations, warms
/// the dedicated tenant pools, starts the background machinery (onboarding
/// workers, alert engine, rate-limit window reclamation) and assembles the
/// router.
pub async fn init_default_app() -> anyhow::Result<InitializedApp> {
    let state = Arc::new(DefaultAppState::new().await?);

    state.migrator.migrate_main_db().await?;
    state.init_tenant_pools().await?;

    let (worker_shutdown, shutdown_rx) = watch::channel(false);
    let worker_handles = OnboardingWorker::spawn_with_shutdown(
        state.clone(),
        state.config.onboarding().worker_count,
        shutdown_rx,
    );

    AlertEngine::spawn(Arc::new(AlertEngine::new(
        state.config.alerts().clone(),
        state.metrics.clone(),
        state.breakers.clone(),
        state.mailer.clone(),
    )));
    spawn_rate_limit_maintenance(state.rate_limiter.clone());

    let router = app(state.clone());

    Ok(InitializedApp {
        config: state.config.clone(),
        router,
        worker_shutdown,
        worker_handles,
    })
}

/// Assembles the router from the per-module route sets and the shared
/// middleware layers.
pub fn app(state: Arc<DefaultAppState>) -> Router {
    Router::new()
        .merge(tenants::routes::routes(state.clone()))
        .merge(onboarding::routes::routes(state.clone()))
        .merge(audit::routes::routes(state.clone()))
        .merge(progress::routes::routes(state.clone()))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            general_rate_limit,
        ))
        .layer(middleware::from_fn_with_state(
            state.metrics.clone(),
            track_requests,
        ))
        .layer(TraceLayer::new_for_http())
}

/// Counts every request and every server-error response; the alert engine
/// derives the request-per-minute and error-rate gauges from these.
async fn track_requests(
    State(metrics): State<Arc<MetricsRegistry>>,
    request: Request,
    next: Next,
) -> Response {
    metrics.counter(API_REQUESTS_TOTAL).inc();
    let response = next.run(request).await;
    if response.status().is_server_error() {
        metrics.counter(API_REQUEST_ERRORS_TOTAL).inc();
    }
    response
}

/// The general per-IP limit in front of every route. The heavy endpoints
/// additionally check their own action limit in the service layer.
async fn general_rate_limit(
    State(rate_limiter): State<Arc<RateLimiter>>,
    client_context: ClientContext,
    request: Request,
    next: Next,
) -> Response {
    let decision = rate_limiter
        .allow(&client_context.ip.to_string(), RateLimitAction::General)
        .await;
    if !decision.allowed {
        let mut response = ErrorResponse {
            status_code: StatusCode::TOO_MANY_REQUESTS,
            error: GeneralError {
                message: String::from("Túl sok kérés! Próbáld újra később."),
            },
        }
        .into_response();
        if let Ok(retry_after) = decision.retry_after.as_secs().max(1).to_string().parse() {
            response.headers_mut().insert("retry-after", retry_after);
        }
        return response;
    }
    next.run(request).await
}

/// Reclaims elapsed rate-limit windows once an hour.
fn spawn_rate_limit_maintenance(rate_limiter: Arc<RateLimiter>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            rate_limiter.purge_expired().await;
        }
    })
}
