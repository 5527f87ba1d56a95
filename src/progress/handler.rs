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

use crate::progress::{ProgressEvent, ProgressHub, ProgressModule};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Inbound frames carry control traffic only.
const MAX_INBOUND_MESSAGE_BYTES: usize = 512;
const PING_INTERVAL: Duration = Duration::from_secs(54);
const PONG_DEADLINE: Duration = Duration::from_secs(60);

pub async fn progress_stream(
    State(progress_module): State<Arc<dyn ProgressModule>>,
    Path(job_id): Path<Uuid>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.max_message_size(MAX_INBOUND_MESSAGE_BYTES)
        .on_upgrade(move |socket| {
            stream_job_progress(socket, progress_module.progress_hub(), job_id)
        })
}

/// Forwards hub events of one job to a single connected client.
///
/// The write side pings every 54 seconds; a client that has not answered
/// with a pong within 60 seconds is evicted. The stream closes itself after
/// the completion event.
async fn stream_job_progress(socket: WebSocket, hub: Arc<ProgressHub>, job_id: Uuid) {
    let (subscriber_id, mut rx) = hub.subscribe(job_id);
    let (mut sender, mut receiver) = socket.split();

    let mut ping = tokio::time::interval_at(
        tokio::time::Instant::now() + PING_INTERVAL,
        PING_INTERVAL,
    );
    let mut last_pong = tokio::time::Instant::now();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let is_completion = matches!(event, ProgressEvent::Completion { .. });
                let Ok(payload) = serde_json::to_string(&event) else { break };
                if sender.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
                if is_completion {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Pong(_))) => last_pong = tokio::time::Instant::now(),
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
            _ = ping.tick() => {
                if last_pong.elapsed() > PONG_DEADLINE {
                    debug!(%job_id, %subscriber_id, "progress subscriber missed pong deadline");
                    break;
                }
                if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
        }
    }

    hub.unsubscribe(job_id, subscriber_id);
    let _ = sender.send(Message::Close(None)).await;
}
