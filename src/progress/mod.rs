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

pub(crate) mod handler;
pub(crate) mod routes;

use crate::common::DefaultAppState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Buffered events per subscriber before it counts as too slow.
const SUBSCRIBER_BUFFER: usize = 64;

pub trait ProgressModule: Send + Sync {
    fn progress_hub(&self) -> Arc<ProgressHub>;
}

impl ProgressModule for DefaultAppState {
    fn progress_hub(&self) -> Arc<ProgressHub> {
        self.progress_hub.clone()
    }
}

/// A live event streamed to the subscribers of a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    Progress {
        completed: i64,
        failed: i64,
        total: i64,
        percent: u8,
    },
    Completion {
        status: String,
    },
    Error {
        message: String,
    },
}

struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<ProgressEvent>,
}

/// In-process fan-out of progress events to subscribed long-lived client
/// connections, keyed by job id.
///
/// The hub is a process-wide singleton living in the application state. It
/// holds no durable data: on restart live clients reconnect and poll the
/// job status instead. The lock guards only the subscriber map; broadcasts
/// never block on a slow subscriber, such a subscriber is dropped and its
/// channel closed.
#[derive(Default)]
pub struct ProgressHub {
    subscribers: RwLock<HashMap<Uuid, Vec<Subscriber>>>,
}

impl ProgressHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers a new subscriber for a job and returns its id together
    /// with the receiving end of its event channel.
    pub fn subscribe(&self, job_id: Uuid) -> (Uuid, mpsc::Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let subscriber_id = Uuid::new_v4();
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers
                .entry(job_id)
                .or_default()
                .push(Subscriber {
                    id: subscriber_id,
                    tx,
                });
        }
        debug!(%job_id, %subscriber_id, "progress subscriber registered");
        (subscriber_id, rx)
    }

    pub fn unsubscribe(&self, job_id: Uuid, subscriber_id: Uuid) {
        if let Ok(mut subscribers) = self.subscribers.write()
            && let Some(entries) = subscribers.get_mut(&job_id)
        {
            entries.retain(|s| s.id != subscriber_id);
            if entries.is_empty() {
                subscribers.remove(&job_id);
            }
        }
    }

    /// Delivers an event to every subscriber of the job.
    ///
    /// Non-blocking: a subscriber whose buffer is full is evicted, which
    /// closes its channel and thereby its connection.
    pub fn broadcast(&self, job_id: Uuid, event: ProgressEvent) {
        let Ok(mut subscribers) = self.subscribers.write() else {
            return;
        };
        let Some(entries) = subscribers.get_mut(&job_id) else {
            return;
        };
        entries.retain(|subscriber| match subscriber.tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(%job_id, subscriber = %subscriber.id, "dropping slow progress subscriber");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        if entries.is_empty() {
            subscribers.remove(&job_id);
        }
    }

    pub fn subscriber_count(&self, job_id: Uuid) -> usize {
        self.subscribers
            .read()
            .map(|subscribers| subscribers.get(&job_id).map_or(0, |e| e.len()))
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn progress(completed: i64) -> ProgressEvent {
        ProgressEvent::Progress {
            completed,
            failed: 0,
            total: 10,
            percent: (completed * 10) as u8,
        }
    }

    #[tokio::test]
    async fn events_arrive_in_broadcast_order() {
        let hub = ProgressHub::new();
        let job_id = Uuid::new_v4();
        let (_, mut rx) = hub.subscribe(job_id);

        for i in 1..=3 {
            hub.broadcast(job_id, progress(i));
        }

        for i in 1..=3 {
            assert_eq!(rx.recv().await.unwrap(), progress(i));
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_the_same_event() {
        let hub = ProgressHub::new();
        let job_id = Uuid::new_v4();
        let (_, mut rx_a) = hub.subscribe(job_id);
        let (_, mut rx_b) = hub.subscribe(job_id);

        hub.broadcast(job_id, progress(1));

        assert_eq!(rx_a.recv().await.unwrap(), progress(1));
        assert_eq!(rx_b.recv().await.unwrap(), progress(1));
    }

    #[tokio::test]
    async fn slow_subscriber_is_dropped_and_channel_closed() {
        let hub = ProgressHub::new();
        let job_id = Uuid::new_v4();
        let (_, mut rx) = hub.subscribe(job_id);

        for i in 0..(SUBSCRIBER_BUFFER as i64 + 1) {
            hub.broadcast(job_id, progress(i));
        }

        assert_eq!(hub.subscriber_count(job_id), 0);
        // the buffered events are still readable, then the channel ends
        for _ in 0..SUBSCRIBER_BUFFER {
            assert!(rx.recv().await.is_some());
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn unsubscribe_removes_only_the_given_subscriber() {
        let hub = ProgressHub::new();
        let job_id = Uuid::new_v4();
        let (id_a, _rx_a) = hub.subscribe(job_id);
        let (_, mut rx_b) = hub.subscribe(job_id);

        hub.unsubscribe(job_id, id_a);
        assert_eq!(hub.subscriber_count(job_id), 1);

        hub.broadcast(
            job_id,
            ProgressEvent::Completion {
                status: String::from("completed"),
            },
        );
        assert_eq!(
            rx_b.recv().await.unwrap(),
            ProgressEvent::Completion {
                status: String::from("completed"),
            }
        );
    }

    #[test]
    fn wire_format_matches_the_transport_contract() {
        let event = ProgressEvent::Progress {
            completed: 8,
            failed: 1,
            total: 10,
            percent: 90,
        };
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"type":"progress","completed":8,"failed":1,"total":10,"percent":90}"#
        );
        let completion = ProgressEvent::Completion {
            status: String::from("completed_with_errors"),
        };
        assert_eq!(
            serde_json::to_string(&completion).unwrap(),
            r#"{"type":"completion","status":"completed_with_errors"}"#
        );
    }
}
