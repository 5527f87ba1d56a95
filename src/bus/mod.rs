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

pub(crate) mod memory;

pub use memory::InMemoryEventBus;

use crate::common::services::backoff_with_jitter;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Per-task units of onboarding work, keyed by `tenant_id || job_id`.
pub const TOPIC_ONBOARDING_JOBS: &str = "onboarding.jobs";
/// Progress updates for live subscribers and downstream consumers.
pub const TOPIC_ONBOARDING_PROGRESS: &str = "onboarding.progress";
/// Asynchronous audit-event shipping for downstream indexing.
pub const TOPIC_ONBOARDING_AUDIT: &str = "onboarding.audit";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    #[error("bus lock error: {0}")]
    Lock(String),

    #[error("publish to {topic} failed after {attempts} attempts")]
    PublishExhausted { topic: String, attempts: u32 },
}

/// A message delivered to a consumer. `(partition, offset)` identifies the
/// message for the offset commit.
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub partition: usize,
    pub offset: u64,
    pub key: String,
    pub value: serde_json::Value,
}

/// A partition-assigned member of a consumer group.
///
/// `poll` blocks until a message is available on one of the member's
/// assigned partitions. Delivery is at-least-once: a message counts as
/// handled only once its offset is committed through
/// [`EventBus::commit`]; anything uncommitted is redelivered after the
/// member leaves the group.
#[async_trait]
pub trait BusConsumer: Send {
    async fn poll(&mut self) -> Option<BusMessage>;
}

/// Producer and consumer-group entry points of the message bus.
///
/// Publishing is at-least-once with ordering guaranteed per key within a
/// topic: messages with the same key land on the same partition and every
/// partition is consumed by a single group member at a time.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), BusError>;

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn BusConsumer>, BusError>;

    async fn commit(&self, group: &str, message: &BusMessage) -> Result<(), BusError>;

    /// Unconsumed message count of a group over all partitions of a topic.
    fn lag(&self, topic: &str, group: &str) -> u64;

    /// Publishes with bounded retries and exponential backoff.
    async fn publish_with_retry(
        &self,
        topic: &str,
        key: &str,
        value: serde_json::Value,
        max_attempts: u32,
    ) -> Result<(), BusError> {
        let mut attempt: u32 = 0;
        loop {
            match self.publish(topic, key, value.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        warn!(topic, attempts = attempt, "bus publish exhausted: {e}");
                        return Err(BusError::PublishExhausted {
                            topic: topic.to_string(),
                            attempts: attempt,
                        });
                    }
                    tokio::time::sleep(backoff_with_jitter(
                        Duration::from_millis(100),
                        attempt,
                        Duration::from_secs(5),
                    ))
                    .await;
                }
            }
        }
    }
}
