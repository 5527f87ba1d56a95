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

use crate::bus::{BusConsumer, BusError, BusMessage, EventBus};
use async_trait::async_trait;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// In-process implementation of the bus contracts.
///
/// Each topic is a fixed set of append-only partition logs. A consumer
/// group tracks one committed offset per partition; partitions are
/// distributed round-robin over the group members and redistributed when
/// membership changes. Messages are routed to partitions by key hash, so
/// per-key ordering holds as long as the partition count is stable.
#[derive(Clone)]
pub struct InMemoryEventBus {
    core: Arc<BusCore>,
}

struct BusCore {
    default_partitions: usize,
    inner: Mutex<BusInner>,
    notify: Notify,
    next_member_id: AtomicU64,
}

#[derive(Default)]
struct BusInner {
    topics: HashMap<String, TopicState>,
}

struct TopicState {
    partitions: Vec<Vec<(String, serde_json::Value)>>,
    groups: HashMap<String, GroupState>,
}

struct GroupState {
    members: Vec<u64>,
    generation: u64,
    committed: Vec<u64>,
}

impl InMemoryEventBus {
    pub fn new(default_partitions: usize) -> Self {
        Self {
            core: Arc::new(BusCore {
                default_partitions: default_partitions.max(1),
                inner: Mutex::new(BusInner::default()),
                notify: Notify::new(),
                next_member_id: AtomicU64::new(1),
            }),
        }
    }
}

impl BusCore {
    fn partition_for(key: &str, partitions: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % partitions as u64) as usize
    }

    fn topic_mut<'a>(&self, inner: &'a mut BusInner, topic: &str) -> &'a mut TopicState {
        let partitions = self.default_partitions;
        inner
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState {
                partitions: vec![Vec::new(); partitions],
                groups: HashMap::new(),
            })
    }

    fn leave(&self, topic: &str, group: &str, member_id: u64) {
        if let Ok(mut inner) = self.inner.lock()
            && let Some(topic_state) = inner.topics.get_mut(topic)
            && let Some(group_state) = topic_state.groups.get_mut(group)
        {
            group_state.members.retain(|m| *m != member_id);
            group_state.generation += 1;
        }
        self.notify.notify_waiters();
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(
        &self,
        topic: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), BusError> {
        {
            let mut inner = self
                .core
                .inner
                .lock()
                .map_err(|e| BusError::Lock(e.to_string()))?;
            let topic_state = self.core.topic_mut(&mut inner, topic);
            let partition = BusCore::partition_for(key, topic_state.partitions.len());
            topic_state.partitions[partition].push((key.to_string(), value));
        }
        self.core.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn BusConsumer>, BusError> {
        let member_id = self.core.next_member_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut inner = self
                .core
                .inner
                .lock()
                .map_err(|e| BusError::Lock(e.to_string()))?;
            let topic_state = self.core.topic_mut(&mut inner, topic);
            let partition_count = topic_state.partitions.len();
            let group_state = topic_state
                .groups
                .entry(group.to_string())
                .or_insert_with(|| GroupState {
                    members: Vec::new(),
                    generation: 0,
                    committed: vec![0; partition_count],
                });
            group_state.members.push(member_id);
            group_state.generation += 1;
        }
        self.core.notify.notify_waiters();

        Ok(Box::new(InMemoryConsumer {
            core: self.core.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            member_id,
            generation_seen: 0,
            assigned: Vec::new(),
            cursors: HashMap::new(),
        }))
    }

    async fn commit(&self, group: &str, message: &BusMessage) -> Result<(), BusError> {
        let mut inner = self
            .core
            .inner
            .lock()
            .map_err(|e| BusError::Lock(e.to_string()))?;
        let topic_state = inner
            .topics
            .get_mut(&message.topic)
            .ok_or_else(|| BusError::UnknownTopic(message.topic.clone()))?;
        let group_state = topic_state
            .groups
            .get_mut(group)
            .ok_or_else(|| BusError::UnknownTopic(format!("{}/{}", message.topic, group)))?;
        let committed = &mut group_state.committed[message.partition];
        *committed = (*committed).max(message.offset + 1);
        Ok(())
    }

    fn lag(&self, topic: &str, group: &str) -> u64 {
        let Ok(inner) = self.core.inner.lock() else {
            return 0;
        };
        let Some(topic_state) = inner.topics.get(topic) else {
            return 0;
        };
        let Some(group_state) = topic_state.groups.get(group) else {
            return topic_state
                .partitions
                .iter()
                .map(|p| p.len() as u64)
                .sum();
        };
        topic_state
            .partitions
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.len() as u64).saturating_sub(group_state.committed[idx]))
            .sum()
    }
}

struct InMemoryConsumer {
    core: Arc<BusCore>,
    topic: String,
    group: String,
    member_id: u64,
    generation_seen: u64,
    assigned: Vec<usize>,
    cursors: HashMap<usize, u64>,
}

impl InMemoryConsumer {
    /// Returns the next readable message, refreshing the partition
    /// assignment whenever the group generation moved.
    fn try_next(&mut self) -> Result<Option<BusMessage>, BusError> {
        let inner = self
            .core
            .inner
            .lock()
            .map_err(|e| BusError::Lock(e.to_string()))?;
        let Some(topic_state) = inner.topics.get(&self.topic) else {
            return Ok(None);
        };
        let Some(group_state) = topic_state.groups.get(&self.group) else {
            return Ok(None);
        };

        if group_state.generation != self.generation_seen {
            self.generation_seen = group_state.generation;
            self.assigned.clear();
            self.cursors.clear();
            if let Some(rank) = group_state
                .members
                .iter()
                .position(|m| *m == self.member_id)
            {
                let member_count = group_state.members.len();
                for partition in 0..topic_state.partitions.len() {
                    if partition % member_count == rank {
                        self.assigned.push(partition);
                        // restart from the committed offset: everything
                        // uncommitted is redelivered after a rebalance
                        self.cursors
                            .insert(partition, group_state.committed[partition]);
                    }
                }
            }
        }

        for partition in &self.assigned {
            let cursor = self.cursors.get(partition).copied().unwrap_or(0);
            let log = &topic_state.partitions[*partition];
            if (cursor as usize) < log.len() {
                let (key, value) = log[cursor as usize].clone();
                self.cursors.insert(*partition, cursor + 1);
                return Ok(Some(BusMessage {
                    topic: self.topic.clone(),
                    partition: *partition,
                    offset: cursor,
                    key,
                    value,
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl BusConsumer for InMemoryConsumer {
    async fn poll(&mut self) -> Option<BusMessage> {
        loop {
            match self.try_next() {
                Ok(Some(message)) => return Some(message),
                Ok(None) => {}
                Err(_) => return None,
            }
            // The timeout covers notifications raced away between the
            // unlocked check and the await.
            let _ =
                tokio::time::timeout(Duration::from_millis(100), self.core.notify.notified())
                    .await;
        }
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        self.core.leave(&self.topic, &self.group, self.member_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[tokio::test]
    async fn per_key_ordering_is_preserved() {
        let bus = InMemoryEventBus::new(3);
        for i in 0..5 {
            bus.publish("orders", "tenant-a", json!({ "seq": i }))
                .await
                .unwrap();
        }

        let mut consumer = bus.subscribe("orders", "workers").await.unwrap();
        for expected in 0..5 {
            let message = consumer.poll().await.unwrap();
            assert_eq!(message.value["seq"], expected);
            bus.commit("workers", &message).await.unwrap();
        }
        assert_eq!(bus.lag("orders", "workers"), 0);
    }

    #[tokio::test]
    async fn distinct_groups_see_every_message() {
        let bus = InMemoryEventBus::new(3);
        bus.publish("orders", "k", json!(1)).await.unwrap();

        let mut first = bus.subscribe("orders", "group-a").await.unwrap();
        let mut second = bus.subscribe("orders", "group-b").await.unwrap();
        assert_eq!(first.poll().await.unwrap().value, json!(1));
        assert_eq!(second.poll().await.unwrap().value, json!(1));
    }

    #[tokio::test]
    async fn partitions_are_distributed_across_group_members() {
        let bus = InMemoryEventBus::new(4);
        // distinct keys to cover several partitions
        for i in 0..40 {
            bus.publish("orders", &format!("key-{i}"), json!(i))
                .await
                .unwrap();
        }

        let mut a = bus.subscribe("orders", "workers").await.unwrap();
        let mut b = bus.subscribe("orders", "workers").await.unwrap();

        let mut seen_partitions_a = std::collections::HashSet::new();
        let mut seen_partitions_b = std::collections::HashSet::new();
        for _ in 0..10 {
            if let Ok(Some(m)) = tokio::time::timeout(Duration::from_millis(200), a.poll()).await
            {
                seen_partitions_a.insert(m.partition);
                bus.commit("workers", &m).await.unwrap();
            }
            if let Ok(Some(m)) = tokio::time::timeout(Duration::from_millis(200), b.poll()).await
            {
                seen_partitions_b.insert(m.partition);
                bus.commit("workers", &m).await.unwrap();
            }
        }

        assert!(seen_partitions_a.is_disjoint(&seen_partitions_b));
    }

    #[tokio::test]
    async fn uncommitted_messages_are_redelivered_after_member_leaves() {
        let bus = InMemoryEventBus::new(1);
        bus.publish("orders", "k", json!("payload")).await.unwrap();

        {
            let mut consumer = bus.subscribe("orders", "workers").await.unwrap();
            let message = consumer.poll().await.unwrap();
            assert_eq!(message.value, json!("payload"));
            // dropped without commit
        }

        let mut replacement = bus.subscribe("orders", "workers").await.unwrap();
        let redelivered = replacement.poll().await.unwrap();
        assert_eq!(redelivered.value, json!("payload"));
        bus.commit("workers", &redelivered).await.unwrap();
        assert_eq!(bus.lag("orders", "workers"), 0);
    }
}
