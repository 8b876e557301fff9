// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-node span accumulation.
//!
//! Every node gets one [`SpanBatch`] that lives for as long as the node is known. A batch opens
//! a window when its first span arrives and closes it when it is drained. The [`BatchTable`] is
//! the node→batch map shared by every stream session and the flush scheduler.
//!
//! A batch and its registry entry are created and evicted together under the table lock, so
//! every batch holds the instance the [`NodeRegistry`] has on record for its key.

use std::collections::HashMap;
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::node::{NodeIdentity, NodeKey, Span};
use crate::registry::{CanonicalNode, NodeRegistry};

#[derive(Debug)]
pub struct SpanBatch {
    node: Arc<NodeIdentity>,
    pending: Vec<Span>,
    window_start: Option<Instant>,
    last_activity: Instant,
}

impl SpanBatch {
    #[must_use]
    pub fn new(node: Arc<NodeIdentity>, now: Instant) -> Self {
        Self {
            node,
            pending: Vec::new(),
            window_start: None,
            last_activity: now,
        }
    }

    #[must_use]
    pub fn node(&self) -> &Arc<NodeIdentity> {
        &self.node
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    #[must_use]
    pub fn window_start(&self) -> Option<Instant> {
        self.window_start
    }

    /// Appends in arrival order. The window opens on the empty→non-empty transition only.
    pub fn append(&mut self, spans: Vec<Span>, now: Instant) {
        self.last_activity = now;
        if spans.is_empty() {
            return;
        }
        if self.pending.is_empty() {
            self.window_start = Some(now);
        }
        self.pending.extend(spans);
    }

    /// True once the open window is at least `period` old.
    #[must_use]
    pub fn is_due(&self, now: Instant, period: Duration) -> bool {
        self.window_start
            .is_some_and(|start| now.saturating_duration_since(start) >= period)
    }

    #[must_use]
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        self.pending.is_empty() && now.saturating_duration_since(self.last_activity) >= timeout
    }

    /// Swaps the pending spans for an empty list and closes the window.
    pub fn take(&mut self) -> Vec<Span> {
        self.window_start = None;
        mem::take(&mut self.pending)
    }
}

/// Spans removed from a batch, ready for delivery.
#[derive(Debug)]
pub struct DrainedBatch {
    pub key: NodeKey,
    pub node: Arc<NodeIdentity>,
    pub spans: Vec<Span>,
}

#[derive(Debug)]
pub struct BatchTable {
    registry: Arc<NodeRegistry>,
    batches: Mutex<HashMap<NodeKey, SpanBatch>>,
}

impl BatchTable {
    #[must_use]
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self {
            registry,
            batches: Mutex::new(HashMap::new()),
        }
    }

    /// Appends `spans` to the node's batch, creating the batch on first sight.
    /// Returns the number of spans now pending for that node.
    pub fn append(&self, node: &CanonicalNode, spans: Vec<Span>) -> usize {
        let now = Instant::now();

        #[allow(clippy::expect_used)]
        let mut batches = self.batches.lock().expect("lock poisoned");
        let batch = batches
            .entry(node.key.clone())
            .or_insert_with(|| SpanBatch::new(self.registry.reinstate(node), now));
        batch.append(spans, now);
        batch.len()
    }

    /// Drains one node's batch. `None` if the node is unknown or has nothing pending.
    pub fn take(&self, key: &NodeKey) -> Option<DrainedBatch> {
        #[allow(clippy::expect_used)]
        let mut batches = self.batches.lock().expect("lock poisoned");
        let batch = batches.get_mut(key)?;
        if batch.is_empty() {
            return None;
        }
        Some(DrainedBatch {
            key: key.clone(),
            node: Arc::clone(batch.node()),
            spans: batch.take(),
        })
    }

    /// Drains every batch whose window is at least `period` old.
    pub fn take_due(&self, now: Instant, period: Duration) -> Vec<DrainedBatch> {
        self.drain_where(|batch| batch.is_due(now, period))
    }

    /// Drains every non-empty batch.
    pub fn take_all(&self) -> Vec<DrainedBatch> {
        self.drain_where(|batch| !batch.is_empty())
    }

    fn drain_where(&self, mut predicate: impl FnMut(&SpanBatch) -> bool) -> Vec<DrainedBatch> {
        #[allow(clippy::expect_used)]
        let mut batches = self.batches.lock().expect("lock poisoned");
        batches
            .iter_mut()
            .filter(|(_, batch)| predicate(batch))
            .map(|(key, batch)| DrainedBatch {
                key: key.clone(),
                node: Arc::clone(batch.node()),
                spans: batch.take(),
            })
            .collect()
    }

    /// Removes batches that are empty and untouched for `timeout`, along with their registry
    /// entries. Returns the evicted nodes.
    pub fn evict_idle(&self, now: Instant, timeout: Duration) -> Vec<Arc<NodeIdentity>> {
        #[allow(clippy::expect_used)]
        let mut batches = self.batches.lock().expect("lock poisoned");
        let idle: Vec<NodeKey> = batches
            .iter()
            .filter(|(_, batch)| batch.is_idle(now, timeout))
            .map(|(key, _)| key.clone())
            .collect();
        idle.iter()
            .filter_map(|key| {
                self.registry.evict(key);
                batches.remove(key).map(|batch| batch.node)
            })
            .collect()
    }

    /// Start of the oldest open window across all nodes.
    #[must_use]
    pub fn earliest_window(&self) -> Option<Instant> {
        #[allow(clippy::expect_used)]
        let batches = self.batches.lock().expect("lock poisoned");
        batches.values().filter_map(SpanBatch::window_start).min()
    }

    #[must_use]
    pub fn pending_spans(&self) -> usize {
        #[allow(clippy::expect_used)]
        let batches = self.batches.lock().expect("lock poisoned");
        batches.values().map(SpanBatch::len).sum()
    }

    /// Number of nodes that currently own a batch, empty or not.
    #[must_use]
    pub fn len(&self) -> usize {
        #[allow(clippy::expect_used)]
        let batches = self.batches.lock().expect("lock poisoned");
        batches.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
