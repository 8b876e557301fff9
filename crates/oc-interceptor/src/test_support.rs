// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the interceptor's unit tests.

#![cfg(test)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::errors::SinkError;
use crate::node::{NodeIdentity, Span};
use crate::sink::{Acknowledgement, SpanSink};

/// Sink that records every delivery in call order.
#[derive(Default)]
pub(crate) struct RecordingSink {
    deliveries: Mutex<Vec<(Arc<NodeIdentity>, Vec<Span>)>>,
    fail_for_pid: Option<u32>,
    save_at_most: Option<u64>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Rejects every delivery for nodes with this pid.
    pub(crate) fn failing_for_pid(pid: u32) -> Arc<Self> {
        Arc::new(Self {
            fail_for_pid: Some(pid),
            ..Default::default()
        })
    }

    /// Acknowledges no more than `saved` spans per delivery.
    pub(crate) fn saving_at_most(saved: u64) -> Arc<Self> {
        Arc::new(Self {
            save_at_most: Some(saved),
            ..Default::default()
        })
    }

    pub(crate) fn deliveries(&self) -> Vec<(Arc<NodeIdentity>, Vec<Span>)> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Spans per node, concatenated across deliveries, keyed by `Display` of the node.
    pub(crate) fn spans_by_node(&self) -> HashMap<String, Vec<Span>> {
        let mut by_node: HashMap<String, Vec<Span>> = HashMap::new();
        for (node, spans) in self.deliveries() {
            by_node.entry(node.to_string()).or_default().extend(spans);
        }
        by_node
    }

    pub(crate) fn span_count(&self) -> usize {
        self.deliveries().iter().map(|(_, spans)| spans.len()).sum()
    }
}

#[async_trait]
impl SpanSink for RecordingSink {
    async fn receive_spans(
        &self,
        node: Arc<NodeIdentity>,
        spans: Vec<Span>,
    ) -> Result<Acknowledgement, SinkError> {
        let pid = node.identifier.as_ref().map(|id| id.pid);
        if pid.is_some() && pid == self.fail_for_pid {
            return Err(SinkError::Unavailable("intake refused connection".into()));
        }
        let count = spans.len() as u64;
        self.deliveries.lock().unwrap().push((node, spans));
        Ok(Acknowledgement {
            saved_spans: self.save_at_most.map_or(count, |max| count.min(max)),
        })
    }
}

pub(crate) fn span(trace_id: &str) -> Span {
    Span {
        trace_id: trace_id.as_bytes().to_vec(),
        ..Default::default()
    }
}
