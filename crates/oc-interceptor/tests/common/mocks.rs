// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock sinks for integration tests

use oc_interceptor::errors::SinkError;
use oc_interceptor::node::{NodeIdentity, Span};
use oc_interceptor::sink::{Acknowledgement, SpanSink};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Sink that appends every delivery to a per-node list, keyed by the node's canonical bytes.
#[derive(Default)]
pub struct SpanAppender {
    spans_per_node: Mutex<HashMap<Vec<u8>, Vec<Span>>>,
    instances: Mutex<Vec<Arc<NodeIdentity>>>,
}

impl SpanAppender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spans_per_node(&self) -> HashMap<Vec<u8>, Vec<Span>> {
        self.spans_per_node.lock().unwrap().clone()
    }

    pub fn span_count(&self) -> usize {
        self.spans_per_node
            .lock()
            .unwrap()
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Node instances in delivery order.
    #[allow(dead_code)]
    pub fn instances(&self) -> Vec<Arc<NodeIdentity>> {
        self.instances.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SpanSink for SpanAppender {
    async fn receive_spans(
        &self,
        node: Arc<NodeIdentity>,
        spans: Vec<Span>,
    ) -> Result<Acknowledgement, SinkError> {
        let key = node.canonical_key().unwrap().as_bytes().to_vec();
        let saved_spans = spans.len() as u64;
        self.spans_per_node
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .extend(spans);
        self.instances.lock().unwrap().push(node);
        Ok(Acknowledgement { saved_spans })
    }
}

/// Sink that refuses everything.
#[allow(dead_code)]
pub struct UnavailableSink;

#[async_trait::async_trait]
impl SpanSink for UnavailableSink {
    async fn receive_spans(
        &self,
        _node: Arc<NodeIdentity>,
        _spans: Vec<Span>,
    ) -> Result<Acknowledgement, SinkError> {
        Err(SinkError::Unavailable("intake is down".to_string()))
    }
}
