// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::errors::SinkError;
use crate::node::{NodeIdentity, Span};

/// What the sink reports back for one delivered batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Acknowledgement {
    pub saved_spans: u64,
}

/// Downstream consumer of flushed batches.
///
/// Each call carries every span pending for one node, in arrival order. Implementations own
/// their own retry and backpressure policy; a returned error means the spans are gone.
#[async_trait]
pub trait SpanSink {
    async fn receive_spans(
        &self,
        node: Arc<NodeIdentity>,
        spans: Vec<Span>,
    ) -> Result<Acknowledgement, SinkError>;
}

/// Sink that only reports deliveries through `tracing`. Used by the standalone collector when
/// no exporter is wired in.
#[derive(Debug, Clone, Default)]
pub struct LoggingSink;

#[async_trait]
impl SpanSink for LoggingSink {
    async fn receive_spans(
        &self,
        node: Arc<NodeIdentity>,
        spans: Vec<Span>,
    ) -> Result<Acknowledgement, SinkError> {
        debug!("Received {} spans from node {}", spans.len(), node);
        for span in &spans {
            trace!(
                "  - {}: trace_id={:02x?}",
                span.name.as_deref().unwrap_or("<unnamed>"),
                span.trace_id
            );
        }
        Ok(Acknowledgement {
            saved_spans: spans.len() as u64,
        })
    }
}
