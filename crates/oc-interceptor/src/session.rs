// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-stream node attribution.
//!
//! A stream may carry spans from several nodes. A message that names a node switches the
//! stream to that node; a message without one belongs to the last node the stream named. This
//! state lives only as long as the stream, while every stream writes into the shared
//! [`BatchTable`].

use std::sync::Arc;
use tracing::{error, trace, warn};

use crate::batch::BatchTable;
use crate::errors::{AttributionError, InterceptorError};
use crate::node::{ExportTraceRequest, NodeIdentity};
use crate::registry::{CanonicalNode, NodeRegistry};
use crate::scheduler::BatchScheduler;

pub struct StreamSession {
    id: u64,
    registry: Arc<NodeRegistry>,
    batches: Arc<BatchTable>,
    scheduler: Arc<BatchScheduler>,
    span_buffer_count: Option<usize>,
    last_node: Option<CanonicalNode>,
}

impl StreamSession {
    pub(crate) fn new(
        id: u64,
        registry: Arc<NodeRegistry>,
        batches: Arc<BatchTable>,
        scheduler: Arc<BatchScheduler>,
        span_buffer_count: Option<usize>,
    ) -> Self {
        Self {
            id,
            registry,
            batches,
            scheduler,
            span_buffer_count,
            last_node: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The node that messages without a node field are attributed to.
    #[must_use]
    pub fn last_node(&self) -> Option<&Arc<NodeIdentity>> {
        self.last_node.as_ref().map(|canonical| &canonical.node)
    }

    /// Resolves the node a message belongs to and records it as the stream's last node.
    pub fn attribute(
        &mut self,
        node: Option<NodeIdentity>,
    ) -> Result<CanonicalNode, InterceptorError> {
        if let Some(node) = node {
            let canonical = self.registry.canonicalize(node)?;
            self.last_node = Some(canonical.clone());
            return Ok(canonical);
        }

        match &self.last_node {
            Some(last) => Ok(last.clone()),
            None => {
                warn!("Stream {} sent spans before declaring a node", self.id);
                Err(AttributionError::UnspecifiedNode { stream: self.id }.into())
            }
        }
    }

    /// Attributes one message and appends its spans to that node's batch. Returns how many
    /// spans were accepted.
    pub async fn handle(&mut self, request: ExportTraceRequest) -> Result<usize, InterceptorError> {
        let node = self.attribute(request.node)?;
        let accepted = request.spans.len();
        let pending = self.batches.append(&node, request.spans);
        trace!(
            "Stream {} attributed {accepted} spans to {} ({pending} pending)",
            self.id,
            node.node
        );

        if self
            .span_buffer_count
            .is_some_and(|threshold| pending >= threshold)
        {
            if let Err(e) = self.scheduler.flush(&node.key).await {
                error!("Failed to flush full batch for node {}: {e}", node.node);
            }
        }
        Ok(accepted)
    }
}
