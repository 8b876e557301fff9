// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use crate::node::NodeIdentity;
use crate::scheduler::FlushStats;

/// A message could not be attributed to any node.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributionError {
    #[error("protocol violation on stream {stream}: the first message must carry a node")]
    UnspecifiedNode { stream: u64 },
}

/// The downstream sink did not accept a delivered batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("sink rejected spans: {0}")]
    Rejected(String),

    #[error("sink saved {saved} of {expected} spans")]
    PartialAcknowledgement { expected: u64, saved: u64 },

    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// One batch that was removed from the table but not accepted by the sink.
#[derive(Debug)]
pub struct SinkFailure {
    pub node: Arc<NodeIdentity>,
    pub dropped_spans: usize,
    pub error: SinkError,
}

/// Returned by a flush when at least one batch delivery failed. Every due batch is still
/// attempted; `delivered` counts the ones that succeeded.
#[derive(Debug, thiserror::Error)]
#[error("{} of {} batch deliveries failed", .failures.len(), .attempted)]
pub struct FlushError {
    pub attempted: usize,
    pub delivered: FlushStats,
    pub failures: Vec<SinkFailure>,
}

impl FlushError {
    #[must_use]
    pub fn dropped_spans(&self) -> usize {
        self.failures.iter().map(|f| f.dropped_spans).sum()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InterceptorError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to encode node identity: {0}")]
    NodeEncoding(#[source] serde_json::Error),

    #[error(transparent)]
    Attribution(#[from] AttributionError),

    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("Framing error: {0}")]
    Frame(#[from] tokio_util::codec::LinesCodecError),

    #[error("Failed to decode export request: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),
}
