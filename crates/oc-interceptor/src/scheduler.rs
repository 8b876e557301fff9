// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Time-window flush policy for per-node batches.
//!
//! A single background loop sleeps until the oldest open window reaches the buffer period (or
//! one full period when nothing is pending) and then runs [`BatchScheduler::tick`]. Explicit
//! flushes go through the same path.
//!
//! Every flush holds `flush_gate` from the moment it drains the table until the sink has
//! answered. Drain order therefore equals delivery order, which keeps each node's spans in
//! arrival order across flushes. Appends only take the table lock, so a slow sink never blocks
//! ingestion.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::batch::{BatchTable, DrainedBatch};
use crate::config::InterceptorConfig;
use crate::errors::{FlushError, SinkError, SinkFailure};
use crate::node::NodeKey;
use crate::sink::SpanSink;

/// What a successful flush delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub batches: usize,
    pub spans: usize,
}

pub struct BatchScheduler {
    batches: Arc<BatchTable>,
    sink: Arc<dyn SpanSink + Send + Sync>,
    buffer_period: Duration,
    node_idle_timeout: Option<Duration>,
    flush_gate: TokioMutex<()>,
}

impl BatchScheduler {
    pub fn new(
        batches: Arc<BatchTable>,
        sink: Arc<dyn SpanSink + Send + Sync>,
        config: &InterceptorConfig,
    ) -> Self {
        Self {
            batches,
            sink,
            buffer_period: config.span_buffer_period,
            node_idle_timeout: config.node_idle_timeout,
            flush_gate: TokioMutex::new(()),
        }
    }

    /// Flushes every batch whose window is at least one buffer period old, then evicts idle
    /// nodes if eviction is enabled.
    pub async fn tick(&self) -> Result<FlushStats, FlushError> {
        let _gate = self.flush_gate.lock().await;
        let now = Instant::now();
        let due = self.batches.take_due(now, self.buffer_period);
        let result = self.deliver(due).await;

        if let Some(timeout) = self.node_idle_timeout {
            self.evict_idle(now, timeout);
        }
        result
    }

    /// Flushes every non-empty batch regardless of window age.
    pub async fn flush_all(&self) -> Result<FlushStats, FlushError> {
        let _gate = self.flush_gate.lock().await;
        let drained = self.batches.take_all();
        self.deliver(drained).await
    }

    /// Flushes one node's batch. A node with nothing pending is a no-op.
    pub async fn flush(&self, key: &NodeKey) -> Result<FlushStats, FlushError> {
        let _gate = self.flush_gate.lock().await;
        let drained = self.batches.take(key).into_iter().collect();
        self.deliver(drained).await
    }

    /// Drives [`tick`](Self::tick) until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        debug!(
            "Span flusher started with a {} ms buffer period",
            self.buffer_period.as_millis()
        );
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                () = cancel.cancelled() => break,
                () = sleep_until(deadline) => {
                    if let Err(e) = self.tick().await {
                        error!("Dropped {} spans during scheduled flush: {e}", e.dropped_spans());
                    }
                }
            }
        }
        debug!("Span flusher stopped");
    }

    /// When the oldest open window comes due, or one period from now if none is open.
    fn next_deadline(&self) -> Instant {
        match self.batches.earliest_window() {
            Some(start) => start + self.buffer_period,
            None => Instant::now() + self.buffer_period,
        }
    }

    async fn deliver(&self, drained: Vec<DrainedBatch>) -> Result<FlushStats, FlushError> {
        let attempted = drained.len();
        let mut delivered = FlushStats::default();
        let mut failures = Vec::new();

        for batch in drained {
            let count = batch.spans.len();
            debug!("Flushing {count} spans for node {}", batch.node);

            match self
                .sink
                .receive_spans(Arc::clone(&batch.node), batch.spans)
                .await
            {
                Ok(ack) if ack.saved_spans < count as u64 => {
                    let saved = ack.saved_spans;
                    warn!("Sink saved {saved} of {count} spans for node {}", batch.node);
                    failures.push(SinkFailure {
                        node: batch.node,
                        dropped_spans: count - usize::try_from(saved).unwrap_or(count),
                        error: SinkError::PartialAcknowledgement {
                            expected: count as u64,
                            saved,
                        },
                    });
                }
                Ok(_) => {
                    delivered.batches += 1;
                    delivered.spans += count;
                }
                Err(error) => {
                    error!("Error sending {count} spans for node {}: {error}", batch.node);
                    failures.push(SinkFailure {
                        node: batch.node,
                        dropped_spans: count,
                        error,
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(delivered)
        } else {
            Err(FlushError {
                attempted,
                delivered,
                failures,
            })
        }
    }

    fn evict_idle(&self, now: Instant, timeout: Duration) {
        for node in self.batches.evict_idle(now, timeout) {
            debug!("Evicted idle node {node}");
        }
    }
}
