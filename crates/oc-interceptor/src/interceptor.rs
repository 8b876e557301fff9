// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry point for inbound export streams.
//!
//! [`OcInterceptor`] owns the node registry, the node→batch table and the flush scheduler.
//! Every inbound stream gets its own [`StreamSession`] bound to that shared state; the
//! scheduler hands consolidated per-node batches to the configured [`SpanSink`].

use futures::{Stream, StreamExt};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::batch::BatchTable;
use crate::config::InterceptorConfig;
use crate::errors::{FlushError, InterceptorError};
use crate::node::ExportTraceRequest;
use crate::registry::NodeRegistry;
use crate::scheduler::{BatchScheduler, FlushStats};
use crate::session::StreamSession;
use crate::sink::SpanSink;

pub struct OcInterceptor {
    config: InterceptorConfig,
    registry: Arc<NodeRegistry>,
    batches: Arc<BatchTable>,
    scheduler: Arc<BatchScheduler>,
    next_stream_id: AtomicU64,
    cancel_token: CancellationToken,
}

impl OcInterceptor {
    pub fn new(
        sink: Arc<dyn SpanSink + Send + Sync>,
        config: InterceptorConfig,
    ) -> Result<Self, InterceptorError> {
        config.validate()?;

        let registry = Arc::new(NodeRegistry::new());
        let batches = Arc::new(BatchTable::new(Arc::clone(&registry)));
        let scheduler = Arc::new(BatchScheduler::new(Arc::clone(&batches), sink, &config));

        Ok(Self {
            config,
            registry,
            batches,
            scheduler,
            next_stream_id: AtomicU64::new(1),
            cancel_token: CancellationToken::new(),
        })
    }

    #[must_use]
    pub fn config(&self) -> &InterceptorConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Spans accepted but not yet handed to the sink.
    #[must_use]
    pub fn pending_spans(&self) -> usize {
        self.batches.pending_spans()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown). Receivers listen on it to stop
    /// accepting streams.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Opens a session for a new inbound stream.
    #[must_use]
    pub fn session(&self) -> StreamSession {
        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        StreamSession::new(
            id,
            Arc::clone(&self.registry),
            Arc::clone(&self.batches),
            Arc::clone(&self.scheduler),
            self.config.span_buffer_count,
        )
    }

    /// Consumes one export stream until it ends or fails. Returns the number of spans accepted.
    ///
    /// A transport error or an attribution error ends this stream only; spans already accepted
    /// stay buffered and are flushed as usual. Once [`shutdown`](Self::shutdown) is called the
    /// stream is cut off with [`InterceptorError::Stream`] and nothing more is appended.
    pub async fn export<S, E>(&self, stream: S) -> Result<usize, InterceptorError>
    where
        S: Stream<Item = Result<ExportTraceRequest, E>>,
        E: Into<InterceptorError>,
    {
        let mut session = self.session();
        let mut accepted = 0;
        let mut messages = 0u64;
        debug!("Stream {} opened", session.id());

        futures::pin_mut!(stream);
        loop {
            let next = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => {
                    debug!("Stream {} cut off by shutdown", session.id());
                    return Err(shut_down());
                }
                next = stream.next() => next,
            };
            let Some(next) = next else {
                break;
            };
            let request = match next {
                Ok(request) => request,
                Err(e) => {
                    let e = e.into();
                    error!("Stream {} failed: {e}", session.id());
                    return Err(e);
                }
            };
            messages += 1;
            match session.handle(request).await {
                Ok(count) => accepted += count,
                Err(e) => {
                    error!("Stream {} terminated: {e}", session.id());
                    return Err(e);
                }
            }

            // shutdown's final flush may already have run; deliver what this message added
            if self.cancel_token.is_cancelled() {
                if let Err(e) = self.flush().await {
                    error!("Dropped {} spans after shutdown: {e}", e.dropped_spans());
                }
                return Err(shut_down());
            }
        }

        debug!(
            "Stream {} closed after {messages} messages and {accepted} spans",
            session.id()
        );
        Ok(accepted)
    }

    /// Spawns the background flush loop. It stops when [`shutdown`](Self::shutdown) is called.
    pub fn start(&self) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let cancel_token = self.cancel_token.clone();
        tokio::spawn(async move {
            scheduler.run(cancel_token).await;
        })
    }

    /// Delivers every pending batch now, regardless of window age.
    pub async fn flush(&self) -> Result<FlushStats, FlushError> {
        self.scheduler.flush_all().await
    }

    /// Stops the flush loop, receivers and open export streams, then drains everything still
    /// buffered.
    pub async fn shutdown(&self) -> Result<FlushStats, FlushError> {
        self.cancel_token.cancel();
        let stats = self.flush().await?;
        info!(
            "Interceptor stopped after flushing {} spans from {} nodes",
            stats.spans, stats.batches
        );
        Ok(stats)
    }
}

fn shut_down() -> InterceptorError {
    InterceptorError::Stream("interceptor shut down".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AttributionError;
    use crate::node::{Language, NodeIdentity, Span};
    use crate::test_support::{span, RecordingSink};
    use std::time::Duration;

    fn interceptor(sink: Arc<RecordingSink>) -> OcInterceptor {
        OcInterceptor::new(
            sink,
            InterceptorConfig::default().with_span_buffer_period(Duration::from_millis(90)),
        )
        .unwrap()
    }

    fn message(
        node: Option<&NodeIdentity>,
        spans: Vec<Span>,
    ) -> Result<ExportTraceRequest, InterceptorError> {
        Ok(ExportTraceRequest {
            node: node.cloned(),
            spans,
        })
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let result = OcInterceptor::new(
            RecordingSink::new(),
            InterceptorConfig::default().with_span_buffer_period(Duration::ZERO),
        );
        assert!(matches!(result, Err(InterceptorError::InvalidConfig(_))));
    }

    #[test]
    fn test_sessions_get_distinct_ids() {
        let oci = interceptor(RecordingSink::new());
        assert_ne!(oci.session().id(), oci.session().id());
    }

    #[tokio::test]
    async fn test_export_multiplexes_nodes() {
        let sink = RecordingSink::new();
        let oci = interceptor(Arc::clone(&sink));
        let node_a = NodeIdentity::new("host-a", 1, Language::Java);
        let node_b = NodeIdentity::new("host-b", 2, Language::NodeJs);

        let stream = futures::stream::iter(vec![
            message(Some(&node_a), vec![span("s1")]),
            message(None, vec![span("s2")]),
            message(Some(&node_b), vec![span("s3")]),
            message(None, vec![span("s4")]),
        ]);
        assert_eq!(oci.export(stream).await.unwrap(), 4);

        oci.flush().await.unwrap();
        let by_node = sink.spans_by_node();
        assert_eq!(by_node.len(), 2);
        assert_eq!(by_node[&node_a.to_string()], vec![span("s1"), span("s2")]);
        assert_eq!(by_node[&node_b.to_string()], vec![span("s3"), span("s4")]);
    }

    #[tokio::test]
    async fn test_export_stops_on_attribution_error() {
        let sink = RecordingSink::new();
        let oci = interceptor(Arc::clone(&sink));
        let node = NodeIdentity::new("late", 3, Language::Ruby);

        let stream = futures::stream::iter(vec![
            message(None, vec![span("orphan")]),
            message(Some(&node), vec![span("never-read")]),
        ]);
        let err = oci.export(stream).await.unwrap_err();

        assert!(matches!(
            err,
            InterceptorError::Attribution(AttributionError::UnspecifiedNode { .. })
        ));
        assert_eq!(oci.pending_spans(), 0);
        assert!(oci.registry().is_empty());
    }

    #[tokio::test]
    async fn test_transport_error_keeps_accepted_spans() {
        let sink = RecordingSink::new();
        let oci = interceptor(Arc::clone(&sink));
        let node = NodeIdentity::new("flaky", 4, Language::Cpp);

        let stream = futures::stream::iter(vec![
            message(Some(&node), vec![span("kept")]),
            Err(InterceptorError::Stream("connection reset".into())),
        ]);
        assert!(matches!(
            oci.export(stream).await,
            Err(InterceptorError::Stream(_))
        ));
        assert_eq!(oci.pending_spans(), 1);

        oci.flush().await.unwrap();
        assert_eq!(sink.span_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_streams_share_batches() {
        let sink = RecordingSink::new();
        let oci = Arc::new(interceptor(Arc::clone(&sink)));
        let node = NodeIdentity::new("shared", 5, Language::GoLang);

        let tasks: Vec<_> = (0..4)
            .map(|i| {
                let oci = Arc::clone(&oci);
                let node = node.clone();
                tokio::spawn(async move {
                    let stream = futures::stream::iter(vec![
                        message(Some(&node), vec![span(&format!("{i}-a"))]),
                        message(None, vec![span(&format!("{i}-b"))]),
                    ]);
                    oci.export(stream).await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), 2);
        }

        oci.flush().await.unwrap();
        let deliveries = sink.deliveries();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].1.len(), 8);
        assert_eq!(oci.registry().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_and_shutdown() {
        let sink = RecordingSink::new();
        let oci = interceptor(Arc::clone(&sink));
        let handle = oci.start();
        let node = NodeIdentity::new("ticking", 6, Language::CSharp);

        let stream = futures::stream::iter(vec![message(Some(&node), vec![span("first")])]);
        oci.export(stream).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.span_count(), 1);

        let stream = futures::stream::iter(vec![message(Some(&node), vec![span("second")])]);
        oci.export(stream).await.unwrap();
        let stats = oci.shutdown().await.unwrap();
        assert_eq!(stats.spans, 1);
        assert_eq!(sink.span_count(), 2);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_export_after_shutdown_accepts_nothing() {
        let sink = RecordingSink::new();
        let oci = interceptor(Arc::clone(&sink));
        let handle = oci.start();
        oci.shutdown().await.unwrap();
        handle.await.unwrap();

        let node = NodeIdentity::new("late-comer", 7, Language::Java);
        let stream = futures::stream::iter(vec![message(Some(&node), vec![span("late")])]);
        let err = oci.export(stream).await.unwrap_err();

        assert!(matches!(err, InterceptorError::Stream(_)));
        assert_eq!(oci.pending_spans(), 0);
        assert!(oci.registry().is_empty());
        assert!(sink.deliveries().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_cuts_off_open_stream_and_delivers_its_spans() {
        let sink = RecordingSink::new();
        let oci = Arc::new(interceptor(Arc::clone(&sink)));
        let node = NodeIdentity::new("long-lived", 8, Language::Erlang);

        let stream = futures::stream::iter(vec![message(Some(&node), vec![span("open")])])
            .chain(futures::stream::pending());
        let export = {
            let oci = Arc::clone(&oci);
            tokio::spawn(async move { oci.export(stream).await })
        };
        while oci.pending_spans() == 0 {
            tokio::task::yield_now().await;
        }

        let stats = oci.shutdown().await.unwrap();
        assert_eq!(stats.spans, 1);
        assert!(matches!(
            export.await.unwrap(),
            Err(InterceptorError::Stream(_))
        ));
        assert_eq!(sink.spans_by_node()[&node.to_string()], vec![span("open")]);
        assert_eq!(oci.pending_spans(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_evicted_node_resumed_by_old_stream_stays_canonical() {
        let sink = RecordingSink::new();
        let oci = OcInterceptor::new(
            sink.clone(),
            InterceptorConfig::default()
                .with_span_buffer_period(Duration::from_millis(90))
                .with_node_idle_timeout(Duration::from_secs(1)),
        )
        .unwrap();
        let handle = oci.start();
        let node = NodeIdentity::new("recycled", 9, Language::Java);

        let mut old_stream = oci.session();
        old_stream
            .handle(message(Some(&node), vec![span("before")]).unwrap())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(oci.registry().is_empty());

        old_stream
            .handle(message(None, vec![span("resumed")]).unwrap())
            .await
            .unwrap();
        let mut new_stream = oci.session();
        new_stream
            .handle(message(Some(&node), vec![span("fresh")]).unwrap())
            .await
            .unwrap();
        oci.shutdown().await.unwrap();
        handle.await.unwrap();

        let canonical = oci.registry().get(&node.canonical_key().unwrap()).unwrap();
        let deliveries = sink.deliveries();
        assert_eq!(deliveries.len(), 2);
        assert!(Arc::ptr_eq(&deliveries[1].0, &canonical));
        assert_eq!(deliveries[1].1, vec![span("resumed"), span("fresh")]);
    }
}
