// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use oc_interceptor::config::InterceptorConfig;
use oc_interceptor::interceptor::OcInterceptor;
use oc_interceptor::node::{ExportTraceRequest, NodeIdentity, Span};
use oc_interceptor::server::TraceReceiver;
use oc_interceptor::sink::SpanSink;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

/// Starts an interceptor with its flush loop and a receiver on an ephemeral local port.
#[allow(dead_code)]
pub async fn start_interceptor(
    sink: Arc<dyn SpanSink + Send + Sync>,
    buffer_period: Duration,
) -> (Arc<OcInterceptor>, SocketAddr) {
    let config = InterceptorConfig::default()
        .with_span_buffer_period(buffer_period)
        .with_address("127.0.0.1", 0);
    let interceptor = Arc::new(OcInterceptor::new(sink, config).expect("valid config"));
    interceptor.start();

    let receiver = TraceReceiver::bind(Arc::clone(&interceptor))
        .await
        .expect("Failed to bind receiver");
    let addr = receiver.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        let _ = receiver.serve().await;
    });

    (interceptor, addr)
}

/// Opens an export stream and writes `requests` as JSON lines. The connection stays open
/// until the returned stream is dropped.
#[allow(dead_code)]
pub async fn send_requests(addr: SocketAddr, requests: &[ExportTraceRequest]) -> TcpStream {
    let mut stream = timeout(Duration::from_secs(2), TcpStream::connect(addr))
        .await
        .expect("connect timed out")
        .expect("Failed to connect to receiver");
    for request in requests {
        write_line(&mut stream, &serde_json::to_string(request).unwrap()).await;
    }
    stream
}

#[allow(dead_code)]
pub async fn write_line(stream: &mut TcpStream, line: &str) {
    stream.write_all(line.as_bytes()).await.unwrap();
    stream.write_all(b"\n").await.unwrap();
    stream.flush().await.unwrap();
}

/// Polls until `condition` holds, failing the test after two seconds.
#[allow(dead_code)]
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    };
    timeout(Duration::from_secs(2), poll)
        .await
        .expect("timed out waiting for condition");
}

pub fn request(node: Option<&NodeIdentity>, spans: &[Span]) -> ExportTraceRequest {
    ExportTraceRequest {
        node: node.cloned(),
        spans: spans.to_vec(),
    }
}

pub fn trace_span(trace_id: &[u8]) -> Span {
    Span {
        trace_id: trace_id.to_vec(),
        ..Default::default()
    }
}

pub fn node_key(node: &NodeIdentity) -> Vec<u8> {
    node.canonical_key().unwrap().as_bytes().to_vec()
}
