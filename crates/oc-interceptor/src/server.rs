// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP receiver for export streams.
//!
//! Each accepted connection is one export stream. Frames are newline-delimited JSON
//! [`ExportTraceRequest`]s; nothing is written back. A connection that sends a malformed or
//! oversized frame, or violates attribution, is closed without affecting other connections.

use futures::future;
use futures::StreamExt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, error, info, warn};

use crate::errors::InterceptorError;
use crate::interceptor::OcInterceptor;
use crate::node::ExportTraceRequest;

pub struct TraceReceiver {
    interceptor: Arc<OcInterceptor>,
    listener: TcpListener,
}

impl TraceReceiver {
    /// Binds to the host and port from the interceptor's configuration.
    pub async fn bind(interceptor: Arc<OcInterceptor>) -> Result<Self, InterceptorError> {
        let addr = format!("{}:{}", interceptor.config().host, interceptor.config().port);
        let listener = TcpListener::bind(&addr).await?;
        Ok(Self {
            interceptor,
            listener,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections until the interceptor's cancel token fires, then aborts the
    /// connections still open.
    pub async fn serve(self) -> Result<(), InterceptorError> {
        let cancel_token = self.interceptor.cancel_token();
        let max_frame_bytes = self.interceptor.config().max_frame_bytes;
        let mut joinset = JoinSet::new();

        if let Ok(addr) = self.listener.local_addr() {
            info!("Trace receiver listening on {addr}");
        }

        loop {
            let (conn, peer) = tokio::select! {
                () = cancel_token.cancelled() => break,
                con_res = self.listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Receiver error: {e}");
                        return Err(e.into());
                    }
                    Ok(accepted) => accepted,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill the receiver on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };

            let interceptor = Arc::clone(&self.interceptor);
            joinset.spawn(async move {
                handle_connection(&interceptor, conn, peer, max_frame_bytes).await;
            });
        }

        debug!("Trace receiver stopping, closing {} connections", joinset.len());
        joinset.shutdown().await;
        Ok(())
    }
}

async fn handle_connection(
    interceptor: &OcInterceptor,
    conn: TcpStream,
    peer: SocketAddr,
    max_frame_bytes: usize,
) {
    debug!("Accepted export stream from {peer}");
    let requests = FramedRead::new(conn, LinesCodec::new_with_max_length(max_frame_bytes))
        .filter_map(|frame| future::ready(decode_frame(frame)));

    match interceptor.export(requests).await {
        Ok(accepted) => debug!("Export stream from {peer} ended after {accepted} spans"),
        Err(e) => warn!("Closed export stream from {peer}: {e}"),
    }
}

/// Blank lines are keep-alives and are skipped.
fn decode_frame(
    frame: Result<String, LinesCodecError>,
) -> Option<Result<ExportTraceRequest, InterceptorError>> {
    match frame {
        Ok(line) if line.trim().is_empty() => None,
        Ok(line) => Some(serde_json::from_str(&line).map_err(InterceptorError::Decode)),
        Err(e) => Some(Err(e.into())),
    }
}
