// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, sync::Arc};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use oc_interceptor::{
    config::InterceptorConfig, interceptor::OcInterceptor, server::TraceReceiver,
    sink::LoggingSink,
};

#[tokio::main]
pub async fn main() {
    let log_level = env::var("OC_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(log_level).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");

    let config = match InterceptorConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Error creating config on collector startup: {e}");
            return;
        }
    };

    let interceptor = match OcInterceptor::new(Arc::new(LoggingSink), config) {
        Ok(i) => Arc::new(i),
        Err(e) => {
            error!("Error creating span interceptor: {e}");
            return;
        }
    };
    let flush_loop = interceptor.start();

    let receiver = match TraceReceiver::bind(Arc::clone(&interceptor)).await {
        Ok(r) => r,
        Err(e) => {
            error!("Unable to start trace receiver: {e}");
            return;
        }
    };
    let receiver_handle = tokio::spawn(async move {
        if let Err(e) = receiver.serve().await {
            error!("Trace receiver stopped: {e}");
        }
    });

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {e}");
    }
    info!("Shutting down collector");

    interceptor.cancel_token().cancel();
    if let Err(e) = receiver_handle.await {
        error!("Trace receiver task failed: {e}");
    }
    match interceptor.shutdown().await {
        Ok(stats) => debug!(
            "Final flush delivered {} spans in {} batches",
            stats.spans, stats.batches
        ),
        Err(e) => error!("Final flush dropped {} spans: {e}", e.dropped_spans()),
    }
    if let Err(e) = flush_loop.await {
        error!("Span flusher task failed: {e}");
    }
}
