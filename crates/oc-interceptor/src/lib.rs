// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ingestion front-end for streamed trace exports.
//!
//! Agents open a long-lived stream and send [`ExportTraceRequest`](node::ExportTraceRequest)s.
//! Spans are grouped per reporting node, buffered for a short window, and handed to a
//! [`SpanSink`](sink::SpanSink) as one batch per node.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch;
pub mod config;
pub mod errors;
pub mod interceptor;
pub mod node;
pub mod registry;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod sink;

mod test_support;
