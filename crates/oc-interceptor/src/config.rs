// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use crate::errors::InterceptorError;

const DEFAULT_SPAN_BUFFER_PERIOD: Duration = Duration::from_millis(100);
const DEFAULT_RECEIVER_HOST: &str = "127.0.0.1";
const DEFAULT_RECEIVER_PORT: u16 = 55678;
const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Configuration for the interceptor and its receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptorConfig {
    /// Minimum time a node's batch accumulates before the scheduler flushes it
    pub span_buffer_period: Duration,
    /// Flush a node immediately once this many spans are pending for it
    pub span_buffer_count: Option<usize>,
    /// Forget nodes whose batch stayed empty and untouched for this long
    pub node_idle_timeout: Option<Duration>,
    /// Host the receiver binds to
    pub host: String,
    /// Port the receiver binds to, 0 picks an ephemeral port
    pub port: u16,
    /// Longest accepted export frame, in bytes
    pub max_frame_bytes: usize,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            span_buffer_period: DEFAULT_SPAN_BUFFER_PERIOD,
            span_buffer_count: None,
            node_idle_timeout: None,
            host: DEFAULT_RECEIVER_HOST.to_string(),
            port: DEFAULT_RECEIVER_PORT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            log_level: "info".to_string(),
        }
    }
}

impl InterceptorConfig {
    #[must_use]
    pub fn with_span_buffer_period(mut self, period: Duration) -> Self {
        self.span_buffer_period = period;
        self
    }

    #[must_use]
    pub fn with_span_buffer_count(mut self, count: usize) -> Self {
        self.span_buffer_count = Some(count);
        self
    }

    #[must_use]
    pub fn with_node_idle_timeout(mut self, timeout: Duration) -> Self {
        self.node_idle_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_address(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, InterceptorError> {
        let defaults = Self::default();

        let span_buffer_period = env::var("OC_SPAN_BUFFER_PERIOD_MS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map_or(defaults.span_buffer_period, Duration::from_millis);
        // 0 disables the count threshold and idle eviction
        let span_buffer_count = env::var("OC_SPAN_BUFFER_COUNT")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .filter(|count| *count > 0);
        let node_idle_timeout = env::var("OC_NODE_IDLE_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let host = env::var("OC_RECEIVER_HOST").unwrap_or(defaults.host);
        let port = env::var("OC_RECEIVER_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(defaults.port);
        let max_frame_bytes = env::var("OC_MAX_FRAME_BYTES")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(defaults.max_frame_bytes);
        let log_level = env::var("OC_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            span_buffer_period,
            span_buffer_count,
            node_idle_timeout,
            host,
            port,
            max_frame_bytes,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), InterceptorError> {
        if self.span_buffer_period.is_zero() {
            return Err(InterceptorError::InvalidConfig(
                "span buffer period must be greater than 0".to_string(),
            ));
        }

        if self.span_buffer_count == Some(0) {
            return Err(InterceptorError::InvalidConfig(
                "span buffer count must be greater than 0 when set".to_string(),
            ));
        }

        if self.host.trim().is_empty() {
            return Err(InterceptorError::InvalidConfig(
                "receiver host cannot be empty".to_string(),
            ));
        }

        if self.max_frame_bytes == 0 {
            return Err(InterceptorError::InvalidConfig(
                "max frame bytes must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(InterceptorError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}
