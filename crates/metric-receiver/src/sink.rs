// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery of line protocol batches to InfluxDB.

use crate::config::InfluxConfig;
use crate::errors::{ConnectivityError, DeliveryError};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use std::time::Duration;
use tracing::{debug, error};

const MAX_IDLE_CONNECTIONS: usize = 20;

/// How many times a write is attempted and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// Attempts, no wait.
    Immediate(usize),
    /// Attempts, and a step in milliseconds: attempt `n` waits `(n - 1) * step`.
    LinearBackoff(usize, u64),
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::LinearBackoff(3, 200)
    }
}

impl RetryStrategy {
    #[must_use]
    pub fn attempts(&self) -> usize {
        match self {
            RetryStrategy::Immediate(attempts) | RetryStrategy::LinearBackoff(attempts, _) => {
                (*attempts).max(1)
            }
        }
    }

    /// Wait before the 1-based `attempt`. The first attempt never waits.
    #[must_use]
    pub fn delay_before(&self, attempt: usize) -> Duration {
        match self {
            RetryStrategy::Immediate(_) => Duration::ZERO,
            RetryStrategy::LinearBackoff(_, step_ms) => {
                Duration::from_millis(step_ms * attempt.saturating_sub(1) as u64)
            }
        }
    }
}

/// Destination of flushed batches.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Liveness check, run once before the shipper starts.
    async fn ping(&self) -> Result<(), ConnectivityError>;
    /// Writes one newline-joined batch, retrying as the sink sees fit.
    async fn write(&self, payload: Bytes) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone)]
pub struct InfluxSink {
    client: reqwest::Client,
    ping_url: String,
    write_url: String,
    retry_strategy: RetryStrategy,
}

impl InfluxSink {
    pub fn new(config: &InfluxConfig) -> Result<Self, ConnectivityError> {
        Self::with_retry_strategy(config, RetryStrategy::default())
    }

    pub fn with_retry_strategy(
        config: &InfluxConfig,
        retry_strategy: RetryStrategy,
    ) -> Result<Self, ConnectivityError> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(MAX_IDLE_CONNECTIONS)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| ConnectivityError::Client(e.to_string()))?;
        let address = format!("{}:{}", config.host.trim_end_matches('/'), config.port);
        Ok(InfluxSink {
            client,
            ping_url: format!("{address}/ping"),
            write_url: format!("{address}/write?db={}", config.database),
            retry_strategy,
        })
    }
}

#[async_trait]
impl Sink for InfluxSink {
    async fn ping(&self) -> Result<(), ConnectivityError> {
        let resp = self
            .client
            .get(&self.ping_url)
            .send()
            .await
            .map_err(|e| ConnectivityError::Transport(e.to_string()))?;
        if resp.status().as_u16() > 299 {
            return Err(ConnectivityError::Status(resp.status()));
        }
        Ok(())
    }

    async fn write(&self, payload: Bytes) -> Result<(), DeliveryError> {
        let attempts = self.retry_strategy.attempts();
        let mut reason = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry_strategy.delay_before(attempt)).await;
            }

            let resp = self
                .client
                .post(&self.write_url)
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(payload.clone())
                .send()
                .await;

            match resp {
                Ok(resp) if resp.status().as_u16() > 300 => {
                    error!(
                        "Got a bad status code while writing to InfluxDB. Status Code: {} (attempt {attempt}/{attempts})",
                        resp.status()
                    );
                    reason = format!("status {}", resp.status());
                }
                Ok(_) => {
                    debug!("Flushed {} bytes successfully", payload.len());
                    return Ok(());
                }
                Err(e) => {
                    error!("Failed to write to InfluxDB. Error: {e} (attempt {attempt}/{attempts})");
                    reason = e.to_string();
                }
            }
        }

        Err(DeliveryError { attempts, reason })
    }
}
