// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric receiver: accepts JSON metric events over WebSocket connections,
//! converts them to InfluxDB line protocol, batches them and ships the
//! batches to InfluxDB over HTTP.
//!
//! ```text
//!   WebSocket sessions ──offer──> intake queue ──> Shipper intake loop (codec)
//!                                                        │ relay
//!                                                        v
//!                                  InfluxDB <──flush── Shipper batching loop (BatchBuffer)
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod auth;
pub mod batch_buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod errors;
pub mod intake;
pub mod server;
pub mod shipper;
pub mod sink;
pub mod tls;
