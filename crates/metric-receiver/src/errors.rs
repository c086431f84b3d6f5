// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use reqwest::StatusCode;

/// Rejection of a single inbound event. Never fatal: the caller logs and drops it.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("failed to parse measurement: {0}")]
    Parse(String),
    #[error("measurement has no name")]
    MissingName,
    #[error("measurement {0} has no tags")]
    MissingTags(String),
    #[error("measurement {0} has no fields")]
    MissingFields(String),
    #[error("measurement {0} has an empty tag or field key")]
    EmptyKey(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("batch buffer is full ({capacity} slots)")]
pub struct BufferFull {
    pub capacity: usize,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Creation {
    #[error("batch size must be at least 2, got {0}")]
    BatchSize(usize),
    #[error("send interval must be greater than zero")]
    SendInterval,
}

/// Failure of the initial ping against the sink.
#[derive(Debug, thiserror::Error)]
pub enum ConnectivityError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
    #[error("failed to ping sink: {0}")]
    Transport(String),
    #[error("got a bad status code from sink when pinging: {0}")]
    Status(StatusCode),
}

/// A batch that could not be written after every attempt was used.
#[derive(Debug, thiserror::Error)]
#[error("failed to write batch after {attempts} attempts: {reason}")]
pub struct DeliveryError {
    pub attempts: usize,
    pub reason: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ShipperError {
    #[error("sink is not reachable: {0}")]
    Connectivity(#[from] ConnectivityError),
    #[error("record rejected by an empty batch buffer: {0}")]
    BufferOverflow(BufferFull),
    #[error("shipper task failed: {0}")]
    TaskFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("failed to build authorization client: {0}")]
    Client(String),
    #[error("authorization request failed: {0}")]
    Request(String),
}

/// Failure to prepare the TLS listener.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid certificate: {0}")]
    Certificate(String),
    #[error("invalid private key: {0}")]
    Key(String),
    #[error("failed to build TLS configuration: {0}")]
    Config(String),
}
