// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! One accepted WebSocket connection.
//!
//! A session races three futures: the read pump feeding the intake queue, the
//! ping pump keeping the peer alive, and the lifetime timer. Whichever ends
//! first ends the session, and the socket is closed on every exit path. The
//! server shutdown token ends every open session as well.

use crate::intake::IntakeSender;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::time::{interval, sleep, timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    LifetimeExpired,
    PeerClosed,
    ReadError,
    ReadTimeout,
    WriteError,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Hard cap on how long a connection stays open, healthy or not.
    pub max_lifetime: Duration,
    /// How long to wait for a pong before giving up on the peer.
    pub pong_wait: Duration,
    /// Must be shorter than `pong_wait`.
    pub ping_period: Duration,
    pub write_wait: Duration,
}

impl SessionConfig {
    #[must_use]
    pub fn new(max_lifetime: Duration) -> Self {
        let pong_wait = Duration::from_secs(60);
        SessionConfig {
            max_lifetime,
            pong_wait,
            ping_period: pong_wait * 9 / 10,
            write_wait: Duration::from_secs(3),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig::new(Duration::from_secs(900))
    }
}

pub struct ConnectionSession {
    intake: IntakeSender,
    config: SessionConfig,
    shutdown: CancellationToken,
}

impl ConnectionSession {
    #[must_use]
    pub fn new(intake: IntakeSender, config: SessionConfig, shutdown: CancellationToken) -> Self {
        ConnectionSession {
            intake,
            config,
            shutdown,
        }
    }

    pub async fn run(self, socket: WebSocket) -> SessionEnd {
        let (mut sender, mut receiver) = socket.split();

        let end = tokio::select! {
            () = sleep(self.config.max_lifetime) => SessionEnd::LifetimeExpired,
            () = self.shutdown.cancelled() => SessionEnd::Shutdown,
            end = read_pump(&mut receiver, &self.intake, self.config.pong_wait) => end,
            end = ping_pump(&mut sender, self.config.ping_period, self.config.write_wait) => end,
        };

        match receiver.reunite(sender) {
            Ok(socket) => {
                if end != SessionEnd::PeerClosed
                    && timeout(self.config.write_wait, socket.close()).await.is_err()
                {
                    debug!("Timed out sending close frame");
                }
            }
            Err(e) => warn!("Failed to reunite websocket halves: {e}"),
        }

        match end {
            SessionEnd::LifetimeExpired | SessionEnd::PeerClosed | SessionEnd::Shutdown => {
                info!("Connection closed: {end:?}");
            }
            _ => warn!("Connection closed: {end:?}"),
        }
        end
    }
}

async fn read_pump(
    receiver: &mut SplitStream<WebSocket>,
    intake: &IntakeSender,
    pong_wait: Duration,
) -> SessionEnd {
    let mut deadline = Instant::now() + pong_wait;
    loop {
        let message = match timeout_at(deadline, receiver.next()).await {
            Err(_) => {
                debug!("No pong received within {pong_wait:?}");
                return SessionEnd::ReadTimeout;
            }
            Ok(None) => return SessionEnd::PeerClosed,
            Ok(Some(Err(e))) => {
                warn!("Failed to read from websocket: {e}");
                return SessionEnd::ReadError;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) if !text.is_empty() => {
                intake.offer(text.into_bytes());
            }
            Message::Binary(data) if !data.is_empty() => {
                intake.offer(data);
            }
            Message::Pong(_) => deadline = Instant::now() + pong_wait,
            Message::Close(_) => return SessionEnd::PeerClosed,
            // pings are answered by the websocket layer
            _ => {}
        }
    }
}

async fn ping_pump(
    sender: &mut SplitSink<WebSocket, Message>,
    ping_period: Duration,
    write_wait: Duration,
) -> SessionEnd {
    let mut ticker = interval(ping_period);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        match timeout(write_wait, sender.send(Message::Ping(Vec::new()))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to send ping: {e}");
                return SessionEnd::WriteError;
            }
            Err(_) => {
                warn!("Timed out sending ping after {write_wait:?}");
                return SessionEnd::WriteError;
            }
        }
    }
}
