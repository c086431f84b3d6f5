// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The shipping engine.
//!
//! Two tasks per engine: the intake loop pulls raw payloads off the shared
//! intake queue, encodes them and relays the records; the batching loop owns
//! the [`BatchBuffer`] and flushes it when it fills up or when `send_interval`
//! has elapsed since the previous flush.

use crate::batch_buffer::BatchBuffer;
use crate::codec::{self, EncodedRecord};
use crate::errors::{self, BufferFull, ShipperError};
use crate::intake::IntakeReceiver;
use crate::sink::Sink;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShipperState {
    Idle,
    Connected,
    Running,
    Draining,
    Stopped,
}

pub struct Shipper {
    sink: Arc<dyn Sink>,
    intake: IntakeReceiver,
    buffer: BatchBuffer,
    send_interval: Duration,
    state: Arc<watch::Sender<ShipperState>>,
}

impl Shipper {
    pub fn new(
        sink: Arc<dyn Sink>,
        intake: IntakeReceiver,
        batch_size: usize,
        send_interval: Duration,
    ) -> Result<Self, errors::Creation> {
        if send_interval.is_zero() {
            return Err(errors::Creation::SendInterval);
        }
        let (state, _) = watch::channel(ShipperState::Idle);
        Ok(Shipper {
            sink,
            intake,
            buffer: BatchBuffer::new(batch_size)?,
            send_interval,
            state: Arc::new(state),
        })
    }

    #[must_use]
    pub fn state(&self) -> watch::Receiver<ShipperState> {
        self.state.subscribe()
    }

    /// Pings the sink and, if it answers, spawns the intake and batching loops.
    pub async fn start(self) -> Result<ShipperHandle, ShipperError> {
        self.sink.ping().await?;
        self.state.send_replace(ShipperState::Connected);
        info!("Connected to InfluxDB");

        let cancel = CancellationToken::new();
        let (relay_tx, relay_rx) = mpsc::unbounded_channel();

        let intake_task = tokio::spawn(intake_loop(
            self.intake,
            relay_tx,
            cancel.clone(),
            Arc::clone(&self.state),
        ));
        let batcher = Batcher {
            buffer: self.buffer,
            sink: self.sink,
            send_interval: self.send_interval,
            state: Arc::clone(&self.state),
        };
        let batching_task = tokio::spawn(batcher.run(relay_rx));

        self.state.send_replace(ShipperState::Running);
        info!("Shipper running, flushing every {:?}", self.send_interval);

        Ok(ShipperHandle {
            cancel,
            intake_task,
            batching_task,
            state: self.state.subscribe(),
        })
    }
}

pub struct ShipperHandle {
    cancel: CancellationToken,
    intake_task: JoinHandle<()>,
    batching_task: JoinHandle<Result<(), ShipperError>>,
    state: watch::Receiver<ShipperState>,
}

impl ShipperHandle {
    #[must_use]
    pub fn state(&self) -> watch::Receiver<ShipperState> {
        self.state.clone()
    }

    /// Stops the intake loop and waits for the final flush.
    pub async fn stop(self) -> Result<(), ShipperError> {
        self.cancel.cancel();
        self.intake_task
            .await
            .map_err(|e| ShipperError::TaskFailed(e.to_string()))?;
        self.batching_task
            .await
            .map_err(|e| ShipperError::TaskFailed(e.to_string()))?
    }
}

async fn intake_loop(
    mut intake: IntakeReceiver,
    relay: mpsc::UnboundedSender<EncodedRecord>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<ShipperState>>,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                state.send_replace(ShipperState::Draining);
                info!("Shipper draining");
                // whatever is already queued still makes it into the final batch
                while let Some(payload) = intake.try_recv() {
                    if !relay_payload(&payload, &relay) {
                        break;
                    }
                }
                return;
            }
            payload = intake.recv() => {
                let Some(payload) = payload else {
                    state.send_replace(ShipperState::Draining);
                    info!("Intake queue closed, shipper draining");
                    return;
                };
                if !relay_payload(&payload, &relay) {
                    return;
                }
            }
        }
    }
}

/// Returns `false` once the batching loop is gone.
fn relay_payload(payload: &[u8], relay: &mpsc::UnboundedSender<EncodedRecord>) -> bool {
    match codec::encode(payload) {
        Ok(record) => {
            if relay.send(record).is_err() {
                error!("Batching loop is gone, dropping message");
                return false;
            }
        }
        Err(e) => debug!("Discarding invalid metric: {e}"),
    }
    true
}

struct Batcher {
    buffer: BatchBuffer,
    sink: Arc<dyn Sink>,
    send_interval: Duration,
    state: Arc<watch::Sender<ShipperState>>,
}

impl Batcher {
    async fn run(
        self,
        mut relay: mpsc::UnboundedReceiver<EncodedRecord>,
    ) -> Result<(), ShipperError> {
        let mut ticker = interval(self.send_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        let result = loop {
            tokio::select! {
                record = relay.recv() => {
                    let Some(record) = record else {
                        self.writeout().await;
                        break Ok(());
                    };
                    if let Err(e) = self.push(record).await {
                        error!("Shipper stopping: {e}");
                        break Err(e);
                    }
                }
                _ = ticker.tick() => {
                    if Instant::now() - self.buffer.last_flush_time() >= self.send_interval {
                        self.writeout().await;
                    }
                }
            }
        };

        self.state.send_replace(ShipperState::Stopped);
        info!("Shipper stopped");
        result
    }

    async fn push(&self, record: EncodedRecord) -> Result<(), ShipperError> {
        match self.buffer.add(record.clone()) {
            Ok(()) => Ok(()),
            Err(BufferFull { .. }) => {
                self.writeout().await;
                self.buffer
                    .add(record)
                    .map_err(ShipperError::BufferOverflow)
            }
        }
    }

    /// Hands the buffered records to the sink. The buffer is cleared whatever
    /// the delivery outcome.
    async fn writeout(&self) {
        if self.buffer.is_empty() {
            return;
        }
        let records = self.buffer.current_size();
        let payload = Bytes::from(self.buffer.read());
        self.buffer.reset();
        self.buffer.set_last_flush_time(Instant::now());

        debug!("Flushing {records} records");
        if let Err(e) = self.sink.write(payload).await {
            error!("Dropping {records} records: {e}");
        }
    }
}
