// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded queue carrying raw, not yet validated payloads from connections to the shipper.
//!
//! Producers never wait: when the queue is full the payload is dropped and a
//! warning is logged, so ingestion keeps running while the sink is congested.

use tokio::sync::mpsc;
use tracing::warn;

pub fn channel(capacity: usize) -> (IntakeSender, IntakeReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (IntakeSender { tx }, IntakeReceiver { rx })
}

#[derive(Clone, Debug)]
pub struct IntakeSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl IntakeSender {
    /// Queues `payload` without blocking. Returns `false` if it was dropped.
    pub fn offer(&self, payload: Vec<u8>) -> bool {
        match self.tx.try_send(payload) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Intake queue is full, dropping message");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Intake queue is closed, dropping message");
                false
            }
        }
    }
}

#[derive(Debug)]
pub struct IntakeReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl IntakeReceiver {
    /// Next payload, or `None` once every sender is gone and the queue is drained.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Next payload if one is already queued.
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    async fn test_offer_and_receive_in_order() {
        let (tx, mut rx) = channel(4);
        assert!(tx.offer(b"one".to_vec()));
        assert!(tx.offer(b"two".to_vec()));

        assert_eq!(rx.recv().await.unwrap(), b"one".to_vec());
        assert_eq!(rx.recv().await.unwrap(), b"two".to_vec());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_full_queue_drops_without_blocking() {
        let (tx, mut rx) = channel(2);
        assert!(tx.offer(b"a".to_vec()));
        assert!(tx.offer(b"b".to_vec()));

        // would hang the test if offer blocked
        assert!(!tx.offer(b"c".to_vec()));
        assert!(!tx.offer(b"d".to_vec()));
        assert!(!tx.offer(b"e".to_vec()));

        logs_assert(|lines: &[&str]| {
            let drops = lines
                .iter()
                .filter(|line| line.contains("Intake queue is full, dropping message"))
                .count();
            if drops == 3 {
                Ok(())
            } else {
                Err(format!("expected 3 drop messages, got {drops}"))
            }
        });

        assert_eq!(rx.recv().await.unwrap(), b"a".to_vec());
        assert!(tx.offer(b"f".to_vec()));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_closed_queue_drops() {
        let (tx, rx) = channel(2);
        drop(rx);
        assert!(!tx.offer(b"a".to_vec()));
        assert!(logs_contain("Intake queue is closed, dropping message"));
    }

    #[tokio::test]
    async fn test_receiver_ends_when_senders_are_gone() {
        let (tx, mut rx) = channel(2);
        assert!(tx.offer(b"last".to_vec()));
        drop(tx);
        assert_eq!(rx.recv().await.unwrap(), b"last".to_vec());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_try_recv_does_not_wait() {
        let (tx, mut rx) = channel(2);
        assert!(rx.try_recv().is_none());
        assert!(tx.offer(b"queued".to_vec()));
        assert_eq!(rx.try_recv().unwrap(), b"queued".to_vec());
        assert!(rx.try_recv().is_none());
    }
}
