// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Fixed-capacity accumulator of encoded records waiting to be flushed.
//!
//! One slot is always kept free: a buffer created with capacity `n` accepts
//! `n - 1` records before reporting [`BufferFull`]. Cursor, slots and the last
//! flush instant live behind a single lock so every operation is atomic with
//! respect to the others.

use crate::codec::EncodedRecord;
use crate::errors::{self, BufferFull};
use std::sync::RwLock;
use tokio::time::Instant;

pub struct BatchBuffer {
    capacity: usize,
    inner: RwLock<Inner>,
}

struct Inner {
    slots: Vec<EncodedRecord>,
    cursor: usize,
    last_flush: Instant,
}

impl BatchBuffer {
    pub fn new(capacity: usize) -> Result<Self, errors::Creation> {
        if capacity < 2 {
            return Err(errors::Creation::BatchSize(capacity));
        }
        Ok(Self {
            capacity,
            inner: RwLock::new(Inner {
                slots: Vec::with_capacity(capacity),
                cursor: 0,
                last_flush: Instant::now(),
            }),
        })
    }

    pub fn add(&self, record: EncodedRecord) -> Result<(), BufferFull> {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.write().expect("lock poisoned");
        if inner.cursor == self.capacity - 1 {
            return Err(BufferFull {
                capacity: self.capacity,
            });
        }
        let cursor = inner.cursor;
        if cursor < inner.slots.len() {
            inner.slots[cursor] = record;
        } else {
            inner.slots.push(record);
        }
        inner.cursor += 1;
        Ok(())
    }

    /// Valid records joined with `\n`, in insertion order.
    #[must_use]
    pub fn read(&self) -> Vec<u8> {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        let valid = &inner.slots[..inner.cursor];
        let mut out = Vec::with_capacity(valid.iter().map(|r| r.len() + 1).sum());
        for (i, record) in valid.iter().enumerate() {
            if i > 0 {
                out.push(b'\n');
            }
            out.extend_from_slice(record.as_bytes());
        }
        out
    }

    /// Rewinds the cursor. Slots past the cursor keep stale records which are never read.
    pub fn reset(&self) {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.cursor = 0;
    }

    /// Number of valid records.
    #[must_use]
    pub fn current_size(&self) -> usize {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        inner.cursor
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current_size() == 0
    }

    pub fn set_last_flush_time(&self, t: Instant) {
        #[allow(clippy::expect_used)]
        let mut inner = self.inner.write().expect("lock poisoned");
        inner.last_flush = t;
    }

    #[must_use]
    pub fn last_flush_time(&self) -> Instant {
        #[allow(clippy::expect_used)]
        let inner = self.inner.read().expect("lock poisoned");
        inner.last_flush
    }
}
