// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Bounded drop-oldest queue between the read thread and the dispatch loop.
//!
//! The producer side is synchronous and never blocks: when the queue is full
//! the oldest chunk is discarded. The consumer awaits new chunks with
//! [`ChunkQueue::recv`].

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::Notify;

use h1sdr_core::SampleChunk;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, Default)]
struct QueueInner {
    chunks: VecDeque<Arc<SampleChunk>>,
    closed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pushed: u64,
    pub dropped: u64,
    pub len: usize,
    pub capacity: usize,
}

#[derive(Debug)]
pub struct ChunkQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    pushed: AtomicU64,
    dropped: AtomicU64,
}

impl Default for ChunkQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl ChunkQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                chunks: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            pushed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a chunk, evicting the oldest one if full.
    ///
    /// Returns `true` when a chunk was evicted. Pushing into a closed queue
    /// discards the chunk.
    pub fn push(&self, chunk: Arc<SampleChunk>) -> bool {
        let evicted = {
            let mut inner = self.lock();
            if inner.closed {
                return false;
            }
            let evicted = if inner.chunks.len() >= self.capacity {
                inner.chunks.pop_front().is_some()
            } else {
                false
            };
            inner.chunks.push_back(chunk);
            evicted
        };
        self.pushed.fetch_add(1, Ordering::Relaxed);
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    pub fn try_pop(&self) -> Option<Arc<SampleChunk>> {
        self.lock().chunks.pop_front()
    }

    /// Wait for the next chunk. Returns `None` once the queue is closed and
    /// drained.
    pub async fn recv(&self) -> Option<Arc<SampleChunk>> {
        loop {
            let notified = self.notify.notified();
            let mut notified = std::pin::pin!(notified);
            notified.as_mut().enable();
            {
                let mut inner = self.lock();
                if let Some(chunk) = inner.chunks.pop_front() {
                    return Some(chunk);
                }
                if inner.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Mark end-of-stream and wake all waiting consumers. Buffered chunks
    /// remain readable.
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Reopen after a stop so acquisition can be restarted. Drops stale chunks.
    pub fn reopen(&self) {
        let mut inner = self.lock();
        inner.chunks.clear();
        inner.closed = false;
    }

    pub fn len(&self) -> usize {
        self.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().chunks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pushed: self.pushed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            len: self.len(),
            capacity: self.capacity,
        }
    }
}
