// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The per-connection priority queue feeding the send pipeline.
//!
//! Ordering is `(priority asc, sequence asc)`: lower priority number wins,
//! ties break in admission order. `BinaryHeap` is a max-heap, so entries
//! are wrapped in `Reverse` to get min-heap behavior out of the natural
//! `Ord` below.

use std::{
    cmp::{Ordering, Reverse},
    collections::BinaryHeap,
    sync::Mutex,
    time::{Duration, Instant},
};

use tokio::sync::Notify;

use crate::invocation::Invocation;

#[derive(Debug)]
pub struct QueuedCall {
    pub priority: u8,
    pub sequence: u64,
    pub handle: i64,
    pub invocation: Invocation,
    pub admitted_at: Instant,
    pub timeout: Duration,
}

impl PartialEq for QueuedCall {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.sequence == other.sequence
    }
}
impl Eq for QueuedCall {}

impl PartialOrd for QueuedCall {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueuedCall {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then(self.sequence.cmp(&other.sequence))
    }
}

#[derive(Default)]
pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<Reverse<QueuedCall>>>,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, call: QueuedCall) {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).push(Reverse(call));
        self.notify.notify_one();
    }

    /// Blocks until an item is available, then pops the highest-priority,
    /// lowest-sequence entry.
    pub async fn pop(&self) -> QueuedCall {
        loop {
            if let Some(Reverse(call)) =
                self.heap.lock().unwrap_or_else(|e| e.into_inner()).pop()
            {
                return call;
            }
            self.notify.notified().await;
        }
    }

    /// Drains every queued entry, used on connection teardown so remaining
    /// requests can be failed via the connection-lost path.
    pub fn drain(&self) -> Vec<QueuedCall> {
        let mut heap = self.heap.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = Vec::with_capacity(heap.len());
        while let Some(Reverse(call)) = heap.pop() {
            out.push(call);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
