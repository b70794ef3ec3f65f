// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Client handle allocation.
//!
//! Positive handles identify application calls and are unique across the
//! client's lifetime up to `MAX_CLIENT_HANDLE`; negative handles identify
//! internal system calls (pings, subscribe, topology/catalog refresh).

use std::sync::atomic::{AtomicI64, Ordering};

use crate::invocation::MAX_CLIENT_HANDLE;

/// Hands out positive application handles and negative internal-system
/// handles from two independent counters so neither range can starve the
/// other.
#[derive(Debug)]
pub struct HandleAllocator {
    next_public: AtomicI64,
    next_internal: AtomicI64,
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleAllocator {
    pub fn new() -> Self {
        Self {
            next_public: AtomicI64::new(1),
            next_internal: AtomicI64::new(-1),
        }
    }

    /// Next application-visible handle, wrapping back to 1 past
    /// `MAX_CLIENT_HANDLE` rather than colliding with the magic topology /
    /// catalog sentinels that live just above it.
    pub fn next_public(&self) -> i64 {
        loop {
            let cur = self.next_public.load(Ordering::Relaxed);
            let next = if cur >= MAX_CLIENT_HANDLE { 1 } else { cur + 1 };
            if self
                .next_public
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return cur;
            }
        }
    }

    /// Next internal system-call handle (always negative).
    pub fn next_internal(&self) -> i64 {
        loop {
            let cur = self.next_internal.load(Ordering::Relaxed);
            let next = if cur <= i64::MIN + 10 { -1 } else { cur - 1 };
            if self
                .next_internal
                .compare_exchange_weak(cur, next, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return cur;
            }
        }
    }
}
