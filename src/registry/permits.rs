// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Send permits: a single global counting semaphore gating in-flight
//! transactions across all connections.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore, SemaphorePermit, TryAcquireError};

/// Wraps [`tokio::sync::Semaphore`] with the dynamic-resize rules the
/// outstanding-transaction limit needs: grow by adding permits, shrink by
/// draining as many as are currently free and accepting a temporarily
/// smaller effective limit if fewer could be drained than requested (Open
/// Question (b) in the design notes — documented rather than rejected).
pub struct SendPermits {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
}

impl SendPermits {
    pub fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit: AtomicUsize::new(limit),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn try_acquire(&self) -> Result<SemaphorePermit<'_>, TryAcquireError> {
        self.semaphore.try_acquire()
    }

    /// Blocks until a permit is free. Callers that need a timeout should
    /// race this against `tokio::time::sleep`.
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, tokio::sync::AcquireError> {
        self.semaphore.acquire().await
    }

    /// Owned variants so the permit can outlive this call and be stashed on
    /// the pending-request record, released by dropping it on completion.
    pub fn try_acquire_owned(&self) -> Result<OwnedSemaphorePermit, TryAcquireError> {
        self.semaphore.clone().try_acquire_owned()
    }

    pub async fn acquire_owned(&self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.semaphore.clone().acquire_owned().await
    }

    /// Grows the effective limit by `delta`.
    pub fn grow(&self, delta: usize) {
        if delta == 0 {
            return;
        }
        self.semaphore.add_permits(delta);
        self.limit.fetch_add(delta, Ordering::Relaxed);
    }

    /// Shrinks the effective limit by `delta`, draining currently-available
    /// permits first. If fewer than `delta` permits are free (because more
    /// are in use than the new limit would allow), the shrink still
    /// succeeds against the outstanding permits and the effective limit
    /// becomes `old_limit - drained`, i.e. a smaller number than requested;
    /// the over-committed in-use permits are allowed to drain naturally as
    /// they're released.
    pub fn shrink(&self, delta: usize) -> usize {
        if delta == 0 {
            return 0;
        }
        let mut drained = 0;
        while drained < delta {
            match self.semaphore.try_acquire() {
                Ok(permit) => {
                    permit.forget();
                    drained += 1;
                },
                Err(_) => break,
            }
        }
        self.limit.fetch_sub(drained, Ordering::Relaxed);
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn grow_and_shrink_track_limit() {
        let permits = SendPermits::new(5);
        assert_eq!(permits.limit(), 5);
        permits.grow(3);
        assert_eq!(permits.limit(), 8);
        assert_eq!(permits.available(), 8);

        let drained = permits.shrink(2);
        assert_eq!(drained, 2);
        assert_eq!(permits.limit(), 6);
    }

    #[tokio::test]
    async fn shrink_past_availability_reports_partial_drain() {
        let permits = SendPermits::new(2);
        let p1 = permits.try_acquire().unwrap();
        let p2 = permits.try_acquire().unwrap();
        // Both permits in use; nothing free to drain.
        let drained = permits.shrink(2);
        assert_eq!(drained, 0);
        assert_eq!(permits.limit(), 2);
        drop(p1);
        drop(p2);
    }

    #[tokio::test]
    async fn held_plus_available_equals_limit() {
        let permits = SendPermits::new(4);
        let p1 = permits.try_acquire().unwrap();
        assert_eq!(permits.available() + 1, permits.limit());
        drop(p1);
        assert_eq!(permits.available(), permits.limit());
    }
}
