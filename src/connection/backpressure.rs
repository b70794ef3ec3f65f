// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Network backpressure: level-triggered, per-connection. "on" sets a flag
//! and blocks the send worker; "off" notifies all waiters.
//! Spurious duplicate "on" events are idempotent by construction (setting
//! an already-set flag changes nothing observable).

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

#[derive(Default)]
pub struct NetworkBackpressure {
    on: AtomicBool,
    notify: Notify,
}

impl NetworkBackpressure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.on.load(Ordering::Acquire)
    }

    pub fn set_on(&self) {
        self.on.store(true, Ordering::Release);
    }

    pub fn set_off(&self) {
        self.on.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Blocks the caller until backpressure clears. No-op if it is already
    /// clear. Callers race this against a timeout of their own remaining
    /// budget.
    pub async fn wait_clear(&self) {
        loop {
            if !self.is_on() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_on() {
                notified.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_clear_returns_immediately_when_off() {
        let bp = NetworkBackpressure::new();
        tokio::time::timeout(Duration::from_millis(50), bp.wait_clear())
            .await
            .expect("should not block");
    }

    #[tokio::test]
    async fn wait_clear_unblocks_on_set_off() {
        let bp = std::sync::Arc::new(NetworkBackpressure::new());
        bp.set_on();
        let waiter = {
            let bp = bp.clone();
            tokio::spawn(async move { bp.wait_clear().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        bp.set_off();
        tokio::time::timeout(Duration::from_millis(100), waiter)
            .await
            .expect("should unblock")
            .unwrap();
    }

    #[test]
    fn duplicate_on_is_idempotent() {
        let bp = NetworkBackpressure::new();
        bp.set_on();
        bp.set_on();
        assert!(bp.is_on());
    }
}
