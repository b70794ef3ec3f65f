// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Request backpressure: the application-facing signal that the client's
//! registry is near its hard cap.
//!
//! The on/off transition is guarded by a single lock so that `false` can
//! never be delivered before the `true` it follows — two racing threads
//! crossing the warning and resume thresholds at the same moment must not
//! be able to fire the callback out of order. The decision and the delivery
//! both need that ordering: deciding under the lock is not enough by
//! itself, since two independently spawned handler invocations can still
//! run out of order on a multi-threaded runtime. Deliveries are instead
//! pushed onto a single-consumer queue drained by one long-lived task, so
//! the handler sees them in the exact order they were decided.

use std::sync::Mutex;

use once_cell::sync::OnceCell;
use tokio::sync::mpsc;

use crate::notify::BackpressureHandler;

pub struct BackpressureGate {
    /// `true` once the handler has last been told `true`; serializes the
    /// on/off transition.
    on: Mutex<bool>,
    handler: Option<BackpressureHandler>,
    /// Sender half of the ordered delivery queue; the drain task owning the
    /// receiver is spawned lazily on the first transition.
    deliveries: OnceCell<mpsc::UnboundedSender<bool>>,
}

impl BackpressureGate {
    pub fn new(handler: Option<BackpressureHandler>) -> Self {
        Self {
            on: Mutex::new(false),
            handler,
            deliveries: OnceCell::new(),
        }
    }

    pub fn is_on(&self) -> bool {
        *self.on.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called after admission; `size` is the registry size just observed.
    /// Fires `true` exactly once per crossing of `warning` upward.
    pub fn on_admit(&self, size: usize, warning: usize) {
        let mut on = self.on.lock().unwrap_or_else(|e| e.into_inner());
        if !*on && size >= warning {
            *on = true;
            self.notify(true);
        }
    }

    /// Called after a completion (response/timeout) removes a record;
    /// `size` is the registry size just after removal. Fires `false`
    /// exactly once per crossing of `resume` downward, only while backpressure
    /// is currently on.
    pub fn on_complete(&self, size: usize, resume: usize) {
        let mut on = self.on.lock().unwrap_or_else(|e| e.into_inner());
        if *on && size <= resume {
            *on = false;
            self.notify(false);
        }
    }

    /// Pushes `state` onto the ordered delivery queue. Spawning one task per
    /// edge (as opposed to one long-lived drain task) would let two
    /// deliveries race each other on a multi-threaded runtime; this keeps
    /// callback execution off the caller's thread while still preserving
    /// FIFO order between `true` and `false`.
    fn notify(&self, state: bool) {
        let Some(handler) = self.handler.clone() else {
            return;
        };
        let tx = self.deliveries.get_or_init(|| {
            let (tx, mut rx) = mpsc::unbounded_channel::<bool>();
            tokio::spawn(async move {
                while let Some(state) = rx.recv().await {
                    // Caught per-delivery so a panicking handler loses only
                    // its own invocation, not every later delivery the
                    // drain task would otherwise have gone on to make.
                    let handler = handler.clone();
                    if std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(state))).is_err() {
                        tracing::error!(target: "oltp_client_rs::notify", "backpressure handler panicked");
                    }
                }
            });
            tx
        });
        // The receiver only disappears on drain-task panic; dropping the
        // notification in that case is no worse than the panic itself.
        let _ = tx.send(state);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;

    #[tokio::test]
    async fn never_fires_false_before_true() {
        let calls: Arc<std::sync::Mutex<Vec<bool>>> = Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls_clone = calls.clone();
        let gate = BackpressureGate::new(Some(Arc::new(move |state| {
            calls_clone.lock().unwrap().push(state);
        })));

        gate.on_complete(0, 5); // below resume but never turned on: no-op
        gate.on_admit(15, 15);
        gate.on_admit(16, 15); // already on: no-op
        gate.on_complete(4, 5);

        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let seen = calls.lock().unwrap().clone();
        assert_eq!(seen, vec![true, false]);
    }

    #[test]
    fn idempotent_without_handler() {
        let gate = BackpressureGate::new(None);
        gate.on_admit(20, 15);
        assert!(gate.is_on());
        gate.on_complete(1, 5);
        assert!(!gate.is_on());
        let _ = AtomicUsize::new(0);
    }
}
