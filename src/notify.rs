// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Application-facing notification callbacks. All are optional,
//! fire-and-forget, and run off whatever thread observed the event rather
//! than the network or send-worker thread; a panicking handler is caught
//! and logged, never propagated.

use std::{panic::AssertUnwindSafe, sync::Arc};

use tracing::error;

pub type ConnectUpHandler = Arc<dyn Fn(String) + Send + Sync>;
pub type ConnectDownHandler = Arc<dyn Fn(String) + Send + Sync>;
pub type ConnectFailureHandler = Arc<dyn Fn(String, String) + Send + Sync>;
pub type LateResponseHandler = Arc<dyn Fn(i64) + Send + Sync>;
pub type BackpressureHandler = Arc<dyn Fn(bool) + Send + Sync>;
pub type ErrorLogHandler = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Notifications {
    pub connect_up: Option<ConnectUpHandler>,
    pub connect_down: Option<ConnectDownHandler>,
    pub connect_failure: Option<ConnectFailureHandler>,
    pub late_response: Option<LateResponseHandler>,
    pub backpressure: Option<BackpressureHandler>,
    pub error_log: Option<ErrorLogHandler>,
}

impl Notifications {
    pub fn connect_up(&self, host: impl Into<String>) {
        let host = host.into();
        if let Some(h) = self.connect_up.clone() {
            run_guarded(move || h(host));
        }
    }

    pub fn connect_down(&self, host: impl Into<String>) {
        let host = host.into();
        if let Some(h) = self.connect_down.clone() {
            run_guarded(move || h(host));
        }
    }

    pub fn connect_failure(&self, host: impl Into<String>, reason: impl Into<String>) {
        let host = host.into();
        let reason = reason.into();
        if let Some(h) = self.connect_failure.clone() {
            run_guarded(move || h(host, reason));
        }
    }

    pub fn late_response(&self, handle: i64) {
        if let Some(h) = self.late_response.clone() {
            run_guarded(move || h(handle));
        }
    }

    pub fn error_log(&self, message: &str) {
        error!(target: "oltp_client_rs::notify", "{message}");
        if let Some(h) = self.error_log.clone() {
            let message = message.to_string();
            run_guarded(move || h(&message));
        }
    }
}

/// Runs a notification, catching any panic so a misbehaving application
/// callback can never take down a network/scheduler task.
fn run_guarded<F: FnOnce() + Send + 'static>(f: F) {
    tokio::spawn(async move {
        if let Err(_panic) = std::panic::catch_unwind(AssertUnwindSafe(f)) {
            error!(target: "oltp_client_rs::notify", "notification handler panicked");
        }
    });
}
