// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The per-second timeout/keepalive tick: pings connections that have
//! gone quiet and completes overdue requests with a response-timeout
//! error. Sub-second timeouts are instead handled by the one-shot task
//! `pipeline::worker` schedules directly.

use std::{sync::Arc, time::Instant};

use tracing::debug;

use crate::{
    error::ClientError,
    invocation::{Invocation, ParameterSet},
    procedures::{PING, is_exempt_long_op},
    registry::Registry,
    router::snapshot::RouterState,
};

pub struct TimeoutScheduler {
    registry: Arc<Registry>,
    router: Arc<RouterState>,
}

impl TimeoutScheduler {
    pub fn new(registry: Arc<Registry>, router: Arc<RouterState>) -> Arc<Self> {
        Arc::new(Self { registry, router })
    }

    /// Spawns the one-second tick loop; exits once `shutdown` is
    /// cancelled.
    pub fn spawn(self: &Arc<Self>, connection_response_timeout: std::time::Duration, shutdown: tokio_util::sync::CancellationToken) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        this.tick(connection_response_timeout);
                    }
                }
            }
        });
    }

    fn tick(&self, connection_response_timeout: std::time::Duration) {
        self.ping_quiet_connections(connection_response_timeout);
        self.complete_overdue_requests();
    }

    /// Per connection, ping it if it has been quiet for a third of the
    /// response timeout, or drop it if an outstanding ping itself has
    /// gone unanswered past the full timeout.
    fn ping_quiet_connections(&self, connection_response_timeout: std::time::Duration) {
        let endpoints: Vec<_> = self.router.connections.iter().map(|r| r.value().clone()).collect();
        for endpoint in endpoints {
            let since = endpoint.stats.since_last_response();
            let outstanding = endpoint.stats.outstanding_ping.load(std::sync::atomic::Ordering::Acquire);

            if outstanding && since > connection_response_timeout {
                debug!(connection_id = endpoint.id, "ping timed out, tearing down connection");
                self.router.remove_connection(endpoint.id);
                self.registry.fail_connection(endpoint.id);
                tokio::spawn(async move { endpoint.shutdown().await });
                continue;
            }

            if !outstanding && since > connection_response_timeout / 3 {
                endpoint.stats.outstanding_ping.store(true, std::sync::atomic::Ordering::Release);
                let invocation = Invocation::new(PING, crate::invocation::MULTI_PARTITION_ID as i64)
                    .with_params(ParameterSet::empty());
                let framed = match invocation.write_framed() {
                    Ok(f) => f,
                    Err(_) => continue,
                };
                let endpoint = endpoint.clone();
                tokio::spawn(async move {
                    let _ = endpoint.write_to_network(&framed).await;
                });
            }
        }
    }

    /// Completes every active handle whose deadline has passed, honoring
    /// the long-op exemption's 30-minute floor.
    fn complete_overdue_requests(&self) {
        let now = Instant::now();
        for handle in self.registry.active_overdue(now) {
            if let Some(record) = self.registry.remove(handle) {
                let _ = record.completion.send(Err(ClientError::ResponseTimeout(record.timeout)));
            }
        }
    }
}

/// Whether `elapsed` past `timeout` should still be tolerated for an
/// exempt long-op procedure: exempt procedures get the 30-minute floor
/// instead of their own timeout, whichever is longer.
pub fn effective_deadline(procedure_name: &str, configured_timeout: std::time::Duration) -> std::time::Duration {
    if is_exempt_long_op(procedure_name) {
        configured_timeout.max(crate::procedures::LONG_OP_MINIMUM_TIMEOUT)
    } else {
        configured_timeout
    }
}
