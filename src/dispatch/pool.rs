// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Response dispatcher: decodes inbound frames on a dedicated worker pool
//! so completion callbacks never run on the network-read task.

use std::{sync::Arc, time::Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::{
    dispatch::classify::{HandleClass, classify},
    error::ClientError,
    notify::Notifications,
    registry::Registry,
    response::{ClientResponse, decode_response_body},
    router::snapshot::RouterState,
    topology::TopologyManager,
};

pub struct DispatchJob {
    pub connection_id: u64,
    pub frame: Bytes,
    pub arrived_at: Instant,
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    router: Arc<RouterState>,
    topology: Arc<TopologyManager>,
    notifications: Arc<Notifications>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<Registry>,
        router: Arc<RouterState>,
        topology: Arc<TopologyManager>,
        notifications: Arc<Notifications>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            router,
            topology,
            notifications,
        })
    }

    /// Spawns `worker_count` tasks draining `rx`; the default is 4.
    pub fn spawn_workers(self: &Arc<Self>, rx: mpsc::Receiver<DispatchJob>, worker_count: usize) {
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        for _ in 0..worker_count.max(1) {
            let dispatcher = self.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match job {
                        Some(job) => dispatcher.handle_job(job).await,
                        None => break,
                    }
                }
            });
        }
    }

    async fn handle_job(&self, job: DispatchJob) {
        let (handle, status, status_string, results) = match decode_response_body(job.frame) {
            Ok(v) => v,
            Err(e) => {
                self.notifications
                    .error_log(&format!("failed to decode response frame: {e}"));
                return;
            },
        };

        match classify(handle) {
            HandleClass::Normal | HandleClass::Internal => {
                self.complete_call(handle, status, status_string, results, job.connection_id, job.arrived_at);
            },
            HandleClass::Topology => {
                self.topology.on_topology_response(results).await;
            },
            HandleClass::Catalog => {
                self.topology.on_catalog_response(results).await;
            },
            HandleClass::UnknownMagic => {
                warn!(handle, "dropping response with unknown magic handle");
            },
        }
    }

    fn complete_call(
        &self,
        handle: i64,
        status: i8,
        status_string: String,
        results: Bytes,
        connection_id: u64,
        arrived_at: Instant,
    ) {
        let Some(record) = self.registry.remove(handle) else {
            // Late response: permit was already released at timeout; only
            // a notification fires.
            trace!(handle, "late response");
            return;
        };

        if let Some(endpoint) = self.router.connections.get(&connection_id) {
            endpoint.stats.record_response(&record.procedure_name, status);
        }

        // `record.permit` drops at the end of this function scope,
        // releasing the send permit back to the pool.
        let round_trip = arrived_at.saturating_duration_since(record.start);
        let response = ClientResponse {
            handle,
            status,
            status_string,
            results,
            round_trip,
        };
        let outcome = if response.is_success() {
            Ok(response)
        } else {
            Err(ClientError::ProcedureCallError {
                status,
                message: response.status_string.clone(),
            })
        };
        let _ = record.completion.send(outcome);
    }
}
