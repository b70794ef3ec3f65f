// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared state behind the public [`crate::client::Client`] façade and the
//! background topology/timeout tasks. Both the façade and the background
//! tasks need to issue calls (application calls and internal system calls
//! respectively) through the identical admission → route → enqueue → await
//! path, so that path lives here once.

use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{
    cfg::config::ClientConfig,
    connection::ConnectionEndpoint,
    dispatch::{DispatchJob, Dispatcher},
    error::ClientError,
    invocation::Invocation,
    notify::Notifications,
    pipeline::{self, QueuedCall, RateLimiter},
    registry::{HandleAllocator, PendingRequest, Registry, SendPermits},
    response::ClientResponse,
    router::{self, snapshot::RouterState},
    timeout::{TimeoutScheduler, effective_deadline},
    topology::TopologyManager,
};

pub struct ClientCore {
    pub config: ClientConfig,
    pub registry: Arc<Registry>,
    pub permits: Arc<SendPermits>,
    pub router: Arc<RouterState>,
    pub handles: Arc<HandleAllocator>,
    pub notifications: Arc<Notifications>,
    pub rate_limiter: Option<Arc<RateLimiter>>,
    pub dispatch_tx: mpsc::Sender<DispatchJob>,
    pub topology: Arc<TopologyManager>,
    pub timeout_scheduler: Arc<TimeoutScheduler>,
    pub shutdown: CancellationToken,
}

impl ClientCore {
    /// Admits, routes, and enqueues `invocation`, then awaits its
    /// completion. Admission, routing, and enqueue all happen here on the
    /// caller's task; the actual send happens on the connection's own
    /// worker task, not on the caller's.
    pub async fn call(&self, invocation: Invocation, timeout: Duration) -> Result<ClientResponse, ClientError> {
        let decision = router::route(&invocation, &self.router)
            .ok_or_else(|| ClientError::not_sent("No connections to cluster at this time"))?;
        let Some(endpoint) = self
            .router
            .connections
            .get(&decision.connection_id)
            .map(|r| r.value().clone())
        else {
            return Err(ClientError::not_sent("selected connection is no longer registered"));
        };
        self.enqueue_on(endpoint, invocation, timeout).await
    }

    /// Like [`Self::call`], but pins the send to a specific connection
    /// rather than routing — used for the topology manager's subscribe
    /// task, which picks "an arbitrary connection" itself rather than
    /// going through partition-leader affinity.
    pub async fn call_on_connection(
        &self,
        connection_id: u64,
        invocation: Invocation,
        timeout: Duration,
    ) -> Result<ClientResponse, ClientError> {
        let Some(endpoint) = self.router.connections.get(&connection_id).map(|r| r.value().clone()) else {
            return Err(ClientError::not_sent("connection is no longer registered"));
        };
        self.enqueue_on(endpoint, invocation, timeout).await
    }

    async fn enqueue_on(
        &self,
        endpoint: Arc<ConnectionEndpoint>,
        invocation: Invocation,
        timeout: Duration,
    ) -> Result<ClientResponse, ClientError> {
        let handle = invocation.handle;
        let timeout = effective_deadline(&invocation.procedure_name, timeout);

        let (tx, rx) = oneshot::channel();
        let sequence = self.registry.next_sequence();
        let record = PendingRequest {
            sequence,
            handle,
            procedure_name: invocation.procedure_name.clone(),
            start: Instant::now(),
            timeout,
            connection_id: endpoint.id,
            permit: None,
            completion: tx,
        };
        self.registry.admit(&invocation, record)?;

        endpoint.enqueue(QueuedCall {
            priority: invocation.priority,
            sequence,
            handle,
            invocation,
            admitted_at: Instant::now(),
            timeout,
        });

        match rx.await {
            Ok(result) => result,
            // The only way the sender drops without sending is a bug
            // somewhere in the completion path; treat it as connection
            // loss rather than panicking the caller.
            Err(_) => Err(ClientError::ConnectionLost),
        }
    }

    /// Issues an internal system call (negative handle) with the given
    /// timeout, used by the topology manager and the timeout scheduler's
    /// keepalive ping.
    pub async fn call_internal(
        &self,
        procedure_name: &str,
        params: crate::invocation::ParameterSet,
        timeout: Duration,
    ) -> Result<ClientResponse, ClientError> {
        let handle = self.handles.next_internal();
        let invocation = Invocation::new(procedure_name, handle)
            .with_priority(self.config.request_priority)
            .with_params(params);
        self.call(invocation, timeout).await
    }

    /// Connects to `addr`, registers the endpoint with the router, and
    /// spawns its send-worker loop. Used both by the initial connect
    /// sequence and by the topology manager's connection task.
    pub async fn connect_and_register(
        self: &Arc<Self>,
        addr: SocketAddr,
        host_id: Option<String>,
    ) -> anyhow::Result<Arc<ConnectionEndpoint>> {
        self.connect_and_register_with_port_hint(addr, host_id, None).await
    }

    /// Same as [`Self::connect_and_register`], but lets the caller record
    /// whether `addr` is known to be the cluster's admin port. Only the
    /// topology manager's connection task has that knowledge; every other
    /// caller passes `None`.
    pub async fn connect_and_register_with_port_hint(
        self: &Arc<Self>,
        addr: SocketAddr,
        host_id: Option<String>,
        is_admin_port: Option<bool>,
    ) -> anyhow::Result<Arc<ConnectionEndpoint>> {
        let core = self.clone();
        let on_disconnect: Arc<dyn Fn(u64) + Send + Sync> = Arc::new(move |connection_id| {
            let core = core.clone();
            tokio::spawn(async move { core.handle_disconnect(connection_id).await });
        });

        let endpoint = ConnectionEndpoint::connect(
            addr,
            self.config.timeouts.connection_setup_timeout,
            self.dispatch_tx.clone(),
            on_disconnect,
            self.config.limits.network_backpressure_level,
            is_admin_port,
        )
        .await?;

        if let Some(host_id) = host_id.clone() {
            *endpoint.host_id.lock().await = Some(host_id.clone());
            self.router.register_connection(host_id.clone(), addr, endpoint.clone()).await;
            self.notifications.connect_up(host_id);
        } else {
            // No host-id yet (first-connection recovery / pre-subscribe
            // bootstrap connect); register under the address itself so the
            // connection table still accounts for it.
            self.router
                .register_connection(addr.to_string(), addr, endpoint.clone())
                .await;
            self.notifications.connect_up(addr.to_string());
        }

        tokio::spawn(pipeline::worker::run(
            endpoint.clone(),
            self.registry.clone(),
            self.permits.clone(),
            self.rate_limiter.clone(),
        ));

        if !self.config.disable_connection_mgmt {
            self.topology.trigger_refresh();
        }

        Ok(endpoint)
    }

    async fn handle_disconnect(self: Arc<Self>, connection_id: u64) {
        self.router.remove_connection(connection_id);
        self.registry.fail_connection(connection_id);
        self.notifications.connect_down(connection_id.to_string());

        if self.shutdown.is_cancelled() || self.config.disable_connection_mgmt {
            return;
        }
        if self.router.connection_count() == 0 {
            self.topology.trigger_recovery();
        } else {
            self.topology.notify_connection_lost(connection_id);
        }
    }
}
