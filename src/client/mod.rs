// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Public surface: the async/sync call façades, a builder for the
//! optional notification callbacks, and shutdown/drain.
//!
//! Shared state lives behind an `Arc`, with a `OnceCell<Weak<Self>>`
//! back-reference handed to the pieces (here, the topology manager) that
//! are built before the owning struct exists.

pub mod core;

use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    cfg::config::ClientConfig,
    client::core::ClientCore,
    connection::ConnectionEndpoint,
    dispatch::Dispatcher,
    error::ClientError,
    invocation::{Invocation, ParameterSet},
    notify::{
        BackpressureHandler, ConnectDownHandler, ConnectFailureHandler, ConnectUpHandler,
        ErrorLogHandler, LateResponseHandler, Notifications,
    },
    pipeline::RateLimiter,
    registry::{HandleAllocator, Registry, RegistryLimits, SendPermits},
    response::ClientResponse,
    router::snapshot::RouterState,
    timeout::TimeoutScheduler,
    topology::TopologyManager,
};

/// Builds a [`Client`], wiring up the optional notification callbacks
/// before the first connection is made.
#[derive(Default)]
pub struct ClientBuilder {
    notifications: Notifications,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_connect_up(mut self, f: ConnectUpHandler) -> Self {
        self.notifications.connect_up = Some(f);
        self
    }

    pub fn on_connect_down(mut self, f: ConnectDownHandler) -> Self {
        self.notifications.connect_down = Some(f);
        self
    }

    pub fn on_connect_failure(mut self, f: ConnectFailureHandler) -> Self {
        self.notifications.connect_failure = Some(f);
        self
    }

    pub fn on_late_response(mut self, f: LateResponseHandler) -> Self {
        self.notifications.late_response = Some(f);
        self
    }

    pub fn on_backpressure(mut self, f: BackpressureHandler) -> Self {
        self.notifications.backpressure = Some(f);
        self
    }

    pub fn on_error_log(mut self, f: ErrorLogHandler) -> Self {
        self.notifications.error_log = Some(f);
        self
    }

    /// Connects to every address in `config.servers`, spawns the background
    /// tasks (dispatcher, timeout scheduler, topology manager), and — unless
    /// `disable_connection_mgmt` is set — kicks off the initial subscribe.
    pub async fn connect(self, config: ClientConfig) -> anyhow::Result<Client> {
        Client::connect_with_notifications(config, self.notifications).await
    }
}

/// The client runtime: one shared [`ClientCore`] behind the façade below.
pub struct Client {
    core: Arc<ClientCore>,
}

impl Client {
    /// Connects with no notification callbacks configured. Equivalent to
    /// `ClientBuilder::new().connect(config)`.
    pub async fn connect(config: ClientConfig) -> anyhow::Result<Self> {
        Self::connect_with_notifications(config, Notifications::default()).await
    }

    async fn connect_with_notifications(config: ClientConfig, notifications: Notifications) -> anyhow::Result<Self> {
        let notifications = Arc::new(notifications);
        let registry = Arc::new(Registry::new(
            RegistryLimits {
                hard_limit: config.limits.request_hard_limit,
                warning_level: config.limits.request_warning_level,
                resume_level: config.limits.request_resume_level,
            },
            notifications.clone(),
        ));
        let permits = Arc::new(SendPermits::new(config.limits.outstanding_txn_limit));
        let router = Arc::new(RouterState::new());
        let handles = Arc::new(HandleAllocator::new());
        let rate_limiter = config.txn_per_sec_rate_limit.map(RateLimiter::start);
        let shutdown = CancellationToken::new();

        let (dispatch_tx, dispatch_rx) = tokio::sync::mpsc::channel(1024);

        let topology = TopologyManager::new(
            router.clone(),
            notifications.clone(),
            config.timeouts.procedure_call_timeout,
            config.reconnect.reconnect_delay,
            config.reconnect.reconnect_retry_delay,
            config.reconnect.reconnect_retry_delay,
        );
        let timeout_scheduler = TimeoutScheduler::new(registry.clone(), router.clone());

        let core = Arc::new(ClientCore {
            config: config.clone(),
            registry,
            permits,
            router,
            handles,
            notifications: notifications.clone(),
            rate_limiter,
            dispatch_tx,
            topology: topology.clone(),
            timeout_scheduler: timeout_scheduler.clone(),
            shutdown: shutdown.clone(),
        });
        topology.attach_core(Arc::downgrade(&core));

        let dispatcher = Dispatcher::new(core.registry.clone(), core.router.clone(), topology.clone(), notifications);
        dispatcher.spawn_workers(dispatch_rx, config.response_thread_count);

        timeout_scheduler.spawn(config.timeouts.connection_response_timeout, shutdown.clone());

        for server in &config.servers {
            let addr: SocketAddr = server
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid server address {server:?}: {e}"))?;
            core.connect_and_register(addr, None).await?;
        }

        if !config.disable_connection_mgmt {
            topology.trigger_subscribe();
        }

        Ok(Self { core })
    }

    /// Issues `procedure_name(params)` asynchronously: routes to the
    /// partition-leader connection (or falls back to round-robin), admits
    /// it into the registry, and enqueues it on that connection's send
    /// pipeline. The returned future resolves with exactly one of: a
    /// successful [`ClientResponse`], or a [`ClientError`].
    pub async fn call_async(
        &self,
        procedure_name: &str,
        params: ParameterSet,
        priority: Option<u8>,
        partition_id: Option<i32>,
        timeout: Option<Duration>,
    ) -> Result<ClientResponse, ClientError> {
        let handle = self.core.handles.next_public();
        let mut invocation = Invocation::new(procedure_name, handle)
            .with_priority(priority.unwrap_or(self.core.config.request_priority))
            .with_params(params);
        if let Some(partition_id) = partition_id {
            invocation = invocation.with_partition(partition_id);
        }
        let timeout = timeout.unwrap_or(self.core.config.timeouts.procedure_call_timeout);
        self.core.call(invocation, timeout).await
    }

    /// Sync façade: blocks the calling thread on [`Self::call_async`].
    /// A non-SUCCESS response is surfaced as
    /// [`ClientError::ProcedureCallError`], matching "unsuccessful responses
    /// as a 'procedure call' error type". Must not be called from within a
    /// single-threaded Tokio runtime's own worker thread (it would
    /// deadlock); `block_in_place` requires a multi-threaded runtime.
    pub fn call_sync(
        &self,
        procedure_name: &str,
        params: ParameterSet,
        priority: Option<u8>,
        partition_id: Option<i32>,
        timeout: Option<Duration>,
    ) -> Result<ClientResponse, ClientError> {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.call_async(
                procedure_name,
                params,
                priority,
                partition_id,
                timeout,
            ))
        })
    }

    pub fn is_backpressure_on(&self) -> bool {
        self.core.registry.is_backpressure_on()
    }

    pub fn outstanding_request_count(&self) -> usize {
        self.core.registry.len()
    }

    pub fn connection_count(&self) -> usize {
        self.core.router.connection_count()
    }

    pub fn send_permits_available(&self) -> usize {
        self.core.permits.available()
    }

    /// Dynamically resizes the outstanding-transaction limit: grows by
    /// `delta` if positive, shrinks by `-delta` if negative.
    pub fn resize_outstanding_limit(&self, delta: i64) {
        if delta > 0 {
            self.core.permits.grow(delta as usize);
        } else if delta < 0 {
            self.core.permits.shrink((-delta) as usize);
        }
    }

    /// Connects to an additional server outside of the initial `servers`
    /// list, e.g. one discovered manually rather than via topology refresh.
    pub async fn add_connection(&self, addr: SocketAddr) -> anyhow::Result<Arc<ConnectionEndpoint>> {
        self.core.connect_and_register(addr, None).await
    }

    /// Global soft stop: sets the shutdown flag, drains pending background
    /// tasks and in-flight requests up to `grace`, then closes every
    /// connection. Does not abort requests still draining when `grace`
    /// expires — it simply stops waiting for them.
    pub async fn shutdown(&self, grace: Duration) {
        self.core.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline && !self.core.registry.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let endpoints: Vec<_> = self.core.router.connections.iter().map(|r| r.value().clone()).collect();
        for endpoint in endpoints {
            endpoint.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_default_has_no_handlers() {
        let builder = ClientBuilder::new();
        assert!(builder.notifications.connect_up.is_none());
        assert!(builder.notifications.backpressure.is_none());
    }
}
