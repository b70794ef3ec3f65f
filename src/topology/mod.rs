// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Topology manager: the three cooperating on-demand tasks that keep the
//! router's snapshots (leader map, hashinator, procedure map) and
//! connection set current.
//!
//! Each task is gated by its own "pending" flag, and holds only a weak
//! back-reference to the owning `ClientCore`: this manager is built before
//! the `ClientCore` that owns it exists, so it cannot hold a strong
//! reference back; `attach_core` wires the back-reference in once the core
//! is wrapped in its own `Arc`.

mod catalog;

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::{
    client::core::ClientCore,
    invocation::{ParamValue, ParameterSet},
    notify::Notifications,
    procedures::{SUBSCRIBE, SYSTEM_CATALOG, SYSTEM_INFORMATION},
    router::{hashinator::ModuloHashinator, snapshot::RouterState},
};

/// The topology refresh statistics selector; kept as a constant next to
/// the other procedure names even though it is a selector argument, not a
/// procedure name, since callers always pair it with `@Statistics`.
const STATISTICS: &str = "@Statistics";
const TOPO_SELECTOR: &str = "TOPOLOGY";
const STATS_TOPO_SELECTOR: &str = "TOPO";
const PROCEDURES_SELECTOR: &str = "PROCEDURES";
const OVERVIEW_SELECTOR: &str = "OVERVIEW";

pub struct TopologyManager {
    router: Arc<RouterState>,
    notifications: Arc<Notifications>,
    core_ref: OnceCell<Weak<ClientCore>>,

    subscribe_pending: AtomicBool,
    refresh_pending: AtomicBool,
    connect_pending: AtomicBool,
    recovery_pending: AtomicBool,

    /// Decided once, on the first connection task: `true` prefers
    /// `ADMINPORT` (every existing connection already used one), `false`
    /// prefers `CLIENTPORT`.
    prefer_admin_port: OnceCell<bool>,

    /// The connection the last successful `@Subscribe` was issued on; if
    /// it drops, the resubscribe task rearms with the short delay rather
    /// than the failure delay.
    subscriber_connection: Mutex<Option<u64>>,
    /// Cleared on every topology refresh; a future all-partition call
    /// consults this to know its cached partition-keys are stale.
    partition_keys_valid: AtomicBool,

    procedure_call_timeout: Duration,
    resubscribe_delay: Duration,
    resubscribe_failure_delay: Duration,
    reconnect_retry_delay: Duration,
}

impl TopologyManager {
    pub fn new(
        router: Arc<RouterState>,
        notifications: Arc<Notifications>,
        procedure_call_timeout: Duration,
        resubscribe_delay: Duration,
        resubscribe_failure_delay: Duration,
        reconnect_retry_delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            router,
            notifications,
            core_ref: OnceCell::new(),
            subscribe_pending: AtomicBool::new(false),
            refresh_pending: AtomicBool::new(false),
            connect_pending: AtomicBool::new(false),
            recovery_pending: AtomicBool::new(false),
            prefer_admin_port: OnceCell::new(),
            subscriber_connection: Mutex::new(None),
            partition_keys_valid: AtomicBool::new(false),
            procedure_call_timeout,
            resubscribe_delay,
            resubscribe_failure_delay,
            reconnect_retry_delay,
        })
    }

    /// Must be called once, right after wrapping the owning `ClientCore` in
    /// an `Arc`.
    pub fn attach_core(&self, core: Weak<ClientCore>) {
        let _ = self.core_ref.set(core);
    }

    fn core(&self) -> Option<Arc<ClientCore>> {
        self.core_ref.get()?.upgrade()
    }

    fn is_shutting_down(&self) -> bool {
        self.core().is_none_or(|c| c.shutdown.is_cancelled())
    }

    /// `false` once a topology refresh has run since the partition-keys
    /// cache was last filled; a future all-partition caller consults this
    /// before trusting its cached keys.
    pub fn partition_keys_valid(&self) -> bool {
        self.partition_keys_valid.load(Ordering::Acquire)
    }

    // --- magic-handle completion entry points -----------------

    /// Invoked by the dispatcher for an unsolicited push on the magic
    /// topology handle.
    pub async fn on_topology_response(&self, results: Bytes) {
        self.apply_topology_statistics(results).await;
    }

    /// Invoked by the dispatcher for an unsolicited push on the magic
    /// catalog handle.
    pub async fn on_catalog_response(&self, results: Bytes) {
        self.apply_procedure_catalog(&results);
    }

    /// Called from the connection-lost path. If the dropped connection was
    /// the one the subscriber task used, rearms the subscribe task with
    /// the short delay rather than waiting for a refresh to notice.
    pub fn notify_connection_lost(self: &Arc<Self>, connection_id: u64) {
        let was_subscriber = {
            let mut guard = self.subscriber_connection.lock().unwrap_or_else(|e| e.into_inner());
            if *guard == Some(connection_id) {
                *guard = None;
                true
            } else {
                false
            }
        };
        if was_subscriber {
            self.rearm_subscribe_after(self.resubscribe_delay);
        }
    }

    // --- subscribe task -----------------------------------------------

    pub fn trigger_subscribe(self: &Arc<Self>) {
        if self.subscribe_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.run_subscribe().await;
            this.subscribe_pending.store(false, Ordering::Release);
        });
    }

    async fn run_subscribe(self: &Arc<Self>) {
        if self.is_shutting_down() {
            return;
        }
        let Some(core) = self.core() else { return };

        let Some(connection_id) = self.router.connections.iter().next().map(|r| *r.key()) else {
            self.rearm_subscribe_after(self.resubscribe_failure_delay);
            return;
        };

        let subscribe_handle = core.handles.next_internal();
        let result = core
            .call_on_connection(
                connection_id,
                crate::invocation::Invocation::new(SUBSCRIBE, subscribe_handle)
                    .with_priority(core.config.request_priority)
                    .with_params(ParameterSet::Deferred(vec![ParamValue::Varchar(TOPO_SELECTOR.to_string())])),
                self.procedure_call_timeout,
            )
            .await;

        if let Err(e) = result {
            warn!(error = %e, "topology subscribe failed, will retry");
            self.rearm_subscribe_after(self.resubscribe_failure_delay);
            return;
        }
        *self.subscriber_connection.lock().unwrap_or_else(|e| e.into_inner()) = Some(connection_id);

        if let Ok(response) = core
            .call_internal(
                STATISTICS,
                ParameterSet::Deferred(vec![ParamValue::Varchar(STATS_TOPO_SELECTOR.to_string())]),
                self.procedure_call_timeout,
            )
            .await
        {
            self.apply_topology_statistics(response.results).await;
        }

        if let Ok(response) = core
            .call_internal(
                SYSTEM_CATALOG,
                ParameterSet::Deferred(vec![ParamValue::Varchar(PROCEDURES_SELECTOR.to_string())]),
                self.procedure_call_timeout,
            )
            .await
        {
            self.apply_procedure_catalog(&response.results);
        }
    }

    fn rearm_subscribe_after(self: &Arc<Self>, delay: Duration) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.trigger_subscribe();
        });
    }

    // --- topology refresh task ----------------------------------------

    /// Called when a new connection registers without an accompanying
    /// topology-change push — the connect path's own trigger, not a user
    /// entry point.
    pub fn trigger_refresh(self: &Arc<Self>) {
        if self.refresh_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.run_refresh().await;
            this.refresh_pending.store(false, Ordering::Release);
        });
    }

    async fn run_refresh(self: &Arc<Self>) {
        if self.is_shutting_down() {
            return;
        }
        let Some(core) = self.core() else { return };
        if let Ok(response) = core
            .call_internal(
                STATISTICS,
                ParameterSet::Deferred(vec![ParamValue::Varchar(STATS_TOPO_SELECTOR.to_string())]),
                self.procedure_call_timeout,
            )
            .await
        {
            self.apply_topology_statistics(response.results).await;
        }
    }

    async fn apply_topology_statistics(&self, results: Bytes) {
        let parsed = match catalog::parse_topology_statistics(&results) {
            Ok(p) => p,
            Err(e) => {
                self.notifications
                    .error_log(&format!("failed to parse topology statistics: {e}"));
                return;
            },
        };

        // Forces a reload on the next all-partition call; this core does
        // not implement the all-partition fan-out itself (no caller of
        // `@GetPartitionKeys` exists yet), only the invalidation bookkeeping.
        self.partition_keys_valid.store(false, Ordering::Release);

        if !parsed.hashconfig.is_empty()
            && let Ok(hashinator) = ModuloHashinator::from_hashconfig(parsed.hashconfig)
        {
            self.router.install_hashinator(Arc::new(hashinator));
        }

        let mut leader_map = HashMap::new();
        let mut unconnected_hosts = Vec::new();
        for (partition, leader, sites) in &parsed.rows {
            if let Some(connection_id) = self.router.connection_id_for_host(leader).await {
                leader_map.insert(*partition, connection_id);
            }
            for host in sites {
                if self.router.connection_id_for_host(host).await.is_none() {
                    unconnected_hosts.push(host.clone());
                }
            }
        }
        self.router.install_leader_map(leader_map);

        if !unconnected_hosts.is_empty() {
            unconnected_hosts.sort();
            unconnected_hosts.dedup();
            self.trigger_connect(unconnected_hosts);
        }
    }

    fn apply_procedure_catalog(&self, results: &Bytes) {
        let (map, bad) = catalog::parse_procedure_catalog(results);
        if bad > 0 {
            debug!(bad_rows = bad, "procedure catalog had malformed rows");
        }
        self.router.install_procedure_map(map);
    }

    // --- connection task (two-stage) ----------------------------------

    pub fn trigger_connect(self: &Arc<Self>, hosts: Vec<String>) {
        if hosts.is_empty() || self.connect_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.run_connect(hosts).await;
            this.connect_pending.store(false, Ordering::Release);
        });
    }

    async fn run_connect(self: &Arc<Self>, hosts: Vec<String>) {
        if self.is_shutting_down() {
            return;
        }
        let Some(core) = self.core() else { return };

        let overview = match core
            .call_internal(
                SYSTEM_INFORMATION,
                ParameterSet::Deferred(vec![ParamValue::Varchar(OVERVIEW_SELECTOR.to_string())]),
                self.procedure_call_timeout,
            )
            .await
        {
            Ok(response) => response.results,
            Err(e) => {
                warn!(error = %e, "failed to fetch system information for connection task");
                self.rearm_connect_after(self.reconnect_retry_delay, hosts);
                return;
            },
        };

        let endpoints = match catalog::parse_system_information(&overview) {
            Ok(v) => v,
            Err(e) => {
                self.notifications
                    .error_log(&format!("failed to parse system information: {e}"));
                return;
            },
        };

        let prefer_admin = *self.prefer_admin_port.get_or_init(|| {
            self.router.connection_count() > 0 && self.all_existing_connections_are_admin()
        });

        let mut still_unconnected = Vec::new();
        for host_id in hosts {
            let Some(endpoint) = endpoints.iter().find(|e| e.host_id == host_id) else {
                still_unconnected.push(host_id);
                continue;
            };
            let port = if prefer_admin { endpoint.admin_port } else { endpoint.client_port };
            let addr = format!("{}:{}", endpoint.ip, port);
            match addr.parse() {
                Ok(addr) => {
                    if core
                        .connect_and_register_with_port_hint(addr, Some(host_id.clone()), Some(prefer_admin))
                        .await
                        .is_err()
                    {
                        still_unconnected.push(host_id);
                    }
                },
                Err(_) => still_unconnected.push(host_id),
            }
        }

        if !still_unconnected.is_empty() {
            self.rearm_connect_after(self.reconnect_retry_delay, still_unconnected);
        }
    }

    /// `true` only if every currently-connected endpoint is known to have
    /// been opened against the admin port. A connection whose port origin
    /// is unknown — a user-supplied bootstrap address, or a
    /// first-connection recovery reusing a historical address — counts as
    /// non-admin, so the default stays `CLIENTPORT` unless every
    /// connection was actually opened by this task against `ADMINPORT`.
    fn all_existing_connections_are_admin(&self) -> bool {
        self.router
            .connections
            .iter()
            .all(|entry| entry.value().is_admin_port == Some(true))
    }

    fn rearm_connect_after(self: &Arc<Self>, delay: Duration, hosts: Vec<String>) {
        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.trigger_connect(hosts);
        });
    }

    // --- first-connection recovery task --------------------------------

    pub fn trigger_recovery(self: &Arc<Self>) {
        if self.recovery_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.run_recovery().await;
            this.recovery_pending.store(false, Ordering::Release);
        });
    }

    async fn run_recovery(self: &Arc<Self>) {
        loop {
            if self.is_shutting_down() {
                return;
            }
            let Some(core) = self.core() else { return };
            if self.router.connection_count() > 0 {
                return;
            }

            let targets = self.router.historical_targets().await;
            for addr in targets {
                if core.connect_and_register(addr, None).await.is_ok() {
                    self.trigger_subscribe();
                    return;
                }
            }

            tokio::time::sleep(self.reconnect_retry_delay).await;
        }
    }
}
