// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shared mutable router state. The three lookup tables are atomically
//! swapped wholesale on each topology update; readers take one snapshot
//! reference per operation and never block a writer. The connection table
//! and connection-identity bookkeeping are the one place this module
//! still uses a lock.

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::{connection::ConnectionEndpoint, router::hashinator::Hashinator};

/// Extracted from `@SystemCatalog("PROCEDURES")`.
#[derive(Debug, Clone)]
pub struct ProcedureInfo {
    pub read_only: bool,
    pub single_partition: bool,
    /// `(parameter index, parameter type tag)`, present only for
    /// single-partition procedures.
    pub partition_parameter: Option<(usize, u8)>,
}

/// A (timestamp, leader-address) pair established on first connect;
/// connections whose identity differs later are rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub timestamp: i64,
    pub leader_address: String,
}

#[derive(Default)]
struct ConnectionBookkeeping {
    host_to_connection: HashMap<String, u64>,
    historical_targets: HashSet<SocketAddr>,
    cluster_identity: Option<ClusterIdentity>,
}

#[derive(Default)]
pub struct RoutingCounters {
    pub affinity_hits: AtomicU64,
    pub round_robin_hits: AtomicU64,
    pub read_only_calls: AtomicU64,
    pub write_calls: AtomicU64,
}

pub struct RouterState {
    pub leader_map: ArcSwap<HashMap<i32, u64>>,
    pub hashinator: ArcSwap<Option<Arc<dyn Hashinator>>>,
    pub procedure_map: ArcSwap<HashMap<String, ProcedureInfo>>,
    pub connections: DashMap<u64, Arc<ConnectionEndpoint>>,
    pub counters: RoutingCounters,
    round_robin_cursor: AtomicUsize,
    bookkeeping: Mutex<ConnectionBookkeeping>,
}

impl Default for RouterState {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterState {
    pub fn new() -> Self {
        Self {
            leader_map: ArcSwap::from_pointee(HashMap::new()),
            hashinator: ArcSwap::from_pointee(None),
            procedure_map: ArcSwap::from_pointee(HashMap::new()),
            connections: DashMap::new(),
            counters: RoutingCounters::default(),
            round_robin_cursor: AtomicUsize::new(0),
            bookkeeping: Mutex::new(ConnectionBookkeeping::default()),
        }
    }

    pub fn install_leader_map(&self, map: HashMap<i32, u64>) {
        self.leader_map.store(Arc::new(map));
    }

    pub fn install_hashinator(&self, hashinator: Arc<dyn Hashinator>) {
        self.hashinator.store(Arc::new(Some(hashinator)));
    }

    pub fn install_procedure_map(&self, map: HashMap<String, ProcedureInfo>) {
        self.procedure_map.store(Arc::new(map));
    }

    pub fn remove_connection(&self, connection_id: u64) {
        self.connections.remove(&connection_id);
    }

    pub async fn register_connection(&self, host_id: String, addr: SocketAddr, endpoint: Arc<ConnectionEndpoint>) {
        let mut book = self.bookkeeping.lock().await;
        book.host_to_connection.insert(host_id, endpoint.id);
        book.historical_targets.insert(addr);
        self.connections.insert(endpoint.id, endpoint);
    }

    /// Establishes or validates cluster identity on first/subsequent
    /// connect. Returns `false` if a differing identity was rejected.
    pub async fn accept_cluster_identity(&self, identity: ClusterIdentity) -> bool {
        let mut book = self.bookkeeping.lock().await;
        match &book.cluster_identity {
            None => {
                book.cluster_identity = Some(identity);
                true
            },
            Some(existing) => *existing == identity,
        }
    }

    pub async fn historical_targets(&self) -> HashSet<SocketAddr> {
        self.bookkeeping.lock().await.historical_targets.clone()
    }

    pub async fn connection_id_for_host(&self, host_id: &str) -> Option<u64> {
        self.bookkeeping.lock().await.host_to_connection.get(host_id).copied()
    }

    pub async fn connected_host_ids(&self) -> HashSet<String> {
        self.bookkeeping.lock().await.host_to_connection.keys().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn next_round_robin_index(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.round_robin_cursor.fetch_add(1, Ordering::Relaxed) % len
    }
}
