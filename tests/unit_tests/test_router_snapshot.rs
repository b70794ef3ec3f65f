// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use oltp_client_rs::{
    connection::ConnectionEndpoint,
    router::{hashinator::ModuloHashinator, snapshot::{ClusterIdentity, ProcedureInfo, RouterState}},
};
use tokio::{net::TcpListener, sync::mpsc};

async fn dummy_endpoint() -> Arc<ConnectionEndpoint> {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = listener.accept().await;
    });
    let (tx, _rx) = mpsc::channel(8);
    ConnectionEndpoint::connect(addr, Duration::from_secs(1), tx, Arc::new(|_id| {}), 5000, None)
        .await
        .unwrap()
}

#[tokio::test]
async fn cluster_identity_is_established_once_and_rejects_divergence() {
    let state = RouterState::new();
    let first = ClusterIdentity { timestamp: 1, leader_address: "10.0.0.1:21212".into() };
    assert!(state.accept_cluster_identity(first.clone()).await);
    assert!(state.accept_cluster_identity(first).await);

    let divergent = ClusterIdentity { timestamp: 2, leader_address: "10.0.0.2:21212".into() };
    assert!(!state.accept_cluster_identity(divergent).await);
}

#[tokio::test]
async fn register_and_remove_connection_updates_bookkeeping() {
    let state = RouterState::new();
    let endpoint = dummy_endpoint().await;
    let id = endpoint.id;
    let addr = endpoint.addr;

    state.register_connection("node-a".to_string(), addr, endpoint).await;
    assert_eq!(state.connection_count(), 1);
    assert_eq!(state.connection_id_for_host("node-a").await, Some(id));
    assert!(state.historical_targets().await.contains(&addr));

    state.remove_connection(id);
    assert_eq!(state.connection_count(), 0);
    // Historical targets and host mappings survive connection removal; they
    // record intent to reconnect, not current membership.
    assert!(state.historical_targets().await.contains(&addr));
}

#[test]
fn round_robin_index_cycles_and_handles_empty_set() {
    let state = RouterState::new();
    assert_eq!(state.next_round_robin_index(0), 0);
    let seen: Vec<usize> = (0..6).map(|_| state.next_round_robin_index(3)).collect();
    assert_eq!(seen, vec![0, 1, 2, 0, 1, 2]);
}

#[test]
fn installed_maps_are_visible_through_the_atomic_swap() {
    let state = RouterState::new();
    assert!(state.leader_map.load().is_empty());
    assert!(state.hashinator.load().is_none());
    assert!(state.procedure_map.load().is_empty());

    let mut leaders = std::collections::HashMap::new();
    leaders.insert(0, 7u64);
    state.install_leader_map(leaders);
    assert_eq!(state.leader_map.load().get(&0), Some(&7));

    state.install_hashinator(Arc::new(ModuloHashinator::with_partition_count(4)));
    assert!(state.hashinator.load().is_some());

    let mut procedures = std::collections::HashMap::new();
    procedures.insert(
        "Ping".to_string(),
        ProcedureInfo { read_only: true, single_partition: false, partition_parameter: None },
    );
    state.install_procedure_map(procedures);
    assert!(state.procedure_map.load().get("Ping").unwrap().read_only);
}
