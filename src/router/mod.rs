//! Router: picks a connection for a call using partition-leader affinity
//! with round-robin fallback.

// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod hashinator;
pub mod snapshot;

use std::sync::{Arc, atomic::Ordering};

use crate::{
    connection::ConnectionEndpoint,
    invocation::{Invocation, MULTI_PARTITION_ID, ROUTE_BY_PARAMETER},
    router::snapshot::RouterState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteMethod {
    Affinity,
    RoundRobin,
}

pub struct RouteDecision {
    pub connection_id: u64,
    pub method: RouteMethod,
    pub partition_id: Option<i32>,
}

/// Resolves the partition id for an invocation: explicit partition wins;
/// otherwise consult the procedure map and hashinator; otherwise no
/// affinity.
fn resolve_partition(invocation: &Invocation, state: &RouterState) -> Option<i32> {
    if invocation.partition_id != ROUTE_BY_PARAMETER {
        return Some(invocation.partition_id);
    }

    let procedures = state.procedure_map.load();
    let info = procedures.get(&invocation.procedure_name)?;

    if !info.single_partition {
        return Some(MULTI_PARTITION_ID);
    }

    let (index, type_tag) = info.partition_parameter?;
    let hashinator_slot = state.hashinator.load();
    let hashinator = hashinator_slot.as_ref().as_ref()?;

    let crate::invocation::ParameterSet::Deferred(values) = &invocation.params else {
        // Already-serialized parameter sets can't be inspected for the
        // partition key without a decoder this core doesn't own; fall back
        // to no affinity rather than guess.
        return None;
    };
    let value = values.get(index)?;
    let bytes = value.hash_bytes()?;
    Some(hashinator.hash(type_tag, &bytes))
}

/// Picks a connection for `invocation`. Returns `None` ("no connections to
/// cluster at this time") if nothing is reachable.
pub fn route(invocation: &Invocation, state: &Arc<RouterState>) -> Option<RouteDecision> {
    let partition_id = resolve_partition(invocation, state);

    if let Some(pid) = partition_id {
        let leader_map = state.leader_map.load();
        if let Some(&connection_id) = leader_map.get(&pid)
            && let Some(endpoint) = state.connections.get(&connection_id)
            && endpoint.is_connected()
        {
            state.counters.affinity_hits.fetch_add(1, Ordering::Relaxed);
            bump_read_write(state, invocation);
            return Some(RouteDecision {
                connection_id,
                method: RouteMethod::Affinity,
                partition_id: Some(pid),
            });
        }
    }

    round_robin_fallback(state).map(|connection_id| {
        state.counters.round_robin_hits.fetch_add(1, Ordering::Relaxed);
        bump_read_write(state, invocation);
        RouteDecision {
            connection_id,
            method: RouteMethod::RoundRobin,
            partition_id,
        }
    })
}

fn bump_read_write(state: &Arc<RouterState>, invocation: &Invocation) {
    let read_only = state
        .procedure_map
        .load()
        .get(&invocation.procedure_name)
        .map(|info| info.read_only)
        .unwrap_or(false);
    if read_only {
        state.counters.read_only_calls.fetch_add(1, Ordering::Relaxed);
    } else {
        state.counters.write_calls.fetch_add(1, Ordering::Relaxed);
    }
}

/// Two-pass round-robin: first pass prefers connections without network
/// backpressure; second pass accepts any connected endpoint.
fn round_robin_fallback(state: &Arc<RouterState>) -> Option<u64> {
    let snapshot: Vec<(u64, Arc<ConnectionEndpoint>)> = state
        .connections
        .iter()
        .map(|r| (*r.key(), r.value().clone()))
        .collect();
    if snapshot.is_empty() {
        return None;
    }

    let start = state.next_round_robin_index(snapshot.len());

    for pass_prefers_clear in [true, false] {
        for offset in 0..snapshot.len() {
            let (id, endpoint) = &snapshot[(start + offset) % snapshot.len()];
            if !endpoint.is_connected() {
                continue;
            }
            if pass_prefers_clear && endpoint.backpressure.is_on() {
                continue;
            }
            return Some(*id);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_partition_uses_explicit_value() {
        let state = Arc::new(RouterState::new());
        let inv = Invocation::new("Foo", 1).with_partition(7);
        assert_eq!(resolve_partition(&inv, &state), Some(7));
    }

    #[test]
    fn resolve_partition_with_no_procedure_info_is_none() {
        let state = Arc::new(RouterState::new());
        let inv = Invocation::new("Unknown", 1);
        assert_eq!(resolve_partition(&inv, &state), None);
    }

    #[test]
    fn no_connections_returns_none() {
        let state = Arc::new(RouterState::new());
        let inv = Invocation::new("Foo", 1);
        assert!(route(&inv, &state).is_none());
    }
}
