// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! The request registry: maps in-flight call handles to pending-request
//! records, enforces the hard cap, and drives the request-backpressure
//! transition.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dashmap::{DashMap, DashSet};
use tokio::sync::{OwnedSemaphorePermit, oneshot};

use crate::{
    error::ClientError, invocation::Invocation, notify::Notifications,
    registry::backpressure::BackpressureGate, response::ClientResponse,
};

/// Created when a call is admitted; destroyed by exactly one of {response
/// arrival, timeout, connection loss, local serialization failure}.
/// Completion is idempotent: only the caller that successfully removes the
/// handle from the registry may complete the promise.
pub struct PendingRequest {
    pub sequence: u64,
    pub handle: i64,
    pub procedure_name: String,
    pub start: Instant,
    pub timeout: Duration,
    pub connection_id: u64,
    /// Held for the lifetime of the record; dropping it (on any terminal
    /// outcome) releases the send permit back to the pool.
    pub permit: Option<OwnedSemaphorePermit>,
    pub completion: oneshot::Sender<Result<ClientResponse, ClientError>>,
}

pub struct RegistryLimits {
    pub hard_limit: usize,
    pub warning_level: usize,
    pub resume_level: usize,
}

impl Default for RegistryLimits {
    fn default() -> Self {
        Self {
            hard_limit: 1000,
            warning_level: 900,
            resume_level: 700,
        }
    }
}

pub struct Registry {
    records: DashMap<i64, PendingRequest>,
    /// Handles that have actually been handed to the network; distinct
    /// from `records`, which also contains requests still queued
    /// behind a permit or network-backpressure wait. Only entries in this
    /// set are subject to the per-tick response-timeout scan.
    active: DashSet<i64>,
    sequence: AtomicU64,
    limits: RegistryLimits,
    backpressure: BackpressureGate,
    notifications: Arc<Notifications>,
}

impl Registry {
    pub fn new(limits: RegistryLimits, notifications: Arc<Notifications>) -> Self {
        let backpressure_handler = notifications.backpressure.clone();
        Self {
            records: DashMap::new(),
            active: DashSet::new(),
            sequence: AtomicU64::new(0),
            limits,
            backpressure: BackpressureGate::new(backpressure_handler),
            notifications,
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Admission: check then insert, in that order — a race between two
    /// callers can let the registry transiently exceed `hard_limit` by one,
    /// which is accepted rather than guarded against with a heavier lock.
    pub fn admit(&self, invocation: &Invocation, record: PendingRequest) -> Result<(), ClientError> {
        let size = self.records.len();
        if size >= self.limits.hard_limit {
            return Err(ClientError::RequestLimitExceeded {
                outstanding: size,
                hard_limit: self.limits.hard_limit,
            });
        }
        let handle = invocation.handle;
        self.records.insert(handle, record);
        self.backpressure
            .on_admit(self.records.len(), self.limits.warning_level);
        Ok(())
    }

    /// Marks a handle active once it has been handed to the network;
    /// scanned by the timeout scheduler from this point on.
    pub fn mark_active(&self, handle: i64) {
        self.active.insert(handle);
    }

    /// Stashes the send permit on the still-pending record, so it is
    /// released automatically whichever terminal path removes the record.
    pub fn attach_permit(&self, handle: i64, permit: tokio::sync::OwnedSemaphorePermit) {
        if let Some(mut record) = self.records.get_mut(&handle) {
            record.permit = Some(permit);
        }
    }

    /// Removes and returns the record for `handle`, if present. The caller
    /// that receives `Some` is the one and only completer. Always clears
    /// `active` too, and always re-checks the resume threshold, matching
    /// "when a response arrives (or a timeout releases a record)".
    pub fn remove(&self, handle: i64) -> Option<PendingRequest> {
        self.active.remove(&handle);
        let removed = self.records.remove(&handle).map(|(_, v)| v);
        if removed.is_some() {
            self.backpressure
                .on_complete(self.records.len(), self.limits.resume_level);
        } else {
            self.notifications.late_response(handle);
        }
        removed
    }

    /// Scans handles entered as active, yielding those whose deadline has
    /// passed. Exempt long-op procedures are the caller's concern (the
    /// scanner hands back enough to decide).
    pub fn active_overdue(&self, now: Instant) -> Vec<i64> {
        let mut overdue = Vec::new();
        for handle in self.active.iter() {
            let handle = *handle;
            if let Some(record) = self.records.get(&handle)
                && now.saturating_duration_since(record.start) > record.timeout
            {
                overdue.push(handle);
            }
        }
        overdue
    }

    pub fn is_backpressure_on(&self) -> bool {
        self.backpressure.is_on()
    }

    /// Fails and removes every pending record bound to `connection_id`; the
    /// connection-teardown path calls this once a socket stops.
    pub fn fail_connection(&self, connection_id: u64) {
        let handles: Vec<i64> = self
            .records
            .iter()
            .filter(|r| r.connection_id == connection_id)
            .map(|r| *r.key())
            .collect();
        for handle in handles {
            if let Some(record) = self.remove(handle) {
                let _ = record.completion.send(Err(ClientError::ConnectionLost));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record(handle: i64, seq: u64) -> (PendingRequest, oneshot::Receiver<Result<ClientResponse, ClientError>>) {
        let (tx, rx) = oneshot::channel();
        (
            PendingRequest {
                sequence: seq,
                handle,
                procedure_name: "Foo".to_string(),
                start: Instant::now(),
                timeout: Duration::from_secs(1),
                connection_id: 0,
                permit: None,
                completion: tx,
            },
            rx,
        )
    }

    #[test]
    fn hard_cap_rejects_at_limit() {
        let registry = Registry::new(
            RegistryLimits {
                hard_limit: 1,
                warning_level: 1,
                resume_level: 0,
            },
            Arc::new(Notifications::default()),
        );
        let inv = Invocation::new("Foo", 1);
        let (record, _rx) = make_record(1, 0);
        assert!(registry.admit(&inv, record).is_ok());

        let inv2 = Invocation::new("Foo", 2);
        let (record2, _rx2) = make_record(2, 1);
        let err = registry.admit(&inv2, record2).unwrap_err();
        assert!(matches!(err, ClientError::RequestLimitExceeded { .. }));
    }

    #[test]
    fn remove_on_unknown_handle_is_late_response() {
        let registry = Registry::new(RegistryLimits::default(), Arc::new(Notifications::default()));
        assert!(registry.remove(999).is_none());
    }

    #[test]
    fn active_overdue_only_reports_marked_active() {
        let registry = Registry::new(RegistryLimits::default(), Arc::new(Notifications::default()));
        let inv = Invocation::new("Foo", 1);
        let (mut record, _rx) = make_record(1, 0);
        record.timeout = Duration::from_millis(0);
        record.start = Instant::now() - Duration::from_millis(50);
        registry.admit(&inv, record).unwrap();

        assert!(registry.active_overdue(Instant::now()).is_empty());
        registry.mark_active(1);
        assert_eq!(registry.active_overdue(Instant::now()), vec![1]);
    }
}
